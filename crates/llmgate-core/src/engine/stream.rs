//! Streaming pipeline: forward upstream delta frames to the client as
//! SSE, accumulate usage, and settle accounting exactly once when the
//! stream ends, whether normally, on upstream error, or on client
//! disconnect.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use time::OffsetDateTime;

use llmgate_protocol::openai::Usage;
use llmgate_protocol::sse;
use llmgate_provider_core::ChatStream;
use llmgate_storage::NewActivityEvent;

use crate::engine::{RequestContext, SseFrames};
use crate::ledger::LedgerEntry;
use crate::state::AppState;
use crate::tokenizer;

const FRAME_CHANNEL_CAPACITY: usize = 32;

pub(crate) struct StreamPipeline {
    pub state: Arc<AppState>,
    pub upstream: ChatStream,
    pub gateway: String,
    pub attempts: u32,
    pub user_id: i64,
    pub key_id: i64,
    pub model: String,
    pub prompt_estimate: u64,
    pub ctx: RequestContext,
    pub started: Instant,
}

/// How the stream ended, for the activity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Finished,
    Cancelled,
    UpstreamError,
}

pub(crate) fn spawn_stream_pipeline(pipeline: StreamPipeline) -> SseFrames {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(FRAME_CHANNEL_CAPACITY);
    tokio::spawn(run_pipeline(pipeline, tx));
    rx
}

async fn run_pipeline(pipeline: StreamPipeline, tx: tokio::sync::mpsc::Sender<Bytes>) {
    let StreamPipeline {
        state,
        mut upstream,
        gateway,
        attempts,
        user_id,
        key_id,
        model,
        prompt_estimate,
        ctx,
        started,
    } = pipeline;

    let mut accumulated = String::new();
    let mut upstream_usage: Option<Usage> = None;
    let mut finish_reason: Option<String> = None;
    let mut end = StreamEnd::Finished;

    loop {
        let Some(frame) = upstream.recv().await else {
            break;
        };
        match frame {
            Ok(mut chunk) => {
                if let Some(content) = chunk.delta_content() {
                    accumulated.push_str(content);
                }
                if let Some(usage) = chunk.usage {
                    upstream_usage = Some(usage);
                }
                if finish_reason.is_none() {
                    finish_reason = chunk.finish_reason().map(str::to_string);
                }
                // The caller sees their own model string on every frame.
                chunk.model = model.clone();
                let payload = match serde_json::to_string(&chunk) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping unencodable frame");
                        continue;
                    }
                };
                if tx.send(sse::data_frame(&payload)).await.is_err() {
                    // Client went away. Dropping the upstream receiver
                    // cancels the provider task and the HTTP read.
                    end = StreamEnd::Cancelled;
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(%gateway, error = %err, "stream failed mid-flight");
                end = StreamEnd::UpstreamError;
                let body = crate::error::GatewayError::Upstream(err).body();
                if let Ok(payload) = serde_json::to_string(&body) {
                    let _ = tx.send(sse::data_frame(&payload)).await;
                }
                break;
            }
        }
    }
    // Stop reading the upstream immediately on cancellation.
    drop(upstream);

    if end != StreamEnd::Cancelled {
        let _ = tx.send(sse::done_frame()).await;
    }

    // Accounting runs exactly once per stream: debit observed tokens,
    // cancellation included (emitted content is never refunded), record
    // counters, and log activity.
    let usage = upstream_usage
        .unwrap_or_else(|| Usage::new(prompt_estimate, tokenizer::estimate_tokens(&model, &accumulated)));

    let cost = state
        .pricing
        .cost(&model, Some(&gateway), usage.prompt_tokens, usage.completion_tokens);

    if let Err(err) = state
        .ledger
        .debit(
            user_id,
            cost,
            LedgerEntry {
                model: Some(model.clone()),
                prompt_tokens: usage.prompt_tokens as i64,
                completion_tokens: usage.completion_tokens as i64,
                reason: "chat_completion_stream".to_string(),
            },
        )
        .await
    {
        tracing::error!(error = %err, user_id, "stream debit failed");
    }

    state.limiter.record(user_id, key_id, &model, usage.total_tokens);

    let finish_reason = match end {
        StreamEnd::Cancelled => Some("cancelled".to_string()),
        StreamEnd::UpstreamError => Some("error".to_string()),
        StreamEnd::Finished => finish_reason,
    };
    state.activity.log(NewActivityEvent {
        user_id,
        at: OffsetDateTime::now_utc(),
        model,
        provider: gateway,
        prompt_tokens: usage.prompt_tokens as i64,
        completion_tokens: usage.completion_tokens as i64,
        total_tokens: usage.total_tokens as i64,
        cost_usd: cost,
        latency_ms: started.elapsed().as_millis() as i64,
        finish_reason,
        endpoint: ctx.endpoint,
        session_id: ctx.session_id,
        metadata: Some(serde_json::json!({
            "trace_id": ctx.trace_id,
            "attempts": attempts,
        })),
    });
}
