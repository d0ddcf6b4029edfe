//! The chat-completion pipeline: authenticate → quota → route → invoke →
//! stream → account.

mod stream;

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use time::OffsetDateTime;

use llmgate_catalog::ModelRecord;
use llmgate_protocol::openai::{ChatCompletionRequest, ChatCompletionResponse, GatewayUsage, Usage};
use llmgate_storage::NewActivityEvent;
use llmgate_transform::{gateways, resolve_model};

use crate::auth::{self, AuthedUser};
use crate::error::GatewayError;
use crate::failover::{self, run_with_failover};
use crate::ledger::{LedgerEntry, ReserveOutcome};
use crate::ratelimit::LimitSet;
use crate::state::AppState;
use crate::tokenizer;

/// Completion tokens assumed for the pre-flight cost estimate when the
/// caller does not cap output.
const DEFAULT_COMPLETION_ESTIMATE: u32 = 1024;

/// Per-request context carried from the HTTP layer.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub endpoint: String,
    pub session_id: Option<String>,
    pub trace_id: String,
}

/// SSE-encoded frames ready to be written to the client verbatim.
pub type SseFrames = tokio::sync::mpsc::Receiver<Bytes>;

#[derive(Debug)]
pub enum ChatOutcome {
    Buffered(Box<ChatCompletionResponse>),
    Stream(SseFrames),
}

#[derive(Clone)]
pub struct GatewayEngine {
    state: Arc<AppState>,
}

impl GatewayEngine {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub async fn authenticate(&self, bearer_token: &str) -> Result<AuthedUser, GatewayError> {
        auth::authenticate(self.state.storage.as_ref(), bearer_token).await
    }

    /// The full pipeline for `POST /v1/chat/completions` (and its
    /// `/v1/responses` alias).
    pub async fn chat_completion(
        &self,
        auth: &AuthedUser,
        req: ChatCompletionRequest,
        ctx: RequestContext,
    ) -> Result<ChatOutcome, GatewayError> {
        let started = Instant::now();

        if req.model.trim().is_empty() {
            return Err(GatewayError::Validation("model is required".to_string()));
        }
        if req.messages.is_empty() {
            return Err(GatewayError::Validation("messages must not be empty".to_string()));
        }

        // Trial gate: expired trial with an empty balance is refused
        // before any counter or upstream is touched.
        let now = OffsetDateTime::now_utc();
        if auth.trial.expired(now) && auth.credits <= 0.0 {
            return Err(GatewayError::Quota(
                "trial expired and no credits remain".to_string(),
            ));
        }

        let original_model = req.model.clone();
        let message_texts: Vec<String> = req
            .messages
            .iter()
            .filter_map(|m| m.content.as_ref())
            .map(|c| c.flat_text())
            .collect();
        let prompt_estimate = tokenizer::estimate_prompt_tokens(&original_model, &message_texts);
        let completion_estimate =
            u64::from(req.max_tokens.unwrap_or(DEFAULT_COMPLETION_ESTIMATE));

        // Rate limits, with the tier set as fallback.
        let limits = LimitSet::for_tier(auth.tier);
        let decision = self.state.limiter.check(
            auth.user_id,
            auth.key_id,
            &original_model,
            &limits,
            prompt_estimate + completion_estimate,
        );
        if !decision.allowed {
            let retry_after_secs = decision.retry_after.map(|d| d.as_secs()).unwrap_or(1);
            return Err(GatewayError::RateLimited {
                message: "rate limit exceeded".to_string(),
                retry_after_secs,
            });
        }

        // Provider resolution, cache-assisted.
        let resolved = resolve_model(&original_model, req.gateway.as_deref(), &self.state.catalog);
        let primary = self.pick_primary(&resolved.gateway, req.gateway.is_some())?;

        // Soft reservation from the pre-flight estimate.
        let estimated_cost = self.state.pricing.cost(
            &original_model,
            Some(&primary),
            prompt_estimate,
            completion_estimate,
        );
        match self.state.ledger.reserve(auth.user_id, estimated_cost).await? {
            ReserveOutcome::Ok { .. } => {}
            ReserveOutcome::InsufficientFunds { balance } => {
                let trial_covers = !auth.trial.expired(now)
                    && auth.trial.remaining_credits >= estimated_cost;
                if !trial_covers {
                    return Err(GatewayError::Quota(format!(
                        "insufficient credits: balance ${balance:.6}, estimated cost ${estimated_cost:.6}"
                    )));
                }
            }
        }

        let candidates = self.candidates(&primary, &original_model);
        if req.is_stream() {
            self.stream_chat(auth, req, ctx, candidates, original_model, prompt_estimate, started)
                .await
        } else {
            self.buffered_chat(auth, req, ctx, candidates, original_model, prompt_estimate, started)
                .await
        }
    }

    fn pick_primary(&self, detected: &str, explicit: bool) -> Result<String, GatewayError> {
        if self.state.registry.contains(detected) {
            return Ok(detected.to_string());
        }
        // An explicitly requested gateway must exist; heuristic picks may
        // quietly fall back to the default.
        if explicit {
            return Err(GatewayError::Validation(format!(
                "gateway {detected} is not configured"
            )));
        }
        if self.state.registry.contains(gateways::OPENROUTER) {
            return Ok(gateways::OPENROUTER.to_string());
        }
        Err(GatewayError::NotFound(format!(
            "no configured provider can serve this model (wanted {detected})"
        )))
    }

    fn candidates(&self, primary: &str, original_model: &str) -> Vec<String> {
        failover::candidate_gateways(
            primary,
            |gateway| self.state.registry.contains(gateway),
            |gateway| {
                let rewritten = llmgate_transform::rewrite_for_gateway(gateway, original_model);
                self.state.catalog.gateway_has_model(gateway, original_model)
                    || self.state.catalog.gateway_has_model(gateway, &rewritten)
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    async fn buffered_chat(
        &self,
        auth: &AuthedUser,
        req: ChatCompletionRequest,
        ctx: RequestContext,
        candidates: Vec<String>,
        original_model: String,
        prompt_estimate: u64,
        started: Instant,
    ) -> Result<ChatOutcome, GatewayError> {
        let registry = self.state.registry.clone();
        let outcome = run_with_failover(&candidates, |gateway| {
            let registry = registry.clone();
            let mut upstream_req = req.clone();
            upstream_req.model =
                llmgate_transform::rewrite_for_gateway(&gateway, &original_model);
            upstream_req.gateway = None;
            async move {
                let provider = registry.get(&gateway).ok_or_else(|| {
                    llmgate_provider_core::UpstreamError::decode(&gateway, "provider not registered")
                })?;
                provider.chat(&upstream_req).await
            }
        })
        .await?;

        let mut response = outcome.value;
        let gateway = outcome.gateway;

        // Usage from the upstream when it reports it, reconstructed from
        // content otherwise.
        let usage = response.usage.unwrap_or_else(|| {
            Usage::new(
                prompt_estimate,
                tokenizer::estimate_tokens(&original_model, &response.completion_text()),
            )
        });

        let cost = self
            .state
            .pricing
            .cost(&original_model, Some(&gateway), usage.prompt_tokens, usage.completion_tokens);
        let balance_after = self
            .state
            .ledger
            .debit(
                auth.user_id,
                cost,
                LedgerEntry {
                    model: Some(original_model.clone()),
                    prompt_tokens: usage.prompt_tokens as i64,
                    completion_tokens: usage.completion_tokens as i64,
                    reason: "chat_completion".to_string(),
                },
            )
            .await?;

        self.state
            .limiter
            .record(auth.user_id, auth.key_id, &original_model, usage.total_tokens);

        let latency_ms = started.elapsed().as_millis() as u64;
        let finish_reason = response
            .choices
            .iter()
            .find_map(|c| c.finish_reason.clone());
        self.state.activity.log(NewActivityEvent {
            user_id: auth.user_id,
            at: OffsetDateTime::now_utc(),
            model: original_model.clone(),
            provider: gateway.clone(),
            prompt_tokens: usage.prompt_tokens as i64,
            completion_tokens: usage.completion_tokens as i64,
            total_tokens: usage.total_tokens as i64,
            cost_usd: cost,
            latency_ms: latency_ms as i64,
            finish_reason,
            endpoint: ctx.endpoint.clone(),
            session_id: ctx.session_id.clone(),
            metadata: Some(serde_json::json!({
                "trace_id": ctx.trace_id,
                "attempts": outcome.attempts,
            })),
        });

        // The caller sees their own model string back, plus accounting.
        response.model = original_model;
        response.usage = Some(usage);
        response.gateway_usage = Some(GatewayUsage {
            cost_usd: cost,
            user_balance_after: balance_after,
            latency_ms,
        });
        response
            .extra
            .insert("source_gateway".to_string(), serde_json::Value::String(gateway));

        Ok(ChatOutcome::Buffered(Box::new(response)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_chat(
        &self,
        auth: &AuthedUser,
        req: ChatCompletionRequest,
        ctx: RequestContext,
        candidates: Vec<String>,
        original_model: String,
        prompt_estimate: u64,
        started: Instant,
    ) -> Result<ChatOutcome, GatewayError> {
        let registry = self.state.registry.clone();
        // Handshake failures are retried across the chain; once a stream
        // is open, errors travel in-band.
        let outcome = run_with_failover(&candidates, |gateway| {
            let registry = registry.clone();
            let mut upstream_req = req.clone();
            upstream_req.model =
                llmgate_transform::rewrite_for_gateway(&gateway, &original_model);
            upstream_req.gateway = None;
            async move {
                let provider = registry.get(&gateway).ok_or_else(|| {
                    llmgate_provider_core::UpstreamError::decode(&gateway, "provider not registered")
                })?;
                provider.chat_stream(&upstream_req).await
            }
        })
        .await?;

        let frames = stream::spawn_stream_pipeline(stream::StreamPipeline {
            state: self.state.clone(),
            upstream: outcome.value,
            gateway: outcome.gateway,
            attempts: outcome.attempts,
            user_id: auth.user_id,
            key_id: auth.key_id,
            model: original_model,
            prompt_estimate,
            ctx,
            started,
        });
        Ok(ChatOutcome::Stream(frames))
    }

    /// Catalog listing for one gateway (fetching on a cold cache) or the
    /// `all` aggregation (cached lists only).
    pub async fn models(&self, gateway: &str) -> Result<Vec<ModelRecord>, GatewayError> {
        if gateway == gateways::AGGREGATE {
            return Ok(self.state.catalog.aggregate_all());
        }
        Ok(self.state.catalog.get(gateway).await?)
    }

    /// Single-record lookup for the model-path endpoint.
    pub async fn find_model(&self, gateway: &str, model: &str) -> Result<ModelRecord, GatewayError> {
        let records = self.models(gateway).await?;
        records
            .into_iter()
            .find(|r| r.id == model)
            .ok_or_else(|| GatewayError::NotFound(format!("model {model} not found in {gateway}")))
    }

    /// Admin contract: drop one gateway's cache, or all of them.
    pub fn clear_catalog(&self, gateway: Option<&str>) {
        match gateway {
            Some(name) => self.state.catalog.clear(name),
            None => self.state.catalog.clear_all(),
        }
    }
}
