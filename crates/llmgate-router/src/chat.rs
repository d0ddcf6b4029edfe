use std::convert::Infallible;

use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use llmgate_core::engine::{ChatOutcome, RequestContext};
use llmgate_core::error::GatewayError;
use llmgate_protocol::openai::ChatCompletionRequest;

use crate::{ApiError, GatewayState};

#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    pub session_id: Option<String>,
}

pub async fn chat_completions(
    state: State<GatewayState>,
    query: Query<ChatQuery>,
    headers: HeaderMap,
    body: Json<ChatCompletionRequest>,
) -> Response {
    handle_chat(state, query, headers, body, "/v1/chat/completions").await
}

/// `/v1/responses` is an alias: same request and response envelope.
pub async fn responses(
    state: State<GatewayState>,
    query: Query<ChatQuery>,
    headers: HeaderMap,
    body: Json<ChatCompletionRequest>,
) -> Response {
    handle_chat(state, query, headers, body, "/v1/responses").await
}

async fn handle_chat(
    State(state): State<GatewayState>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
    endpoint: &str,
) -> Response {
    let trace_id = llmgate_common::new_trace_id();

    let auth = match bearer_token(&headers) {
        Some(token) => match state.engine.authenticate(&token).await {
            Ok(auth) => auth,
            Err(err) => return ApiError(err).into_response(),
        },
        None => {
            return ApiError(GatewayError::Auth("missing bearer token".to_string()))
                .into_response();
        }
    };

    let ctx = RequestContext {
        endpoint: endpoint.to_string(),
        session_id: query.session_id,
        trace_id: trace_id.clone(),
    };

    match state.engine.chat_completion(&auth, request, ctx).await {
        Ok(ChatOutcome::Buffered(response)) => Json(*response).into_response(),
        Ok(ChatOutcome::Stream(frames)) => sse_response(frames),
        Err(err) => {
            tracing::debug!(%trace_id, error = %err, "chat completion rejected");
            ApiError(err).into_response()
        }
    }
}

fn sse_response(frames: llmgate_core::engine::SseFrames) -> Response {
    let stream = ReceiverStream::new(frames).map(Ok::<_, Infallible>);
    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, header::HeaderValue::from_static("keep-alive"));
    response
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let prefix = "Bearer ";
    if value.len() > prefix.len() && value[..prefix.len()].eq_ignore_ascii_case(prefix) {
        let token = value[prefix.len()..].trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer sk-live-1".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("sk-live-1"));

        headers.insert(header::AUTHORIZATION, "bearer sk-live-2".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("sk-live-2"));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer   ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
