//! OpenAI-compatible HTTP surface: chat completions (buffered and SSE),
//! the catalog endpoints, and health probes.

mod chat;
mod models;

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};

use llmgate_core::{GatewayEngine, GatewayError};

#[derive(Clone)]
pub struct GatewayState {
    pub engine: Arc<GatewayEngine>,
}

pub fn gateway_router(engine: Arc<GatewayEngine>) -> Router {
    let state = GatewayState { engine };
    Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        // Alias surface with identical semantics.
        .route("/v1/responses", post(chat::responses))
        .route("/v1/models", get(models::models_list))
        .route("/catalog/model/{gateway}/{*model}", get(models::model_get))
        .route("/health", get(health))
        .route("/ping", get(ping))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

async fn ping() -> &'static str {
    "pong"
}

/// Wrapper mapping [`GatewayError`] onto HTTP, with the standard
/// `{error:{message,type,code}}` body and `Retry-After` where applicable.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, axum::Json(self.0.body())).into_response();
        if let Some(retry_after) = self.0.retry_after()
            && let Ok(value) = retry_after.to_string().parse()
        {
            response.headers_mut().insert("retry-after", value);
        }
        response
    }
}
