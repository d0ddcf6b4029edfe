//! The provider capability set: every upstream adapter, templated or
//! bespoke, exposes the same three operations and is dispatched as a
//! trait object through the registry.

use async_trait::async_trait;

use llmgate_protocol::openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};

use crate::errors::UpstreamError;

/// Ordered header list. Order is preserved on the wire; lookups are
/// case-insensitive.
pub type Headers = Vec<(String, String)>;

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn header_set(headers: &mut Headers, name: &str, value: &str) {
    for (n, v) in headers.iter_mut() {
        if n.eq_ignore_ascii_case(name) {
            *v = value.to_string();
            return;
        }
    }
    headers.push((name.to_string(), value.to_string()));
}

/// Ordered stream of delta frames from one upstream attempt. The final
/// frame carries `finish_reason` and, when the upstream supplies it,
/// `usage`; otherwise the orchestrator reconstructs usage from counted
/// deltas.
pub type ChatStream = tokio::sync::mpsc::Receiver<Result<ChatCompletionChunk, UpstreamError>>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Gateway name this provider serves (`groq`, `google-vertex`, …).
    fn name(&self) -> &str;

    /// Best-effort unfiltered model listing. Transient failure yields an
    /// empty list and a logged warning; this never errors.
    async fn list_models(&self) -> Vec<serde_json::Value>;

    /// Buffered chat completion. The request's `model` is already in the
    /// upstream's canonical form.
    async fn chat(&self, req: &ChatCompletionRequest)
    -> Result<ChatCompletionResponse, UpstreamError>;

    /// Streaming chat completion. Fails before the first frame for
    /// handshake errors; later failures arrive in-band on the stream.
    async fn chat_stream(&self, req: &ChatCompletionRequest) -> Result<ChatStream, UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = Headers::new();
        header_set(&mut headers, "Retry-After", "3");
        assert_eq!(header_get(&headers, "retry-after"), Some("3"));
        header_set(&mut headers, "retry-after", "5");
        assert_eq!(headers.len(), 1);
        assert_eq!(header_get(&headers, "RETRY-AFTER"), Some("5"));
    }
}
