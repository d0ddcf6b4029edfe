//! Templated adapter for upstreams exposing an OpenAI-compatible surface.
//! One implementation parameterized by endpoint config serves openrouter,
//! portkey, featherless, groq, fireworks, together, deepinfra, chutes,
//! cerebras, nebius, xai, and novita.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use llmgate_protocol::openai::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, StreamOptions,
};
use llmgate_protocol::sse::SseParser;
use llmgate_provider_core::{
    ChatProvider, ChatStream, Headers, HttpBody, HttpMethod, UpstreamClient, UpstreamError,
    UpstreamHttpRequest, UpstreamHttpResponse, header_set,
};

/// How the endpoint expects its API key.
#[derive(Debug, Clone)]
pub enum AuthStyle {
    Bearer,
    Header(&'static str),
}

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Gateway name served by this endpoint.
    pub name: String,
    /// Base URL up to and including the version segment, no trailing slash.
    pub base_url: String,
    pub api_key: String,
    pub auth: AuthStyle,
    pub extra_headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl EndpointConfig {
    fn apply_auth(&self, headers: &mut Headers) {
        match &self.auth {
            AuthStyle::Bearer => {
                header_set(headers, "authorization", &format!("Bearer {}", self.api_key));
            }
            AuthStyle::Header(name) => header_set(headers, name, &self.api_key),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

pub struct OpenAiCompatProvider {
    config: EndpointConfig,
    client: Arc<dyn UpstreamClient>,
}

impl OpenAiCompatProvider {
    pub fn new(config: EndpointConfig, client: Arc<dyn UpstreamClient>) -> Self {
        Self { config, client }
    }

    fn base_headers(&self, json_body: bool) -> Headers {
        let mut headers = Headers::new();
        self.config.apply_auth(&mut headers);
        header_set(&mut headers, "accept", "application/json");
        if json_body {
            header_set(&mut headers, "content-type", "application/json");
        }
        for (name, value) in &self.config.extra_headers {
            header_set(&mut headers, name, value);
        }
        headers
    }

    fn chat_request(
        &self,
        req: &ChatCompletionRequest,
        stream: bool,
    ) -> Result<UpstreamHttpRequest, UpstreamError> {
        let mut body = req.clone();
        body.gateway = None;
        body.stream = Some(stream);
        if stream {
            // Ask compatible upstreams to close the stream with a usage
            // frame; accounting falls back to estimation when they don't.
            body.stream_options = Some(StreamOptions { include_usage: Some(true) });
        }
        let payload = serde_json::to_vec(&body)
            .map_err(|err| UpstreamError::decode(&self.config.name, err.to_string()))?;
        Ok(UpstreamHttpRequest {
            method: HttpMethod::Post,
            url: self.config.url("/chat/completions"),
            headers: self.base_headers(true),
            body: Some(Bytes::from(payload)),
            is_stream: stream,
            timeout: Some(self.config.timeout),
        })
    }

    async fn send(&self, req: UpstreamHttpRequest) -> Result<UpstreamHttpResponse, UpstreamError> {
        self.client.send(req).await.map_err(|err| {
            UpstreamError::from_transport(&self.config.name, err.kind, err.message)
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn list_models(&self) -> Vec<serde_json::Value> {
        let req = UpstreamHttpRequest {
            method: HttpMethod::Get,
            url: self.config.url("/models"),
            headers: self.base_headers(false),
            body: None,
            is_stream: false,
            timeout: Some(self.config.timeout),
        };
        let resp = match self.send(req).await {
            Ok(resp) => resp,
            Err(err) => {
                tracing::warn!(provider = %self.config.name, error = %err, "model listing failed");
                return Vec::new();
            }
        };
        let HttpBody::Bytes(body) = resp.body else {
            return Vec::new();
        };
        if !(200..300).contains(&resp.status) {
            tracing::warn!(
                provider = %self.config.name,
                status = resp.status,
                "model listing returned an error status"
            );
            return Vec::new();
        }
        parse_model_list(&body).unwrap_or_else(|| {
            tracing::warn!(provider = %self.config.name, "model listing body was not decodable");
            Vec::new()
        })
    }

    async fn chat(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, UpstreamError> {
        let upstream = self.chat_request(req, false)?;
        let resp = self.send(upstream).await?;
        let HttpBody::Bytes(body) = resp.body else {
            return Err(UpstreamError::decode(&self.config.name, "expected buffered body"));
        };
        if !(200..300).contains(&resp.status) {
            return Err(UpstreamError::from_status(
                &self.config.name,
                resp.status,
                &resp.headers,
                &body,
            ));
        }
        serde_json::from_slice(&body)
            .map_err(|err| UpstreamError::decode(&self.config.name, err.to_string()))
    }

    async fn chat_stream(&self, req: &ChatCompletionRequest) -> Result<ChatStream, UpstreamError> {
        let upstream = self.chat_request(req, true)?;
        let resp = self.send(upstream).await?;
        match resp.body {
            HttpBody::Bytes(body) => {
                // Non-2xx handshakes come back buffered; classify them so
                // failover can run before any byte reaches the client.
                Err(UpstreamError::from_status(
                    &self.config.name,
                    resp.status,
                    &resp.headers,
                    &body,
                ))
            }
            HttpBody::Stream(upstream_rx) => {
                Ok(spawn_sse_decoder(self.config.name.clone(), upstream_rx))
            }
        }
    }
}

/// Decode an upstream SSE byte stream into chat-completion chunks on a
/// background task. Shared by every OpenAI-compatible adapter.
pub(crate) fn spawn_sse_decoder(
    provider: String,
    mut upstream_rx: tokio::sync::mpsc::Receiver<Bytes>,
) -> ChatStream {
    let (tx, rx) = tokio::sync::mpsc::channel(32);
    tokio::spawn(async move {
        let mut parser = SseParser::new();
        let mut saw_finish = false;
        let mut done = false;
        while let Some(chunk) = upstream_rx.recv().await {
            for event in parser.push_bytes(&chunk) {
                if event.is_done() {
                    done = true;
                    continue;
                }
                match serde_json::from_str::<ChatCompletionChunk>(&event.data) {
                    Ok(frame) => {
                        saw_finish |= frame.finish_reason().is_some();
                        if tx.send(Ok(frame)).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(%provider, error = %err, "skipping undecodable frame");
                    }
                }
            }
            if done {
                break;
            }
        }
        for event in parser.finish() {
            if event.is_done() {
                done = true;
                continue;
            }
            if let Ok(frame) = serde_json::from_str::<ChatCompletionChunk>(&event.data) {
                saw_finish |= frame.finish_reason().is_some();
                if tx.send(Ok(frame)).await.is_err() {
                    return;
                }
            }
        }
        if !done && !saw_finish {
            let _ = tx.send(Err(UpstreamError::stream_interrupted(&provider))).await;
        }
    });
    rx
}

fn parse_model_list(body: &[u8]) -> Option<Vec<serde_json::Value>> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    match value {
        serde_json::Value::Array(items) => Some(items),
        serde_json::Value::Object(mut map) => match map.remove("data") {
            Some(serde_json::Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let config = EndpointConfig {
            name: "groq".into(),
            base_url: "https://api.groq.com/openai/v1/".into(),
            api_key: "k".into(),
            auth: AuthStyle::Bearer,
            extra_headers: Vec::new(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(config.url("/chat/completions"), "https://api.groq.com/openai/v1/chat/completions");
    }

    #[test]
    fn model_list_accepts_both_shapes() {
        let wrapped = br#"{"object":"list","data":[{"id":"a"},{"id":"b"}]}"#;
        assert_eq!(parse_model_list(wrapped).unwrap().len(), 2);
        let bare = br#"[{"id":"a"}]"#;
        assert_eq!(parse_model_list(bare).unwrap().len(), 1);
        assert!(parse_model_list(b"3").is_none());
    }

    #[tokio::test]
    async fn sse_decoder_forwards_frames_and_stops_at_done() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(8);
        tx.send(Bytes::from_static(
            b"data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\n",
        ))
        .await
        .unwrap();
        tx.send(Bytes::from_static(
            b"data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n",
        ))
        .await
        .unwrap();
        drop(tx);

        let mut stream = spawn_sse_decoder("groq".into(), rx);
        let first = stream.recv().await.unwrap().unwrap();
        assert_eq!(first.delta_content(), Some("hi"));
        let second = stream.recv().await.unwrap().unwrap();
        assert_eq!(second.finish_reason(), Some("stop"));
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn sse_decoder_flags_truncated_streams() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(8);
        tx.send(Bytes::from_static(
            b"data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"partial\"}}]}\n\n",
        ))
        .await
        .unwrap();
        drop(tx);

        let mut stream = spawn_sse_decoder("groq".into(), rx);
        assert!(stream.recv().await.unwrap().is_ok());
        assert!(stream.recv().await.unwrap().is_err());
    }
}
