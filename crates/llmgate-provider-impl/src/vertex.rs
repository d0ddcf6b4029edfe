//! Google Vertex AI adapter. Authenticates with a service-account JWT
//! exchanged for a short-lived access token, and maps between the OpenAI
//! chat shapes and Gemini `generateContent` envelopes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use llmgate_protocol::openai::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatChoice, ChatMessage,
    ChunkChoice, ChunkDelta, MessageContent, Usage,
};
use llmgate_protocol::sse::SseParser;
use llmgate_provider_core::{
    ChatProvider, ChatStream, Headers, HttpBody, HttpMethod, UpstreamClient, UpstreamError,
    UpstreamHttpRequest, header_set,
};

const PROVIDER: &str = "google-vertex";
const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const TOKEN_SLACK: Duration = Duration::from_secs(60);

/// Vertex has no flat public listing endpoint for publisher models.
const KNOWN_MODELS: &[(&str, u64)] = &[
    ("gemini-2.0-flash", 1_048_576),
    ("gemini-2.0-flash-lite", 1_048_576),
    ("gemini-1.5-pro", 2_097_152),
    ("gemini-1.5-flash", 1_048_576),
];

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    /// Accepts the raw JSON document or its base64 encoding, which is how
    /// the credential usually travels through environment variables.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            return serde_json::from_str(trimmed);
        }
        match base64::engine::general_purpose::STANDARD.decode(trimmed) {
            Ok(decoded) => serde_json::from_slice(&decoded),
            Err(_) => serde_json::from_str(trimmed),
        }
    }
}

#[derive(Debug, Serialize)]
struct JwtClaims {
    iss: String,
    sub: String,
    aud: String,
    scope: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    expires_at: std::time::Instant,
}

pub struct VertexProvider {
    key: ServiceAccountKey,
    project_id: String,
    location: String,
    client: Arc<dyn UpstreamClient>,
    timeout: Duration,
    token: Mutex<Option<CachedToken>>,
}

impl VertexProvider {
    pub fn new(
        key: ServiceAccountKey,
        project_id: String,
        location: String,
        client: Arc<dyn UpstreamClient>,
        timeout: Duration,
    ) -> Self {
        Self {
            key,
            project_id,
            location,
            client,
            timeout,
            token: Mutex::new(None),
        }
    }

    fn model_url(&self, model: &str, action: &str) -> String {
        format!(
            "https://{loc}-aiplatform.googleapis.com/v1/projects/{project}/locations/{loc}/publishers/google/models/{model}:{action}",
            loc = self.location,
            project = self.project_id,
        )
    }

    async fn access_token(&self) -> Result<String, UpstreamError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref()
            && cached.expires_at > std::time::Instant::now() + TOKEN_SLACK
        {
            return Ok(cached.value.clone());
        }

        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let token_uri = self.key.token_uri.as_deref().unwrap_or(TOKEN_URI);
        let claims = JwtClaims {
            iss: self.key.client_email.clone(),
            sub: self.key.client_email.clone(),
            aud: token_uri.to_string(),
            scope: SCOPE.to_string(),
            iat: now,
            exp: now + 3600,
        };
        let header = Header { alg: Algorithm::RS256, ..Header::default() };
        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|err| UpstreamError::decode(PROVIDER, format!("bad service account key: {err}")))?;
        let jwt = jsonwebtoken::encode(&header, &claims, &encoding_key)
            .map_err(|err| UpstreamError::decode(PROVIDER, err.to_string()))?;

        let mut headers = Headers::new();
        header_set(&mut headers, "content-type", "application/x-www-form-urlencoded");
        // The assertion is base64url, so no percent-escaping is needed.
        let form = format!(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer&assertion={jwt}"
        );
        let resp = self
            .client
            .send(UpstreamHttpRequest {
                method: HttpMethod::Post,
                url: token_uri.to_string(),
                headers,
                body: Some(Bytes::from(form)),
                is_stream: false,
                timeout: Some(self.timeout),
            })
            .await
            .map_err(|err| UpstreamError::from_transport(PROVIDER, err.kind, err.message))?;
        let HttpBody::Bytes(body) = resp.body else {
            return Err(UpstreamError::decode(PROVIDER, "expected buffered token response"));
        };
        if !(200..300).contains(&resp.status) {
            return Err(UpstreamError::from_status(PROVIDER, resp.status, &resp.headers, &body));
        }
        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|err| UpstreamError::decode(PROVIDER, err.to_string()))?;
        let ttl = Duration::from_secs(token.expires_in.unwrap_or(3600));
        *guard = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: std::time::Instant::now() + ttl,
        });
        Ok(token.access_token)
    }

    async fn post_model(
        &self,
        model: &str,
        action: &str,
        body: serde_json::Value,
        stream: bool,
    ) -> Result<llmgate_provider_core::UpstreamHttpResponse, UpstreamError> {
        let token = self.access_token().await?;
        let mut headers = Headers::new();
        header_set(&mut headers, "authorization", &format!("Bearer {token}"));
        header_set(&mut headers, "content-type", "application/json");
        let mut url = self.model_url(model, action);
        if stream {
            url.push_str("?alt=sse");
        }
        let payload = serde_json::to_vec(&body)
            .map_err(|err| UpstreamError::decode(PROVIDER, err.to_string()))?;
        self.client
            .send(UpstreamHttpRequest {
                method: HttpMethod::Post,
                url,
                headers,
                body: Some(Bytes::from(payload)),
                is_stream: stream,
                timeout: Some(self.timeout),
            })
            .await
            .map_err(|err| UpstreamError::from_transport(PROVIDER, err.kind, err.message))
    }
}

fn build_gemini_body(req: &ChatCompletionRequest) -> serde_json::Value {
    let mut contents = Vec::new();
    let mut system_parts = Vec::new();
    for message in &req.messages {
        let text = message
            .content
            .as_ref()
            .map(|c| c.flat_text())
            .unwrap_or_default();
        match message.role.as_str() {
            "system" | "developer" => system_parts.push(json!({ "text": text })),
            "assistant" => contents.push(json!({ "role": "model", "parts": [{ "text": text }] })),
            _ => contents.push(json!({ "role": "user", "parts": [{ "text": text }] })),
        }
    }

    let mut generation_config = serde_json::Map::new();
    if let Some(t) = req.temperature {
        generation_config.insert("temperature".into(), json!(t));
    }
    if let Some(p) = req.top_p {
        generation_config.insert("topP".into(), json!(p));
    }
    if let Some(m) = req.max_tokens {
        generation_config.insert("maxOutputTokens".into(), json!(m));
    }

    let mut body = serde_json::Map::new();
    body.insert("contents".into(), json!(contents));
    if !system_parts.is_empty() {
        body.insert("systemInstruction".into(), json!({ "parts": system_parts }));
    }
    if !generation_config.is_empty() {
        body.insert("generationConfig".into(), json!(generation_config));
    }
    serde_json::Value::Object(body)
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(default, rename = "promptTokenCount")]
    prompt_token_count: u64,
    #[serde(default, rename = "candidatesTokenCount")]
    candidates_token_count: u64,
    #[serde(default, rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

impl GeminiUsage {
    fn into_usage(self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_token_count,
            completion_tokens: self.candidates_token_count,
            total_tokens: self
                .total_token_count
                .unwrap_or(self.prompt_token_count + self.candidates_token_count),
        }
    }
}

fn candidate_text(candidate: &GeminiCandidate) -> String {
    candidate
        .content
        .as_ref()
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn map_finish_reason(reason: Option<&str>) -> Option<String> {
    match reason {
        None => None,
        Some("STOP") => Some("stop".into()),
        Some("MAX_TOKENS") => Some("length".into()),
        Some("SAFETY") | Some("RECITATION") | Some("PROHIBITED_CONTENT") => {
            Some("content_filter".into())
        }
        Some(other) => Some(other.to_ascii_lowercase()),
    }
}

fn to_openai_response(raw: GeminiResponse, model: &str) -> ChatCompletionResponse {
    let choices = raw
        .candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| ChatChoice {
            index: index as u32,
            message: ChatMessage {
                role: "assistant".into(),
                content: Some(MessageContent::Text(candidate_text(candidate))),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            },
            finish_reason: map_finish_reason(candidate.finish_reason.as_deref()),
        })
        .collect();
    ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        object: "chat.completion".into(),
        created: time::OffsetDateTime::now_utc().unix_timestamp(),
        model: model.to_string(),
        choices,
        usage: raw.usage_metadata.map(GeminiUsage::into_usage),
        gateway_usage: None,
        extra: Default::default(),
    }
}

fn to_openai_chunk(raw: GeminiResponse, model: &str) -> ChatCompletionChunk {
    let choices = raw
        .candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| ChunkChoice {
            index: index as u32,
            delta: ChunkDelta {
                role: None,
                content: Some(candidate_text(candidate)),
                tool_calls: None,
            },
            finish_reason: map_finish_reason(candidate.finish_reason.as_deref()),
        })
        .collect();
    ChatCompletionChunk {
        id: String::new(),
        object: "chat.completion.chunk".into(),
        created: time::OffsetDateTime::now_utc().unix_timestamp(),
        model: model.to_string(),
        choices,
        usage: raw.usage_metadata.map(GeminiUsage::into_usage),
        extra: Default::default(),
    }
}

#[async_trait]
impl ChatProvider for VertexProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn list_models(&self) -> Vec<serde_json::Value> {
        KNOWN_MODELS
            .iter()
            .map(|(id, context_length)| {
                json!({
                    "id": id,
                    "name": id,
                    "context_length": context_length,
                    "owned_by": "google",
                })
            })
            .collect()
    }

    async fn chat(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, UpstreamError> {
        let resp = self
            .post_model(&req.model, "generateContent", build_gemini_body(req), false)
            .await?;
        let HttpBody::Bytes(body) = resp.body else {
            return Err(UpstreamError::decode(PROVIDER, "expected buffered body"));
        };
        if !(200..300).contains(&resp.status) {
            return Err(UpstreamError::from_status(PROVIDER, resp.status, &resp.headers, &body));
        }
        let raw: GeminiResponse = serde_json::from_slice(&body)
            .map_err(|err| UpstreamError::decode(PROVIDER, err.to_string()))?;
        Ok(to_openai_response(raw, &req.model))
    }

    async fn chat_stream(&self, req: &ChatCompletionRequest) -> Result<ChatStream, UpstreamError> {
        let resp = self
            .post_model(&req.model, "streamGenerateContent", build_gemini_body(req), true)
            .await?;
        match resp.body {
            HttpBody::Bytes(body) => Err(UpstreamError::from_status(
                PROVIDER,
                resp.status,
                &resp.headers,
                &body,
            )),
            HttpBody::Stream(mut upstream_rx) => {
                let model = req.model.clone();
                let (tx, rx) = tokio::sync::mpsc::channel(32);
                tokio::spawn(async move {
                    let mut parser = SseParser::new();
                    let mut finished = false;
                    while let Some(chunk) = upstream_rx.recv().await {
                        for event in parser.push_bytes(&chunk) {
                            let Ok(raw) = serde_json::from_str::<GeminiResponse>(&event.data)
                            else {
                                continue;
                            };
                            let frame = to_openai_chunk(raw, &model);
                            finished |= frame.finish_reason().is_some();
                            if tx.send(Ok(frame)).await.is_err() {
                                return;
                            }
                        }
                    }
                    if !finished {
                        let _ = tx.send(Err(UpstreamError::stream_interrupted(PROVIDER))).await;
                    }
                });
                Ok(rx)
            }
        }
    }
}
