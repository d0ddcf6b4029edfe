//! Alibaba Cloud DashScope adapter. DashScope speaks its own
//! text-generation protocol (`input`/`parameters`/`output` envelopes), so
//! requests and responses are mapped to the OpenAI shapes here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use llmgate_protocol::openai::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatChoice, ChatMessage,
    ChunkChoice, ChunkDelta, MessageContent, Usage,
};
use llmgate_protocol::sse::SseParser;
use llmgate_provider_core::{
    ChatProvider, ChatStream, Headers, HttpBody, HttpMethod, UpstreamClient, UpstreamError,
    UpstreamHttpRequest, header_set,
};

const GENERATION_URL: &str =
    "https://dashscope-intl.aliyuncs.com/api/v1/services/aigc/text-generation/generation";
const PROVIDER: &str = "alibaba-cloud";

/// Models DashScope serves but does not list over HTTP. Kept raw so the
/// catalog's normalization pipeline treats them like any upstream record.
const KNOWN_MODELS: &[(&str, u64)] = &[
    ("qwen-max", 32_768),
    ("qwen-plus", 131_072),
    ("qwen-turbo", 1_008_192),
    ("qwen-long", 10_000_000),
    ("qwen2.5-72b-instruct", 131_072),
    ("qwen2.5-32b-instruct", 131_072),
    ("qwen2.5-coder-32b-instruct", 131_072),
];

pub struct DashScopeProvider {
    api_key: String,
    client: Arc<dyn UpstreamClient>,
    timeout: Duration,
}

impl DashScopeProvider {
    pub fn new(api_key: String, client: Arc<dyn UpstreamClient>, timeout: Duration) -> Self {
        Self { api_key, client, timeout }
    }

    fn headers(&self, stream: bool) -> Headers {
        let mut headers = Headers::new();
        header_set(&mut headers, "authorization", &format!("Bearer {}", self.api_key));
        header_set(&mut headers, "content-type", "application/json");
        if stream {
            header_set(&mut headers, "x-dashscope-sse", "enable");
        }
        headers
    }

    fn build_body(req: &ChatCompletionRequest, stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = req
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": m.role,
                    "content": m.content.as_ref().map(|c| c.flat_text()).unwrap_or_default(),
                })
            })
            .collect();

        let mut parameters = serde_json::Map::new();
        parameters.insert("result_format".into(), json!("message"));
        if stream {
            parameters.insert("incremental_output".into(), json!(true));
        }
        if let Some(t) = req.temperature {
            parameters.insert("temperature".into(), json!(t));
        }
        if let Some(p) = req.top_p {
            parameters.insert("top_p".into(), json!(p));
        }
        if let Some(m) = req.max_tokens {
            parameters.insert("max_tokens".into(), json!(m));
        }

        json!({
            "model": req.model,
            "input": { "messages": messages },
            "parameters": parameters,
        })
    }

    async fn post(
        &self,
        req: &ChatCompletionRequest,
        stream: bool,
    ) -> Result<llmgate_provider_core::UpstreamHttpResponse, UpstreamError> {
        let body = serde_json::to_vec(&Self::build_body(req, stream))
            .map_err(|err| UpstreamError::decode(PROVIDER, err.to_string()))?;
        let upstream = UpstreamHttpRequest {
            method: HttpMethod::Post,
            url: GENERATION_URL.to_string(),
            headers: self.headers(stream),
            body: Some(Bytes::from(body)),
            is_stream: stream,
            timeout: Some(self.timeout),
        };
        self.client
            .send(upstream)
            .await
            .map_err(|err| UpstreamError::from_transport(PROVIDER, err.kind, err.message))
    }
}

#[derive(Debug, Deserialize)]
struct DashScopeResponse {
    output: DashScopeOutput,
    #[serde(default)]
    usage: Option<DashScopeUsage>,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DashScopeOutput {
    #[serde(default)]
    choices: Vec<DashScopeChoice>,
}

#[derive(Debug, Deserialize)]
struct DashScopeChoice {
    message: DashScopeMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DashScopeMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct DashScopeUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
}

impl DashScopeUsage {
    fn into_usage(self) -> Usage {
        Usage {
            prompt_tokens: self.input_tokens,
            completion_tokens: self.output_tokens,
            total_tokens: self
                .total_tokens
                .unwrap_or(self.input_tokens + self.output_tokens),
        }
    }
}

/// `finish_reason` is the string "null" on DashScope's non-final frames.
fn map_finish_reason(reason: Option<&str>) -> Option<String> {
    match reason {
        None | Some("null") | Some("") => None,
        Some(other) => Some(other.to_string()),
    }
}

fn to_openai_response(raw: DashScopeResponse, model: &str) -> ChatCompletionResponse {
    let choices = raw
        .output
        .choices
        .into_iter()
        .enumerate()
        .map(|(index, choice)| ChatChoice {
            index: index as u32,
            message: ChatMessage {
                role: choice.message.role.unwrap_or_else(|| "assistant".into()),
                content: Some(MessageContent::Text(choice.message.content)),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            },
            finish_reason: map_finish_reason(choice.finish_reason.as_deref()),
        })
        .collect();
    ChatCompletionResponse {
        id: raw
            .request_id
            .unwrap_or_else(|| format!("chatcmpl-{}", uuid::Uuid::new_v4())),
        object: "chat.completion".into(),
        created: time::OffsetDateTime::now_utc().unix_timestamp(),
        model: model.to_string(),
        choices,
        usage: raw.usage.map(DashScopeUsage::into_usage),
        gateway_usage: None,
        extra: Default::default(),
    }
}

fn to_openai_chunk(raw: DashScopeResponse, model: &str) -> ChatCompletionChunk {
    let choices = raw
        .output
        .choices
        .into_iter()
        .enumerate()
        .map(|(index, choice)| ChunkChoice {
            index: index as u32,
            delta: ChunkDelta {
                role: None,
                content: Some(choice.message.content),
                tool_calls: None,
            },
            finish_reason: map_finish_reason(choice.finish_reason.as_deref()),
        })
        .collect();
    ChatCompletionChunk {
        id: raw.request_id.unwrap_or_default(),
        object: "chat.completion.chunk".into(),
        created: time::OffsetDateTime::now_utc().unix_timestamp(),
        model: model.to_string(),
        choices,
        usage: raw.usage.map(DashScopeUsage::into_usage),
        extra: Default::default(),
    }
}

#[async_trait]
impl ChatProvider for DashScopeProvider {
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
                    "owned_by": "alibaba",
                })
            })
            .collect()
    }

    async fn chat(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, UpstreamError> {
        let resp = self.post(req, false).await?;
        let HttpBody::Bytes(body) = resp.body else {
            return Err(UpstreamError::decode(PROVIDER, "expected buffered body"));
        };
        if !(200..300).contains(&resp.status) {
            return Err(UpstreamError::from_status(PROVIDER, resp.status, &resp.headers, &body));
        }
        let raw: DashScopeResponse = serde_json::from_slice(&body)
            .map_err(|err| UpstreamError::decode(PROVIDER, err.to_string()))?;
        Ok(to_openai_response(raw, &req.model))
    }

    async fn chat_stream(&self, req: &ChatCompletionRequest) -> Result<ChatStream, UpstreamError> {
        let resp = self.post(req, true).await?;
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
                            let Ok(raw) = serde_json::from_str::<DashScopeResponse>(&event.data)
                            else {
                                continue;
                            };
                            let frame = to_openai_chunk(raw, &model);
                            finished |= frame.finish_reason().is_some();
                            if tx.send(Ok(frame)).await.is_err() {
                                return;
                            }
                        }
                        if finished {
                            break;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_uses_message_result_format() {
        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "qwen-max",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.5
        }))
        .unwrap();
        let body = DashScopeProvider::build_body(&req, true);
        assert_eq!(body["model"], "qwen-max");
        assert_eq!(body["input"]["messages"][0]["content"], "hi");
        assert_eq!(body["parameters"]["result_format"], "message");
        assert_eq!(body["parameters"]["incremental_output"], true);
        assert_eq!(body["parameters"]["temperature"], 0.5);
    }

    #[test]
    fn response_mapping_carries_usage() {
        let raw: DashScopeResponse = serde_json::from_value(json!({
            "output": {"choices": [{"message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}]},
            "usage": {"input_tokens": 10, "output_tokens": 4},
            "request_id": "r-1"
        }))
        .unwrap();
        let resp = to_openai_response(raw, "qwen-max");
        assert_eq!(resp.id, "r-1");
        assert_eq!(resp.completion_text(), "hello");
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, 14);
    }

    #[test]
    fn null_finish_reason_is_suppressed() {
        assert_eq!(map_finish_reason(Some("null")), None);
        assert_eq!(map_finish_reason(Some("stop")).as_deref(), Some("stop"));
    }
}
