//! HuggingFace Inference Router. OpenAI-compatible on the wire, with one
//! routing rule of its own: model ids must carry the `:hf-inference`
//! suffix exactly once.

use std::sync::Arc;

use async_trait::async_trait;

use llmgate_protocol::openai::{ChatCompletionRequest, ChatCompletionResponse};
use llmgate_provider_core::{ChatProvider, ChatStream, UpstreamClient, UpstreamError};

use crate::openai_compat::{AuthStyle, EndpointConfig, OpenAiCompatProvider};

pub const HF_SUFFIX: &str = ":hf-inference";

/// Append `:hf-inference` unless it is already present. Idempotent so a
/// retried or pre-suffixed request never double-appends.
pub fn ensure_hf_suffix(model: &str) -> String {
    if model.ends_with(HF_SUFFIX) {
        model.to_string()
    } else {
        format!("{model}{HF_SUFFIX}")
    }
}

pub struct HuggingFaceProvider {
    inner: OpenAiCompatProvider,
    name: String,
}

impl HuggingFaceProvider {
    pub fn new(api_key: String, client: Arc<dyn UpstreamClient>, timeout: std::time::Duration) -> Self {
        let config = EndpointConfig {
            name: "huggingface".into(),
            base_url: "https://router.huggingface.co/v1".into(),
            api_key,
            auth: AuthStyle::Bearer,
            extra_headers: Vec::new(),
            timeout,
        };
        let name = config.name.clone();
        Self { inner: OpenAiCompatProvider::new(config, client), name }
    }

    fn with_suffix(req: &ChatCompletionRequest) -> ChatCompletionRequest {
        let mut req = req.clone();
        req.model = ensure_hf_suffix(&req.model);
        req
    }
}

#[async_trait]
impl ChatProvider for HuggingFaceProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_models(&self) -> Vec<serde_json::Value> {
        self.inner.list_models().await
    }

    async fn chat(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, UpstreamError> {
        self.inner.chat(&Self::with_suffix(req)).await
    }

    async fn chat_stream(&self, req: &ChatCompletionRequest) -> Result<ChatStream, UpstreamError> {
        self.inner.chat_stream(&Self::with_suffix(req)).await
    }
}
