//! Built-in upstream endpoints and registry construction. A provider is
//! registered only when its credential is present in the environment, so
//! a partially configured deployment still boots.

use std::sync::Arc;
use std::time::Duration;

use llmgate_provider_core::{ProviderRegistry, UpstreamClient};

use crate::dashscope::DashScopeProvider;
use crate::huggingface::HuggingFaceProvider;
use crate::openai_compat::{AuthStyle, EndpointConfig, OpenAiCompatProvider};
use crate::vertex::{ServiceAccountKey, VertexProvider};

/// OpenAI-compatible upstreams: `(gateway, env var, base url, auth style)`.
const COMPAT_ENDPOINTS: &[(&str, &str, &str, AuthStyle)] = &[
    ("openrouter", "OPENROUTER_API_KEY", "https://openrouter.ai/api/v1", AuthStyle::Bearer),
    ("portkey", "PORTKEY_API_KEY", "https://api.portkey.ai/v1", AuthStyle::Header("x-portkey-api-key")),
    ("featherless", "FEATHERLESS_API_KEY", "https://api.featherless.ai/v1", AuthStyle::Bearer),
    ("groq", "GROQ_API_KEY", "https://api.groq.com/openai/v1", AuthStyle::Bearer),
    ("fireworks", "FIREWORKS_API_KEY", "https://api.fireworks.ai/inference/v1", AuthStyle::Bearer),
    ("together", "TOGETHER_API_KEY", "https://api.together.xyz/v1", AuthStyle::Bearer),
    ("deepinfra", "DEEPINFRA_API_KEY", "https://api.deepinfra.com/v1/openai", AuthStyle::Bearer),
    ("chutes", "CHUTES_API_KEY", "https://llm.chutes.ai/v1", AuthStyle::Bearer),
    ("cerebras", "CEREBRAS_API_KEY", "https://api.cerebras.ai/v1", AuthStyle::Bearer),
    ("nebius", "NEBIUS_API_KEY", "https://api.studio.nebius.com/v1", AuthStyle::Bearer),
    ("xai", "XAI_API_KEY", "https://api.x.ai/v1", AuthStyle::Bearer),
    ("novita", "NOVITA_API_KEY", "https://api.novita.ai/v3/openai", AuthStyle::Bearer),
];

/// Environment snapshot consumed by [`build_registry`]. Collected by the
/// bootstrap so registry construction itself stays deterministic and
/// testable.
#[derive(Debug, Clone, Default)]
pub struct EndpointEnv {
    /// `(env var name, value)` pairs for every configured credential.
    pub api_keys: Vec<(String, String)>,
    pub huggingface_api_key: Option<String>,
    pub alibaba_cloud_api_key: Option<String>,
    pub google_vertex_credentials_json: Option<String>,
    pub google_project_id: Option<String>,
    pub google_vertex_location: Option<String>,
    pub upstream_timeout: Duration,
}

impl EndpointEnv {
    pub fn from_process_env(upstream_timeout: Duration) -> Self {
        let mut api_keys = Vec::new();
        for (_, env_var, _, _) in COMPAT_ENDPOINTS {
            if let Ok(value) = std::env::var(env_var)
                && !value.trim().is_empty()
            {
                api_keys.push((env_var.to_string(), value.trim().to_string()));
            }
        }
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            api_keys,
            huggingface_api_key: read("HUGGINGFACE_API_KEY").or_else(|| read("HF_TOKEN")),
            alibaba_cloud_api_key: read("ALIBABA_CLOUD_API_KEY"),
            google_vertex_credentials_json: read("GOOGLE_VERTEX_CREDENTIALS_JSON"),
            google_project_id: read("GOOGLE_PROJECT_ID"),
            google_vertex_location: read("GOOGLE_VERTEX_LOCATION"),
            upstream_timeout,
        }
    }

    fn key_for(&self, env_var: &str) -> Option<&str> {
        self.api_keys
            .iter()
            .find(|(name, _)| name == env_var)
            .map(|(_, value)| value.as_str())
    }
}

/// Build the provider registry from configured credentials.
pub fn build_registry(env: &EndpointEnv, client: Arc<dyn UpstreamClient>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    for (gateway, env_var, base_url, auth) in COMPAT_ENDPOINTS {
        let Some(api_key) = env.key_for(env_var) else {
            tracing::debug!(provider = gateway, "no credential, skipping");
            continue;
        };
        let config = EndpointConfig {
            name: gateway.to_string(),
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            auth: auth.clone(),
            extra_headers: Vec::new(),
            timeout: env.upstream_timeout,
        };
        registry.register(Arc::new(OpenAiCompatProvider::new(config, client.clone())));
    }

    if let Some(api_key) = &env.huggingface_api_key {
        registry.register(Arc::new(HuggingFaceProvider::new(
            api_key.clone(),
            client.clone(),
            env.upstream_timeout,
        )));
    }

    if let Some(api_key) = &env.alibaba_cloud_api_key {
        registry.register(Arc::new(DashScopeProvider::new(
            api_key.clone(),
            client.clone(),
            env.upstream_timeout,
        )));
    }

    if let Some(raw) = &env.google_vertex_credentials_json {
        match (ServiceAccountKey::parse(raw), &env.google_project_id) {
            (Ok(key), Some(project_id)) => {
                let location = env
                    .google_vertex_location
                    .clone()
                    .unwrap_or_else(|| "us-central1".to_string());
                registry.register(Arc::new(VertexProvider::new(
                    key,
                    project_id.clone(),
                    location,
                    client.clone(),
                    env.upstream_timeout,
                )));
            }
            (Err(err), _) => {
                tracing::warn!(error = %err, "GOOGLE_VERTEX_CREDENTIALS_JSON is not decodable, skipping vertex");
            }
            (_, None) => {
                tracing::warn!("GOOGLE_PROJECT_ID missing, skipping vertex");
            }
        }
    }

    registry
}
