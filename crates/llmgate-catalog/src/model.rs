//! The normalized, provider-agnostic model record served by the catalog.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub modality: String,
    pub input_modalities: Vec<String>,
    pub output_modalities: Vec<String>,
}

impl Default for Architecture {
    fn default() -> Self {
        Self {
            modality: "text->text".to_string(),
            input_modalities: vec!["text".to_string()],
            output_modalities: vec!["text".to_string()],
        }
    }
}

/// USD per 1,000,000 tokens. Never negative after normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub prompt: f64,
    pub completion: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Canonical `<provider_slug>/<model_name>` id, unique within one
    /// gateway's cache. Ids a slug could not be inferred for are kept
    /// unprefixed for backward compatibility.
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub context_length: u64,
    pub architecture: Architecture,
    pub pricing: ModelPricing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_site_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_logo_url: Option<String>,
    /// Upstream gateway that produced this record; drives routing.
    pub source_gateway: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub huggingface_metrics: Option<Value>,
}
