//! Normalization pipeline: heterogeneous raw upstream records become
//! [`ModelRecord`]s with sane ids and sanitized pricing.

use serde_json::Value;

use crate::model::{Architecture, ModelPricing, ModelRecord};
use crate::pricing::ManualPricingTable;

/// Default provider slug used when an upstream id carries no `author/`
/// prefix and `owned_by` is unusable.
fn default_slug(gateway: &str) -> Option<&'static str> {
    match gateway {
        "alibaba-cloud" => Some("qwen"),
        "google-vertex" => Some("google"),
        "groq" => Some("groq"),
        "cerebras" => Some("cerebras"),
        "xai" => Some("xai"),
        _ => None,
    }
}

/// Normalize one gateway's raw listing. Records without an id are
/// dropped; duplicate ids keep the first occurrence so the per-gateway
/// uniqueness invariant holds.
pub fn normalize_gateway_models(
    gateway: &str,
    raw: Vec<Value>,
    pricing: &ManualPricingTable,
) -> Vec<ModelRecord> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for value in raw {
        let Some(record) = normalize_record(gateway, &value, pricing) else {
            continue;
        };
        if seen.insert(record.id.clone()) {
            out.push(record);
        }
    }
    out
}

pub fn normalize_record(
    gateway: &str,
    raw: &Value,
    pricing: &ManualPricingTable,
) -> Option<ModelRecord> {
    let raw_id = raw.get("id").and_then(Value::as_str)?.trim();
    if raw_id.is_empty() {
        return None;
    }
    let id = canonical_id(gateway, raw_id, raw);

    let name = raw
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| display_name(&id));
    let description = raw
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);
    let context_length = raw
        .get("context_length")
        .or_else(|| raw.get("max_context_length"))
        .or_else(|| raw.get("max_model_len"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let mut record = ModelRecord {
        provider_slug: id.split_once('/').map(|(slug, _)| slug.to_string()),
        name,
        description,
        context_length,
        architecture: parse_architecture(raw.get("architecture")),
        pricing: parse_pricing(raw.get("pricing")),
        provider_site_url: raw
            .get("provider_site_url")
            .and_then(Value::as_str)
            .map(str::to_string),
        model_logo_url: raw
            .get("model_logo_url")
            .or_else(|| raw.get("logo_url"))
            .and_then(Value::as_str)
            .map(str::to_string),
        source_gateway: gateway.to_string(),
        huggingface_metrics: raw.get("huggingface_metrics").cloned(),
        id,
    };

    // Upstreams that omit pricing fall back to the manual table.
    if record.pricing.prompt == 0.0 && record.pricing.completion == 0.0 {
        if let Some(prices) = pricing.lookup(&record.id) {
            record.pricing = ModelPricing {
                prompt: prices.prompt,
                completion: prices.completion,
            };
        }
    }
    Some(record)
}

/// Enforce the `<slug>/<model>` id shape when a slug can be inferred.
fn canonical_id(gateway: &str, raw_id: &str, raw: &Value) -> String {
    if raw_id.contains('/') {
        return raw_id.to_string();
    }
    let owned_by = raw
        .get("owned_by")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    match owned_by.as_deref().or_else(|| default_slug(gateway)) {
        Some(slug) => format!("{slug}/{raw_id}"),
        // No inferable slug: keep the bare id for backward compatibility.
        None => raw_id.to_string(),
    }
}

fn display_name(id: &str) -> String {
    id.rsplit_once('/').map(|(_, tail)| tail).unwrap_or(id).to_string()
}

fn parse_architecture(raw: Option<&Value>) -> Architecture {
    let Some(raw) = raw else {
        return Architecture::default();
    };
    let strings = |key: &str| -> Option<Vec<String>> {
        raw.get(key)?.as_array().map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
    };
    let default = Architecture::default();
    Architecture {
        modality: raw
            .get("modality")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(default.modality),
        input_modalities: strings("input_modalities").unwrap_or(default.input_modalities),
        output_modalities: strings("output_modalities").unwrap_or(default.output_modalities),
    }
}

/// Sanitize pricing: the `-1` dynamic-pricing sentinel and any other
/// negative or missing value become 0. String prices follow the
/// OpenRouter per-token convention and are scaled to USD per 1M tokens;
/// numeric prices are taken as already per-1M.
fn parse_pricing(raw: Option<&Value>) -> ModelPricing {
    let Some(raw) = raw else {
        return ModelPricing::default();
    };
    ModelPricing {
        prompt: parse_price(raw.get("prompt")),
        completion: parse_price(raw.get("completion")),
    }
}

fn parse_price(value: Option<&Value>) -> f64 {
    let sanitize = |price: f64| if price.is_finite() && price > 0.0 { price } else { 0.0 };
    match value {
        Some(Value::Number(n)) => sanitize(n.as_f64().unwrap_or(0.0)),
        Some(Value::String(s)) => sanitize(s.trim().parse::<f64>().unwrap_or(0.0)) * 1_000_000.0,
        _ => 0.0,
    }
}
