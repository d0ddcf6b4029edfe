//! Model-id routing: detect the target gateway from a user-supplied model
//! string and rewrite the id into the upstream's canonical form.
//!
//! Detection prefers explicit signals (request field, `@gateway/` prefix,
//! known id prefixes) over substring heuristics; the catalog cache is
//! consulted before falling back to the default gateway.

pub mod gateways {
    pub const OPENROUTER: &str = "openrouter";
    pub const PORTKEY: &str = "portkey";
    pub const FEATHERLESS: &str = "featherless";
    pub const GROQ: &str = "groq";
    pub const FIREWORKS: &str = "fireworks";
    pub const TOGETHER: &str = "together";
    pub const DEEPINFRA: &str = "deepinfra";
    pub const CHUTES: &str = "chutes";
    pub const GOOGLE_VERTEX: &str = "google-vertex";
    pub const ALIBABA_CLOUD: &str = "alibaba-cloud";
    pub const HUGGINGFACE: &str = "huggingface";
    pub const CEREBRAS: &str = "cerebras";
    pub const NEBIUS: &str = "nebius";
    pub const XAI: &str = "xai";
    pub const NOVITA: &str = "novita";

    /// Every routable gateway, in registry order.
    pub const ALL: &[&str] = &[
        OPENROUTER,
        PORTKEY,
        FEATHERLESS,
        GROQ,
        FIREWORKS,
        TOGETHER,
        DEEPINFRA,
        CHUTES,
        GOOGLE_VERTEX,
        ALIBABA_CLOUD,
        HUGGINGFACE,
        CEREBRAS,
        NEBIUS,
        XAI,
        NOVITA,
    ];

    /// The pseudo-gateway aggregating every provider's catalog.
    pub const AGGREGATE: &str = "all";

    pub fn is_known(name: &str) -> bool {
        ALL.contains(&name)
    }
}

use gateways::*;

/// Outcome of routing a model string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub gateway: String,
    /// The id in the upstream's own registry form.
    pub upstream_model: String,
}

/// Read-only view of the catalog used for cache-assisted detection.
/// Implemented by the catalog cache; a no-op impl keeps detection pure.
pub trait CatalogHint: Send + Sync {
    fn gateway_for(&self, model_id: &str) -> Option<String>;
}

/// Detection without a catalog (steps 1–3 and 5 only).
pub struct NoCatalogHint;

impl CatalogHint for NoCatalogHint {
    fn gateway_for(&self, _model_id: &str) -> Option<String> {
        None
    }
}

/// Explicit `prefix/` → gateway routes, checked before any heuristic.
const PREFIX_ROUTES: &[(&str, &str)] = &[
    ("openrouter/", OPENROUTER),
    ("portkey/", PORTKEY),
    ("featherless/", FEATHERLESS),
    ("groq/", GROQ),
    ("fireworks/", FIREWORKS),
    ("together/", TOGETHER),
    ("deepinfra/", DEEPINFRA),
    ("chutes/", CHUTES),
    ("google-vertex/", GOOGLE_VERTEX),
    ("google/", GOOGLE_VERTEX),
    ("alibaba-cloud/", ALIBABA_CLOUD),
    ("qwen/", ALIBABA_CLOUD),
    ("huggingface/", HUGGINGFACE),
    ("cerebras/", CEREBRAS),
    ("nebius/", NEBIUS),
    ("xai/", XAI),
    ("novita/", NOVITA),
    ("anthropic/", PORTKEY),
    // Marketplace ids routed through OpenRouter untouched.
    ("near/", OPENROUTER),
];

/// Last-resort substring heuristics. Brittle on purpose, so they run only
/// after explicit prefixes and the catalog have had their say.
const SUBSTRING_ROUTES: &[(&str, &str)] = &[
    ("qwen", ALIBABA_CLOUD),
    ("gemini", GOOGLE_VERTEX),
    ("grok", XAI),
    ("claude", PORTKEY),
];

/// Determine `(gateway, upstream_model)` for a user-supplied model string.
///
/// Decision order: explicit request field, `@gateway/rest` override, known
/// id prefixes, catalog-assisted lookup, substring heuristics, then the
/// OpenRouter fallback. The returned id has the gateway-specific rewrite
/// already applied.
pub fn resolve_model(
    model: &str,
    explicit_gateway: Option<&str>,
    catalog: &dyn CatalogHint,
) -> ResolvedModel {
    let model = model.trim();

    if let Some(gateway) = explicit_gateway.map(str::trim).filter(|g| !g.is_empty()) {
        return resolved(gateway, model);
    }

    if let Some(rest) = model.strip_prefix('@') {
        if let Some((gateway, rest)) = rest.split_once('/') {
            return resolved(gateway, rest);
        }
    }

    for (prefix, gateway) in PREFIX_ROUTES {
        if model.starts_with(prefix) {
            return resolved(gateway, model);
        }
    }

    if let Some(gateway) = catalog.gateway_for(model) {
        return resolved(&gateway, model);
    }

    let lower = model.to_ascii_lowercase();
    for (needle, gateway) in SUBSTRING_ROUTES {
        if lower.contains(needle) {
            return resolved(gateway, model);
        }
    }

    resolved(OPENROUTER, model)
}

fn resolved(gateway: &str, model: &str) -> ResolvedModel {
    ResolvedModel {
        gateway: gateway.to_string(),
        upstream_model: rewrite_for_gateway(gateway, model),
    }
}

/// Rewrite a model id into the gateway's canonical form. Idempotent:
/// applying the rewrite to its own output is a no-op.
pub fn rewrite_for_gateway(gateway: &str, model: &str) -> String {
    let model = model.trim();
    match gateway {
        // OpenRouter's registry uses `author/model` ids natively.
        OPENROUTER => strip_prefixes(model, &["openrouter/", "near/"]).to_string(),
        PORTKEY => strip_prefixes(model, &["portkey/", "anthropic/"]).to_string(),
        FEATHERLESS => strip_prefixes(model, &["featherless/"]).to_string(),
        GROQ => strip_prefixes(model, &["groq/"]).to_string(),
        FIREWORKS => {
            let bare = strip_prefixes(model, &["fireworks/"]);
            if bare.starts_with("accounts/") {
                bare.to_string()
            } else {
                format!("accounts/fireworks/models/{bare}")
            }
        }
        TOGETHER => strip_prefixes(model, &["together/"]).to_string(),
        DEEPINFRA => strip_prefixes(model, &["deepinfra/"]).to_string(),
        CHUTES => strip_prefixes(model, &["chutes/"]).to_string(),
        GOOGLE_VERTEX => strip_prefixes(model, &["google-vertex/", "google/"]).to_string(),
        ALIBABA_CLOUD => strip_prefixes(model, &["alibaba-cloud/", "qwen/"]).to_string(),
        HUGGINGFACE => strip_prefixes(model, &["huggingface/"]).to_string(),
        CEREBRAS => strip_prefixes(model, &["cerebras/"]).to_string(),
        NEBIUS => strip_prefixes(model, &["nebius/"]).to_string(),
        XAI => strip_prefixes(model, &["xai/"]).to_string(),
        NOVITA => strip_prefixes(model, &["novita/"]).to_string(),
        _ => model.to_string(),
    }
}

fn strip_prefixes<'a>(model: &'a str, prefixes: &[&str]) -> &'a str {
    for prefix in prefixes {
        if let Some(rest) = model.strip_prefix(prefix) {
            return rest;
        }
    }
    model
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_gateway_wins() {
        let out = resolve_model("katanemo/Arch-Router-1.5B", Some("huggingface"), &NoCatalogHint);
        assert_eq!(out.gateway, "huggingface");
        assert_eq!(out.upstream_model, "katanemo/Arch-Router-1.5B");
    }

    #[test]
    fn at_prefix_overrides_match_table() {
        let out = resolve_model("@groq/llama-3.3-70b-versatile", None, &NoCatalogHint);
        assert_eq!(out.gateway, "groq");
        assert_eq!(out.upstream_model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn prefix_table_routes() {
        let out = resolve_model("qwen/qwen-max", None, &NoCatalogHint);
        assert_eq!(out.gateway, "alibaba-cloud");
        assert_eq!(out.upstream_model, "qwen-max");

        let out = resolve_model("fireworks/llama-v3p1-8b-instruct", None, &NoCatalogHint);
        assert_eq!(out.gateway, "fireworks");
        assert_eq!(out.upstream_model, "accounts/fireworks/models/llama-v3p1-8b-instruct");
    }

    #[test]
    fn bare_qwen_routes_by_substring() {
        let out = resolve_model("qwen-max", None, &NoCatalogHint);
        assert_eq!(out.gateway, "alibaba-cloud");
        assert_eq!(out.upstream_model, "qwen-max");
    }

    #[test]
    fn gemini_routes_to_vertex() {
        let out = resolve_model("gemini-1.5-pro", None, &NoCatalogHint);
        assert_eq!(out.gateway, "google-vertex");
        assert_eq!(out.upstream_model, "gemini-1.5-pro");
    }

    #[test]
    fn catalog_hint_beats_substrings() {
        struct Hint;
        impl CatalogHint for Hint {
            fn gateway_for(&self, model_id: &str) -> Option<String> {
                (model_id == "qwen-2.5-72b").then(|| "together".to_string())
            }
        }
        let out = resolve_model("qwen-2.5-72b", None, &Hint);
        assert_eq!(out.gateway, "together");
    }

    #[test]
    fn unknown_falls_back_to_openrouter() {
        let out = resolve_model("openai/gpt-4", None, &NoCatalogHint);
        assert_eq!(out.gateway, "openrouter");
        assert_eq!(out.upstream_model, "openai/gpt-4");
    }

    #[test]
    fn rewrite_is_idempotent_for_every_gateway() {
        let samples = [
            "openrouter/openai/gpt-4",
            "fireworks/llama-v3p1-8b-instruct",
            "qwen/qwen-max",
            "google/gemini-1.5-flash",
            "anthropic/claude-3-5-sonnet",
            "huggingface/katanemo/Arch-Router-1.5B",
            "plain-model",
        ];
        for gateway in gateways::ALL {
            for sample in samples {
                let once = rewrite_for_gateway(gateway, sample);
                let twice = rewrite_for_gateway(gateway, &once);
                assert_eq!(once, twice, "gateway={gateway} sample={sample}");
            }
        }
    }
}
