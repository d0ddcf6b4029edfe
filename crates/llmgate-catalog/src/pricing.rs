//! Per-model unit prices and cost computation. The catalog is consulted
//! first; a manual prefix-keyed table covers models whose upstream omits
//! pricing.

use crate::cache::CatalogCache;

/// USD per 1,000,000 tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModelPrices {
    pub prompt: f64,
    pub completion: f64,
}

/// Prefix-keyed pricing fallback. Longest matching prefix wins.
#[derive(Debug, Clone, Default)]
pub struct ManualPricingTable {
    entries: Vec<(String, ModelPrices)>,
}

impl ManualPricingTable {
    pub fn new(entries: Vec<(String, ModelPrices)>) -> Self {
        Self { entries }
    }

    /// Seed prices for families that commonly arrive without pricing.
    pub fn with_defaults() -> Self {
        let table = [
            ("openai/gpt-4o-mini", 0.15, 0.60),
            ("openai/gpt-4o", 2.50, 10.00),
            ("openai/gpt-4", 30.00, 60.00),
            ("anthropic/claude-3-5-sonnet", 3.00, 15.00),
            ("anthropic/claude-3-haiku", 0.25, 1.25),
            ("qwen/qwen-max", 1.60, 6.40),
            ("qwen/qwen-plus", 0.40, 1.20),
            ("qwen/qwen-turbo", 0.05, 0.20),
            ("google/gemini-1.5-pro", 1.25, 5.00),
            ("google/gemini-1.5-flash", 0.075, 0.30),
            ("google/gemini-2.0-flash", 0.10, 0.40),
            ("meta-llama/", 0.20, 0.20),
        ];
        Self::new(
            table
                .into_iter()
                .map(|(prefix, prompt, completion)| {
                    (prefix.to_string(), ModelPrices { prompt, completion })
                })
                .collect(),
        )
    }

    pub fn lookup(&self, model_id: &str) -> Option<ModelPrices> {
        self.entries
            .iter()
            .filter(|(prefix, _)| model_id.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, prices)| *prices)
    }
}

/// Cost of a completion in USD. Inputs are token counts; prices are per
/// 1M tokens. Never negative.
pub fn compute_cost(prices: ModelPrices, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let cost = (prompt_tokens as f64 * prices.prompt.max(0.0)
        + completion_tokens as f64 * prices.completion.max(0.0))
        / 1_000_000.0;
    cost.max(0.0)
}

pub struct PricingService {
    catalog: CatalogCache,
    table: ManualPricingTable,
}

impl PricingService {
    pub fn new(catalog: CatalogCache, table: ManualPricingTable) -> Self {
        Self { catalog, table }
    }

    /// Unit prices for a model: catalog first (the gateway hint narrows
    /// the search), then the manual table. Unknown models price at zero.
    pub fn prices(&self, model_id: &str, gateway_hint: Option<&str>) -> ModelPrices {
        if let Some(record) = self.catalog.find_cached(model_id, gateway_hint) {
            let pricing = record.pricing;
            if pricing.prompt > 0.0 || pricing.completion > 0.0 {
                return ModelPrices {
                    prompt: pricing.prompt,
                    completion: pricing.completion,
                };
            }
        }
        if let Some(prices) = self.table.lookup(model_id) {
            return prices;
        }
        tracing::warn!(model = model_id, "no pricing found, defaulting to zero");
        ModelPrices::default()
    }

    pub fn cost(&self, model_id: &str, gateway_hint: Option<&str>, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        compute_cost(self.prices(model_id, gateway_hint), prompt_tokens, completion_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let table = ManualPricingTable::with_defaults();
        let gpt4o = table.lookup("openai/gpt-4o").unwrap();
        assert_eq!(gpt4o.prompt, 2.50);
        let gpt4 = table.lookup("openai/gpt-4").unwrap();
        assert_eq!(gpt4.prompt, 30.00);
        assert!(table.lookup("unknown/model").is_none());
    }

    #[test]
    fn cost_formula() {
        let prices = ModelPrices { prompt: 30.0, completion: 60.0 };
        let cost = compute_cost(prices, 500, 500);
        assert!((cost - 0.045).abs() < 1e-12);
    }

    #[test]
    fn cost_never_negative() {
        let prices = ModelPrices { prompt: -5.0, completion: -5.0 };
        assert_eq!(compute_cost(prices, 1000, 1000), 0.0);
    }
}
