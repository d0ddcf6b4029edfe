//! Process-wide shared state. Built once at bootstrap; hot-swappable
//! pieces sit behind `ArcSwap` so readers never block.

use std::sync::Arc;

use arc_swap::ArcSwap;

use llmgate_catalog::{CatalogCache, PricingService};
use llmgate_common::GlobalConfig;
use llmgate_provider_core::ProviderRegistry;
use llmgate_storage::{ActivityLogger, Storage};

use crate::ledger::CreditLedger;
use crate::ratelimit::RateLimiter;

pub struct AppState {
    pub config: ArcSwap<GlobalConfig>,
    pub registry: Arc<ProviderRegistry>,
    pub catalog: CatalogCache,
    pub pricing: Arc<PricingService>,
    pub limiter: RateLimiter,
    pub ledger: CreditLedger,
    pub activity: ActivityLogger,
    pub storage: Arc<dyn Storage>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GlobalConfig,
        registry: Arc<ProviderRegistry>,
        catalog: CatalogCache,
        pricing: Arc<PricingService>,
        limiter: RateLimiter,
        ledger: CreditLedger,
        activity: ActivityLogger,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            registry,
            catalog,
            pricing,
            limiter,
            ledger,
            activity,
            storage,
        }
    }

    pub fn apply_global_config(&self, config: GlobalConfig) {
        self.config.store(Arc::new(config));
    }
}
