//! Process bootstrap: parse flags, read and validate the environment,
//! connect storage, build the provider registry and catalog, and assemble
//! the engine. Any failure here is fatal and surfaces as a non-zero exit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use clap::Parser;
use tokio::task::JoinHandle;

use llmgate_catalog::{CatalogCache, ManualPricingTable, ModelFetcher, PricingService};
use llmgate_common::{GlobalConfig, GlobalConfigPatch};
use llmgate_provider_core::{ProviderRegistry, UpstreamClient, UpstreamClientConfig, WreqUpstreamClient};
use llmgate_provider_impl::EndpointEnv;
use llmgate_storage::{ActivityLogger, ActivityLoggerConfig, SeaOrmStorage, Storage};

use crate::auth::hash_api_key;
use crate::engine::GatewayEngine;
use crate::ledger::CreditLedger;
use crate::ratelimit::RateLimiter;
use crate::state::AppState;

/// Startup configuration. clap resolves each field as CLI > ENV; the
/// remaining gaps fall to [`GlobalConfigPatch::into_config`] defaults.
/// Values stay `Option<String>` so empty environment variables read as
/// unset instead of failing to parse.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "llmgate", version, about = "Multi-provider LLM API gateway")]
pub struct CliArgs {
    /// Database DSN (required).
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Bind host.
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long, env = "PORT")]
    pub port: Option<String>,

    /// Admin key (plaintext); only its hash is kept in memory.
    #[arg(long, env = "ADMIN_API_KEY")]
    pub admin_api_key: Option<String>,

    /// Catalog cache TTL in seconds.
    #[arg(long, env = "CATALOG_TTL_SECS")]
    pub catalog_ttl_secs: Option<String>,

    /// Per-attempt upstream timeout in seconds.
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS")]
    pub upstream_timeout_secs: Option<String>,
}

/// Catalog-facing view of the registry: one fetch per gateway, failures
/// already softened to empty lists by the provider contract.
pub struct RegistryModelFetcher {
    registry: Arc<ProviderRegistry>,
}

impl RegistryModelFetcher {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ModelFetcher for RegistryModelFetcher {
    fn gateways(&self) -> Vec<String> {
        self.registry.names().to_vec()
    }

    async fn fetch(&self, gateway: &str) -> Vec<serde_json::Value> {
        match self.registry.get(gateway) {
            Some(provider) => provider.list_models().await,
            None => Vec::new(),
        }
    }
}

pub struct Bootstrap {
    pub engine: GatewayEngine,
    pub activity_worker: JoinHandle<()>,
}

fn sanitize(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(value: Option<String>, what: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match sanitize(value) {
        Some(raw) => Ok(Some(raw.parse::<T>().with_context(|| format!("{what} is not a valid number"))?)),
        None => Ok(None),
    }
}

fn config_from_args(args: &CliArgs) -> anyhow::Result<GlobalConfig> {
    // clap already applied CLI > ENV per field; overlay on the defaults.
    let patch = GlobalConfigPatch {
        dsn: sanitize(args.database_url.clone()),
        host: sanitize(args.host.clone()),
        port: parse_number::<u16>(args.port.clone(), "PORT")?,
        admin_key_hash: sanitize(args.admin_api_key.clone()).map(|key| hash_api_key(&key)),
        catalog_ttl_secs: parse_number::<u64>(args.catalog_ttl_secs.clone(), "CATALOG_TTL_SECS")?,
        upstream_timeout_secs: parse_number::<u64>(
            args.upstream_timeout_secs.clone(),
            "UPSTREAM_TIMEOUT_SECS",
        )?,
    };
    patch
        .into_config()
        .context("incomplete configuration (is DATABASE_URL set?)")
}

/// Parse flags and environment, then bootstrap.
pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    bootstrap(CliArgs::parse()).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let config = config_from_args(&args)?;
    let upstream_timeout = Duration::from_secs(config.upstream_timeout_secs);

    let client: Arc<dyn UpstreamClient> = Arc::new(
        WreqUpstreamClient::new(UpstreamClientConfig {
            request_timeout: upstream_timeout,
            ..Default::default()
        })
        .context("building upstream http client")?,
    );

    let endpoint_env = EndpointEnv::from_process_env(upstream_timeout);
    let registry = Arc::new(llmgate_provider_impl::build_registry(&endpoint_env, client));
    if registry.is_empty() {
        bail!("no upstream provider is configured; set at least one *_API_KEY");
    }
    tracing::info!(providers = registry.len(), "provider registry ready");

    let storage = SeaOrmStorage::connect(&config.dsn)
        .await
        .context("connecting to database")?;
    storage.sync().await.context("syncing database schema")?;
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let catalog = CatalogCache::new(
        Arc::new(RegistryModelFetcher::new(registry.clone())),
        ManualPricingTable::with_defaults(),
        Duration::from_secs(config.catalog_ttl_secs),
    );
    let pricing = Arc::new(PricingService::new(
        catalog.clone(),
        ManualPricingTable::with_defaults(),
    ));

    let (activity, activity_worker) =
        ActivityLogger::spawn(storage.clone(), ActivityLoggerConfig::default());

    let state = Arc::new(AppState::new(
        config,
        registry,
        catalog,
        pricing,
        RateLimiter::new(),
        CreditLedger::new(storage.clone()),
        activity,
        storage,
    ));

    Ok(Bootstrap {
        engine: GatewayEngine::new(state),
        activity_worker,
    })
}
