//! Per-provider TTL cache of normalized model records, with single-flight
//! background revalidation and the `all` aggregation gateway.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio::time::Instant;

use llmgate_transform::CatalogHint;

use crate::model::ModelRecord;
use crate::normalize::normalize_gateway_models;
use crate::pricing::ManualPricingTable;

/// Fraction of the TTL after which a hit also schedules a background
/// refresh.
const REVALIDATE_FRACTION: f64 = 0.8;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown gateway: {0}")]
    UnknownGateway(String),
}

/// Pulls one gateway's raw model listing. Implemented over the provider
/// registry; scripted in tests.
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    fn gateways(&self) -> Vec<String>;
    /// Best-effort: failures surface as an empty list.
    async fn fetch(&self, gateway: &str) -> Vec<serde_json::Value>;
}

#[derive(Debug)]
pub struct CacheSlot {
    pub data: Vec<ModelRecord>,
    pub fetched_at: Instant,
}

struct ProviderSlot {
    slot: ArcSwapOption<CacheSlot>,
    /// Serializes refreshes; the sync path waits, the background path
    /// skips when a refresh is already in flight.
    refresh_lock: tokio::sync::Mutex<()>,
    background_inflight: AtomicBool,
}

impl ProviderSlot {
    fn new() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
            refresh_lock: tokio::sync::Mutex::new(()),
            background_inflight: AtomicBool::new(false),
        }
    }
}

struct CatalogInner {
    slots: HashMap<String, ProviderSlot>,
    order: Vec<String>,
    fetcher: Arc<dyn ModelFetcher>,
    pricing: ManualPricingTable,
    ttl: Duration,
}

/// Cheaply clonable handle; all clones share the same slots.
#[derive(Clone)]
pub struct CatalogCache {
    inner: Arc<CatalogInner>,
}

impl CatalogCache {
    pub fn new(fetcher: Arc<dyn ModelFetcher>, pricing: ManualPricingTable, ttl: Duration) -> Self {
        let order = fetcher.gateways();
        let slots = order
            .iter()
            .map(|name| (name.clone(), ProviderSlot::new()))
            .collect();
        Self {
            inner: Arc::new(CatalogInner {
                slots,
                order,
                fetcher,
                pricing,
                ttl,
            }),
        }
    }

    pub fn gateways(&self) -> &[String] {
        &self.inner.order
    }

    pub fn is_known_gateway(&self, gateway: &str) -> bool {
        self.inner.slots.contains_key(gateway)
    }

    /// Cached records for one gateway. Serves fresh data directly,
    /// schedules a background refresh past the revalidation threshold,
    /// and fetches synchronously on a cold or expired entry.
    pub async fn get(&self, gateway: &str) -> Result<Vec<ModelRecord>, CatalogError> {
        let slot = self
            .inner
            .slots
            .get(gateway)
            .ok_or_else(|| CatalogError::UnknownGateway(gateway.to_string()))?;

        if let Some(cached) = slot.slot.load_full() {
            let age = cached.fetched_at.elapsed();
            if age < self.inner.ttl {
                if age.as_secs_f64() > self.inner.ttl.as_secs_f64() * REVALIDATE_FRACTION {
                    self.spawn_background_refresh(gateway);
                }
                return Ok(cached.data.clone());
            }
        }

        self.refresh(gateway).await?;
        Ok(slot
            .slot
            .load_full()
            .map(|cached| cached.data.clone())
            .unwrap_or_default())
    }

    /// Fetch, normalize, and atomically swap one gateway's records.
    /// A failed fetch keeps the stale entry.
    pub async fn refresh(&self, gateway: &str) -> Result<(), CatalogError> {
        let slot = self
            .inner
            .slots
            .get(gateway)
            .ok_or_else(|| CatalogError::UnknownGateway(gateway.to_string()))?;

        let _guard = slot.refresh_lock.lock().await;
        let raw = self.inner.fetcher.fetch(gateway).await;
        if raw.is_empty() && slot.slot.load().is_some() {
            tracing::warn!(gateway, "model refresh returned nothing, keeping stale entry");
            return Ok(());
        }
        let data = normalize_gateway_models(gateway, raw, &self.inner.pricing);
        slot.slot.store(Some(Arc::new(CacheSlot {
            data,
            fetched_at: Instant::now(),
        })));
        Ok(())
    }

    fn spawn_background_refresh(&self, gateway: &str) {
        let Some(slot) = self.inner.slots.get(gateway) else {
            return;
        };
        if slot.background_inflight.swap(true, Ordering::AcqRel) {
            return;
        }
        let cache = self.clone();
        let gateway = gateway.to_string();
        tokio::spawn(async move {
            if let Err(err) = cache.refresh(&gateway).await {
                tracing::warn!(%gateway, error = %err, "background refresh failed");
            }
            if let Some(slot) = cache.inner.slots.get(&gateway) {
                slot.background_inflight.store(false, Ordering::Release);
            }
        });
    }

    pub fn clear(&self, gateway: &str) {
        if let Some(slot) = self.inner.slots.get(gateway) {
            slot.slot.store(None);
        }
    }

    pub fn clear_all(&self) {
        for slot in self.inner.slots.values() {
            slot.slot.store(None);
        }
    }

    /// The `all` pseudo-gateway: every populated gateway's cached list
    /// concatenated, deduplicated on `(source_gateway, id)` keeping the
    /// first occurrence. Unpopulated gateways contribute nothing; this
    /// never triggers fetches.
    pub fn aggregate_all(&self) -> Vec<ModelRecord> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for gateway in &self.inner.order {
            let Some(slot) = self.inner.slots.get(gateway) else {
                continue;
            };
            let Some(cached) = slot.slot.load_full() else {
                continue;
            };
            for record in cached.data.iter() {
                if seen.insert((record.source_gateway.clone(), record.id.clone())) {
                    out.push(record.clone());
                }
            }
        }
        out
    }

    /// Whether one gateway's cached listing contains a model. Used to
    /// filter failover candidates; an unpopulated cache reports `false`.
    pub fn gateway_has_model(&self, gateway: &str, model_id: &str) -> bool {
        let Some(slot) = self.inner.slots.get(gateway) else {
            return false;
        };
        let Some(cached) = slot.slot.load_full() else {
            return false;
        };
        cached.data.iter().any(|r| r.id == model_id)
    }

    /// Synchronous cached lookup of a single record. Used by pricing and
    /// the model-path endpoint; never fetches.
    pub fn find_cached(&self, model_id: &str, gateway_hint: Option<&str>) -> Option<ModelRecord> {
        let search = |gateway: &str| -> Option<ModelRecord> {
            let slot = self.inner.slots.get(gateway)?;
            let cached = slot.slot.load_full()?;
            cached.data.iter().find(|r| r.id == model_id).cloned()
        };
        if let Some(hint) = gateway_hint
            && let Some(record) = search(hint)
        {
            return Some(record);
        }
        self.inner.order.iter().find_map(|gateway| search(gateway))
    }
}

/// Cache-assisted provider detection for the model transformer.
impl CatalogHint for CatalogCache {
    fn gateway_for(&self, model_id: &str) -> Option<String> {
        for gateway in &self.inner.order {
            let Some(slot) = self.inner.slots.get(gateway) else {
                continue;
            };
            let Some(cached) = slot.slot.load_full() else {
                continue;
            };
            if cached.data.iter().any(|r| r.id == model_id) {
                return Some(gateway.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedFetcher {
        gateways: Vec<String>,
        calls: AtomicUsize,
        payload: Box<dyn Fn(&str, usize) -> Vec<serde_json::Value> + Send + Sync>,
    }

    impl ScriptedFetcher {
        fn new(
            gateways: &[&str],
            payload: impl Fn(&str, usize) -> Vec<serde_json::Value> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                gateways: gateways.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
                payload: Box::new(payload),
            })
        }
    }

    #[async_trait]
    impl ModelFetcher for ScriptedFetcher {
        fn gateways(&self) -> Vec<String> {
            self.gateways.clone()
        }
        async fn fetch(&self, gateway: &str) -> Vec<serde_json::Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.payload)(gateway, call)
        }
    }

    fn models(ids: &[&str]) -> Vec<serde_json::Value> {
        ids.iter().map(|id| json!({"id": id})).collect()
    }

    #[tokio::test]
    async fn cold_miss_fetches_synchronously() {
        let fetcher = ScriptedFetcher::new(&["groq"], |_, _| models(&["meta/llama-3"]));
        let cache = CatalogCache::new(fetcher.clone(), ManualPricingTable::default(), Duration::from_secs(3600));
        let data = cache.get("groq").await.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // Fresh hit does not refetch.
        cache.get("groq").await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_gateway_errors() {
        let fetcher = ScriptedFetcher::new(&["groq"], |_, _| Vec::new());
        let cache = CatalogCache::new(fetcher, ManualPricingTable::default(), Duration::from_secs(3600));
        assert!(matches!(
            cache.get("nope").await,
            Err(CatalogError::UnknownGateway(_))
        ));
    }

    #[tokio::test]
    async fn clear_then_get_matches_fresh_listing() {
        let fetcher = ScriptedFetcher::new(&["groq"], |_, call| {
            if call == 0 {
                models(&["meta/llama-3"])
            } else {
                models(&["meta/llama-3", "meta/llama-4"])
            }
        });
        let cache = CatalogCache::new(fetcher, ManualPricingTable::default(), Duration::from_secs(3600));
        assert_eq!(cache.get("groq").await.unwrap().len(), 1);
        cache.clear("groq");
        let after = cache.get("groq").await.unwrap();
        assert_eq!(after.len(), 2);
        assert!(after.iter().any(|r| r.id == "meta/llama-4"));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_stale_entry() {
        let fetcher = ScriptedFetcher::new(&["groq"], |_, call| {
            if call == 0 { models(&["meta/llama-3"]) } else { Vec::new() }
        });
        let cache = CatalogCache::new(fetcher, ManualPricingTable::default(), Duration::from_secs(3600));
        cache.get("groq").await.unwrap();
        cache.refresh("groq").await.unwrap();
        assert_eq!(cache.get("groq").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_refetches_synchronously() {
        let fetcher = ScriptedFetcher::new(&["groq"], |_, call| {
            models(if call == 0 { &["a/one"] } else { &["a/two"] })
        });
        let cache = CatalogCache::new(fetcher.clone(), ManualPricingTable::default(), Duration::from_secs(10));
        cache.get("groq").await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        let data = cache.get("groq").await.unwrap();
        assert_eq!(data[0].id, "a/two");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn revalidation_threshold_serves_stale_and_refreshes_once() {
        let fetcher = ScriptedFetcher::new(&["groq"], |_, call| {
            models(if call == 0 { &["a/one"] } else { &["a/two"] })
        });
        let cache = CatalogCache::new(fetcher.clone(), ManualPricingTable::default(), Duration::from_secs(100));
        cache.get("groq").await.unwrap();
        tokio::time::advance(Duration::from_secs(85)).await;

        // Still served from cache, refresh scheduled in the background.
        let data = cache.get("groq").await.unwrap();
        assert_eq!(data[0].id, "a/one");
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        let data = cache.get("groq").await.unwrap();
        assert_eq!(data[0].id, "a/two");
    }

    #[tokio::test]
    async fn aggregation_dedupes_on_gateway_and_id() {
        let fetcher = ScriptedFetcher::new(&["groq", "together"], |gateway, _| {
            match gateway {
                "groq" => models(&["meta/llama-3", "shared/model"]),
                _ => models(&["shared/model", "mistral/mixtral"]),
            }
        });
        let cache = CatalogCache::new(fetcher, ManualPricingTable::default(), Duration::from_secs(3600));
        cache.get("groq").await.unwrap();
        cache.get("together").await.unwrap();

        let all = cache.aggregate_all();
        // The same id under two gateways is two records.
        assert_eq!(all.len(), 4);
        assert_eq!(all.iter().filter(|r| r.id == "shared/model").count(), 2);

        // Every (gateway, id) pair appears exactly once.
        let mut pairs: Vec<_> = all
            .iter()
            .map(|r| (r.source_gateway.clone(), r.id.clone()))
            .collect();
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), 4);
    }

    #[tokio::test]
    async fn cache_assisted_detection() {
        let fetcher = ScriptedFetcher::new(&["together"], |_, _| models(&["org/custom-model"]));
        let cache = CatalogCache::new(fetcher, ManualPricingTable::default(), Duration::from_secs(3600));
        cache.get("together").await.unwrap();
        assert_eq!(cache.gateway_for("org/custom-model").as_deref(), Some("together"));
        assert_eq!(cache.gateway_for("missing/model"), None);
    }
}
