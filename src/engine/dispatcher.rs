//! Inventory gateway: TTL cache in front of a bounded worker pool.
//!
//! Every lookup checks the cache first; misses are fetched on the pool.
//! Results are cached from inside the pooled task, so a fetch abandoned
//! by a timed-out caller still warms the cache when it completes.

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::metrics::EngineMetrics;
use super::pool::{PoolConfig, PoolStats, WorkerPool};
use crate::cache::{CacheEntry, CacheStats, TtlCache};
use crate::platform::InventorySource;
use crate::types::{
    validate_product_id, Inventory, MinorUnits, ProductId, SalesError, SalesResult, StockLookup,
};

/// Default inventory cache TTL.
pub const DEFAULT_STOCK_CACHE_TTL_SECS: i64 = 60;

pub struct Dispatcher {
    source: Arc<dyn InventorySource>,
    cache: Arc<TtlCache<ProductId, Inventory>>,
    pool: WorkerPool,
    batch_timeout: Duration,
    metrics: Arc<EngineMetrics>,
}

impl Dispatcher {
    pub fn new(
        source: Arc<dyn InventorySource>,
        cache_ttl: ChronoDuration,
        pool: PoolConfig,
        batch_timeout: Duration,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            source,
            cache: Arc::new(TtlCache::new("inventory", cache_ttl)),
            pool: WorkerPool::new("inventory", pool),
            batch_timeout,
            metrics,
        }
    }

    /// Cache-only lookup; never touches the network.
    pub fn cached(&self, product_id: ProductId) -> Option<Inventory> {
        self.cache.get(&product_id)
    }

    /// Cached inventory, or a fresh fetch on the worker pool.
    pub async fn fetch(&self, product_id: ProductId) -> SalesResult<Inventory> {
        Ok(self.fetch_entry(product_id).await?.value)
    }

    /// Like `fetch`, but keeps the time the inventory was read upstream.
    /// A cache hit reports the original capture time, not the lookup time.
    pub async fn fetch_entry(&self, product_id: ProductId) -> SalesResult<CacheEntry<Inventory>> {
        validate_product_id(product_id)?;
        if let Some(entry) = self.cache.get_entry(&product_id) {
            debug!(product_id, captured_at = %entry.captured_at, "Inventory cache hit");
            return Ok(entry);
        }
        self.fetch_uncached(product_id).await
    }

    /// Total stock value (Σ price × qty) for a product.
    pub async fn fetch_total(&self, product_id: ProductId) -> SalesResult<MinorUnits> {
        Ok(self.fetch(product_id).await?.total_value())
    }

    async fn fetch_uncached(&self, product_id: ProductId) -> SalesResult<CacheEntry<Inventory>> {
        let source = Arc::clone(&self.source);
        let cache = Arc::clone(&self.cache);
        self.metrics.record_http_request();

        let fetched = self
            .pool
            .run(async move {
                let inventory = source.fetch_inventory(product_id).await?;
                let captured_at = Utc::now();
                cache.insert_at(product_id, inventory.clone(), captured_at);
                Ok::<_, anyhow::Error>(CacheEntry { value: inventory, captured_at })
            })
            .await?;

        fetched.map_err(|e| {
            self.metrics.record_error();
            warn!(product_id, error = %e, "Inventory fetch failed");
            SalesError::Fetch {
                product_id,
                message: format!("{e:#}"),
            }
        })
    }

    /// Look up many products at once.
    ///
    /// Each id resolves independently; ids still pending when the batch
    /// timeout expires resolve to `Unavailable`.
    pub async fn fetch_batch(&self, product_ids: &[ProductId]) -> HashMap<ProductId, StockLookup> {
        let mut ids = product_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return HashMap::new();
        }

        let deadline = Instant::now() + self.batch_timeout;
        let lookups = ids.iter().map(|&id| async move {
            let lookup = match timeout_at(deadline, self.fetch(id)).await {
                Ok(Ok(inventory)) => StockLookup::Available(inventory),
                Ok(Err(e)) => StockLookup::Unavailable { reason: e.to_string() },
                Err(_) => {
                    warn!(product_id = id, "Inventory lookup timed out in batch");
                    StockLookup::Unavailable { reason: "batch timed out".into() }
                }
            };
            (id, lookup)
        });
        let results: HashMap<_, _> = join_all(lookups).await.into_iter().collect();

        info!(
            requested = ids.len(),
            available = results.values().filter(|l| l.is_available()).count(),
            "Batch inventory lookup complete"
        );
        results
    }

    /// Drop expired cache entries.
    pub fn sweep_cache(&self) -> usize {
        self.cache.sweep()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub async fn shutdown(&self, grace: Duration) {
        self.pool.shutdown(grace).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
