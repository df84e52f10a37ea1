//! Core engine: sample → store → estimate, with a web cross-check.
//!
//! `SalesEngine` is constructed explicitly and shared behind an `Arc`.
//! It wires the inventory gateway, the sampler, the estimators and the
//! web extractor together, runs the maintenance loop and owns shutdown.

pub mod dispatcher;
pub mod estimator;
pub mod metrics;
pub mod peers;
pub mod pool;
pub mod sampler;
pub mod web;

use anyhow::Context;
use chrono::Duration as ChronoDuration;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::cache::CacheStats;
use crate::config::AppConfig;
use crate::platform::weidian::{WeidianInventoryClient, WeidianPageClient};
use crate::platform::{FeeSource, InventorySource, PageSource};
use crate::store::TimeSeriesStore;
use crate::types::{
    EstimationResult, ProductId, SalesResult, SkuSales, StockLookup, WebSalesData,
};
use dispatcher::Dispatcher;
use estimator::EstimationEngine;
use metrics::{EngineMetrics, MetricsSnapshot};
use peers::{FeeResolver, PeerDirectory, PeerTotal, StaticPeers};
use pool::{PoolConfig, PoolStats};
use sampler::{recommended_interval, StockSampler};
use web::WebFallbackExtractor;

/// Accuracy below which the report suggests sampling more often.
const LOW_ACCURACY: f64 = 0.7;

/// Confidence weight below which the report suggests more history.
const LOW_CONFIDENCE_WEIGHT: u32 = 70;

/// Point-in-time view of the whole engine.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    pub tracked_products: usize,
    pub total_snapshots: usize,
    pub monitored_products: usize,
    pub inventory_cache: CacheStats,
    pub web_cache: CacheStats,
    pub gateway_pool: PoolStats,
    pub web_pool: PoolStats,
    pub metrics: MetricsSnapshot,
}

/// Components shared with the maintenance task.
#[derive(Clone)]
struct Parts {
    store: Arc<TimeSeriesStore>,
    dispatcher: Arc<Dispatcher>,
    sampler: Arc<StockSampler>,
    web: Arc<WebFallbackExtractor>,
    metrics: Arc<EngineMetrics>,
}

impl Parts {
    fn stats(&self) -> EngineStats {
        EngineStats {
            tracked_products: self.store.product_count(),
            total_snapshots: self.store.total_records(),
            monitored_products: self.sampler.active_schedules(),
            inventory_cache: self.dispatcher.cache_stats(),
            web_cache: self.web.cache_stats(),
            gateway_pool: self.dispatcher.pool_stats(),
            web_pool: self.web.pool_stats(),
            metrics: self.metrics.snapshot(),
        }
    }

    fn sweep(&self) {
        let products_removed = self.store.sweep();
        let inventory_expired = self.dispatcher.sweep_cache();
        let web_expired = self.web.sweep_cache();
        info!(
            products_removed,
            inventory_expired,
            web_expired,
            "Maintenance sweep complete"
        );
    }

    fn report(&self) {
        let s = self.stats();
        info!(
            tracked = s.tracked_products,
            snapshots = s.total_snapshots,
            monitored = s.monitored_products,
            requests = s.metrics.http_requests,
            errors = s.metrics.errors,
            inventory_hit_rate = %s.inventory_cache.hit_rate_label(),
            web_hit_rate = %s.web_cache.hit_rate_label(),
            gateway_active = s.gateway_pool.active,
            gateway_queued = s.gateway_pool.queued,
            "Engine report"
        );
        self.metrics.check_error_rate();
    }
}

pub struct SalesEngine {
    config: AppConfig,
    parts: Parts,
    estimator: Arc<EstimationEngine>,
    peers: Arc<dyn PeerDirectory>,
    fees: FeeResolver,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl SalesEngine {
    pub fn new(
        config: AppConfig,
        inventory: Arc<dyn InventorySource>,
        pages: Arc<dyn PageSource>,
        peers: Arc<dyn PeerDirectory>,
        fees: Option<Arc<dyn FeeSource>>,
    ) -> SalesResult<Self> {
        config.validate()?;

        let metrics = Arc::new(EngineMetrics::default());
        let store = Arc::new(TimeSeriesStore::new(
            config.sampler.history_cap,
            ChronoDuration::hours(config.sampler.retention_hours),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            inventory,
            ChronoDuration::seconds(config.gateway.cache_ttl_secs),
            PoolConfig {
                workers: config.gateway.workers,
                queue_capacity: config.gateway.queue_capacity,
            },
            Duration::from_secs(config.gateway.batch_timeout_secs),
            Arc::clone(&metrics),
        ));
        let sampler = Arc::new(StockSampler::new(
            Arc::clone(&dispatcher),
            Arc::clone(&store),
            Arc::clone(&metrics),
        ));
        let web = Arc::new(WebFallbackExtractor::new(pages, &config.web, Arc::clone(&metrics))?);
        let estimator = Arc::new(EstimationEngine::new(Arc::clone(&store), Arc::clone(&peers)));

        Ok(Self {
            config,
            parts: Parts { store, dispatcher, sampler, web, metrics },
            estimator,
            peers,
            fees: FeeResolver::new(fees),
            maintenance: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Engine backed by the live Weidian clients and the configured peers.
    ///
    /// No exact-fee source is wired in; peers with credentials resolve to
    /// zero until one is supplied through `new`.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let inventory = WeidianInventoryClient::new(Duration::from_secs(config.gateway.request_timeout_secs))?;
        let pages = WeidianPageClient::new(Duration::from_secs(config.web.request_timeout_secs))?;
        let peers = StaticPeers::new(config.peer_entries());
        Self::new(config, Arc::new(inventory), Arc::new(pages), Arc::new(peers), None)
            .context("Failed to build sales engine")
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &TimeSeriesStore {
        &self.parts.store
    }

    pub fn estimator(&self) -> &EstimationEngine {
        &self.estimator
    }

    // -----------------------------------------------------------------------
    // Estimation
    // -----------------------------------------------------------------------

    pub fn estimate(&self, product_id: ProductId, window: ChronoDuration) -> SalesResult<EstimationResult> {
        self.estimator.estimate(product_id, window)
    }

    pub fn sku_breakdown(&self, product_id: ProductId, window: ChronoDuration) -> SalesResult<Vec<SkuSales>> {
        self.estimator.sku_breakdown(product_id, window)
    }

    pub fn analysis_report(&self, product_id: ProductId, window: ChronoDuration) -> SalesResult<String> {
        self.estimator.analysis_report(product_id, window)
    }

    /// Fee totals for every configured peer.
    pub async fn peer_totals(&self) -> Vec<PeerTotal> {
        self.fees.resolve_all(self.peers.as_ref(), &self.estimator).await
    }

    // -----------------------------------------------------------------------
    // Monitoring
    // -----------------------------------------------------------------------

    pub fn start_monitoring(&self, product_id: ProductId, interval_mins: u32) -> SalesResult<bool> {
        self.parts.sampler.start_monitoring(product_id, interval_mins)
    }

    /// Start monitoring at an interval picked from the observed rate.
    /// Returns the interval in effect, which is the existing one if the
    /// product was already monitored.
    pub fn start_smart_monitoring(&self, product_id: ProductId) -> SalesResult<u32> {
        let interval = self.recommended_interval(product_id);
        if self.parts.sampler.start_monitoring(product_id, interval)? {
            info!(product_id, interval_mins = interval, "Smart monitoring interval chosen");
            return Ok(interval);
        }
        Ok(self.parts.sampler.interval_of(product_id).unwrap_or(interval))
    }

    pub fn recommended_interval(&self, product_id: ProductId) -> u32 {
        recommended_interval(self.estimator.hourly_rate_at(product_id, chrono::Utc::now()))
    }

    pub fn stop_monitoring(&self, product_id: ProductId) -> bool {
        self.parts.sampler.stop_monitoring(product_id)
    }

    /// Interval of the product's active schedule.
    pub fn monitoring_interval(&self, product_id: ProductId) -> Option<u32> {
        self.parts.sampler.interval_of(product_id)
    }

    pub fn is_monitoring(&self, product_id: ProductId) -> bool {
        self.parts.sampler.is_monitoring(product_id)
    }

    pub fn monitored_products(&self) -> Vec<ProductId> {
        self.parts.sampler.monitored_products()
    }

    /// Take one sample immediately.
    pub async fn sample_once(&self, product_id: ProductId) -> SalesResult<sampler::SampleOutcome> {
        self.parts.sampler.sample_once(product_id).await
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub async fn stock_batch(&self, product_ids: &[ProductId]) -> HashMap<ProductId, StockLookup> {
        self.parts.dispatcher.fetch_batch(product_ids).await
    }

    pub async fn web_sales(&self, product_id: ProductId) -> SalesResult<WebSalesData> {
        self.parts.web.web_sales(product_id).await
    }

    pub async fn web_sales_batch(&self, product_ids: &[ProductId]) -> HashMap<ProductId, WebSalesData> {
        self.parts.web.web_sales_batch(product_ids).await
    }

    /// Cross-check the estimate against the web count and render a report
    /// with suggestions.
    pub async fn validate_accuracy(&self, product_id: ProductId, window: ChronoDuration) -> SalesResult<String> {
        let estimate = self.estimator.estimate(product_id, window)?;
        let cmp = self
            .parts
            .web
            .compare(product_id, estimate.estimated_amount, window)
            .await?;

        let mut out = String::new();
        let _ = writeln!(out, "=== Sales accuracy check ===");
        let _ = writeln!(out, "Product: {product_id}");
        let _ = writeln!(out, "Window: {} min", window.num_minutes());

        let _ = writeln!(out, "\n[Estimate]");
        let _ = writeln!(out, "Estimated sales: {} (minor units)", estimate.estimated_amount);
        let _ = writeln!(out, "Confidence: {}", estimate.confidence);
        let _ = writeln!(out, "Method: {}", estimate.method);

        let _ = writeln!(out, "\n[Web data]");
        if cmp.web_valid {
            let _ = writeln!(out, "Web sales count: {} units", cmp.web_sales_count);
            let _ = writeln!(out, "Accuracy: {} ({:.1}%)", cmp.accuracy_level(), cmp.accuracy * 100.0);
            let _ = writeln!(out, "Analysis: {}", cmp.analysis);
        } else {
            let _ = writeln!(out, "Web data unavailable: {}", cmp.analysis);
        }

        let _ = writeln!(out, "\n[Suggestions]");
        let mut suggested = false;
        if cmp.accuracy < LOW_ACCURACY {
            let _ = writeln!(out, "- Sample more often to improve accuracy");
            let _ = writeln!(out, "- Compare readings from several points in time");
            suggested = true;
        }
        if estimate.confidence.weight() < LOW_CONFIDENCE_WEIGHT {
            let _ = writeln!(out, "- Collect more history to raise estimate confidence");
            suggested = true;
        }
        if !suggested {
            let _ = writeln!(out, "- None");
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> EngineStats {
        self.parts.stats()
    }

    /// Spawn the sweep/report loop. Idempotent; must run inside a runtime.
    pub fn start_maintenance(&self) {
        let Ok(mut slot) = self.maintenance.lock() else {
            warn!("Maintenance handle lock poisoned");
            return;
        };
        if slot.is_some() || self.is_shut_down() {
            return;
        }

        let parts = self.parts.clone();
        let cleanup_every = Duration::from_secs(self.config.maintenance.cleanup_interval_secs);
        let report_every = Duration::from_secs(self.config.maintenance.report_interval_secs);
        *slot = Some(tokio::spawn(async move {
            let mut cleanup = tokio::time::interval(cleanup_every);
            let mut report = tokio::time::interval(report_every);
            cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);
            report.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the immediate first ticks.
            cleanup.tick().await;
            report.tick().await;
            loop {
                tokio::select! {
                    _ = cleanup.tick() => parts.sweep(),
                    _ = report.tick() => parts.report(),
                }
            }
        }));
        info!(
            cleanup_interval_secs = cleanup_every.as_secs(),
            report_interval_secs = report_every.as_secs(),
            "Maintenance loop started"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop schedules and maintenance, drop all state, then drain both
    /// pools within the configured grace period. Safe to call twice.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down sales engine");

        let stopped = self.parts.sampler.close();
        if let Ok(mut slot) = self.maintenance.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }

        self.parts.store.clear();
        self.parts.dispatcher.clear_cache();
        self.parts.web.clear_cache();

        let grace = Duration::from_secs(self.config.maintenance.shutdown_grace_secs);
        tokio::join!(
            self.parts.dispatcher.shutdown(grace),
            self.parts.web.shutdown(grace),
        );
        info!(schedules_stopped = stopped, "Sales engine shut down");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
