//! Scheduled per-product stock sampling.
//!
//! Each monitored product gets one Tokio task ticking on its own
//! interval. A tick fetches inventory through the dispatcher, turns it
//! into a snapshot and appends it to the store. Failed or empty fetches
//! skip the tick; they are never recorded as zero stock.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::metrics::EngineMetrics;
use crate::store::TimeSeriesStore;
use crate::types::{validate_product_id, MinorUnits, ProductId, SalesError, SalesResult, StockSnapshot};

/// Sampling interval (minutes) suited to an observed hourly depletion rate.
pub fn recommended_interval(hourly_rate: MinorUnits) -> u32 {
    if hourly_rate > 10_000 {
        2
    } else if hourly_rate > 1_000 {
        5
    } else {
        10
    }
}

/// Result of a single sampling tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleOutcome {
    Recorded { total_stock_value: MinorUnits },
    Skipped(String),
}

/// A running schedule; aborting the task cancels it.
struct ScheduleHandle {
    interval_mins: u32,
    started_at: DateTime<Utc>,
    task: JoinHandle<()>,
}

/// What a schedule needs to run a tick, cheap to clone into its task.
#[derive(Clone)]
struct SampleContext {
    dispatcher: Arc<Dispatcher>,
    store: Arc<TimeSeriesStore>,
    metrics: Arc<EngineMetrics>,
}

impl SampleContext {
    async fn sample(&self, product_id: ProductId) -> SalesResult<SampleOutcome> {
        let entry = self.dispatcher.fetch_entry(product_id).await?;
        let (inventory, captured_at) = (entry.value, entry.captured_at);
        if inventory.is_empty() {
            self.metrics.record_skip();
            debug!(product_id, "Inventory has no variants, skipping tick");
            return Ok(SampleOutcome::Skipped("no variants".into()));
        }
        // A cached reading that is already in the history adds nothing.
        if self
            .store
            .latest_timestamp(product_id)
            .is_some_and(|latest| latest >= captured_at)
        {
            self.metrics.record_skip();
            debug!(product_id, %captured_at, "Cached reading already recorded, skipping tick");
            return Ok(SampleOutcome::Skipped("reading already recorded".into()));
        }

        let snapshot = StockSnapshot::from_inventory(&inventory, captured_at);
        let total = snapshot.total_stock_value;
        let (_, variants) = inventory.split();
        self.store.record(product_id, snapshot, variants);
        self.metrics.record_sample();

        debug!(product_id, total_stock_value = total, "Stock snapshot recorded");
        Ok(SampleOutcome::Recorded { total_stock_value: total })
    }
}

pub struct StockSampler {
    ctx: SampleContext,
    schedules: DashMap<ProductId, ScheduleHandle>,
    closed: AtomicBool,
}

impl StockSampler {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        store: Arc<TimeSeriesStore>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            ctx: SampleContext { dispatcher, store, metrics },
            schedules: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Run one tick now, outside any schedule.
    pub async fn sample_once(&self, product_id: ProductId) -> SalesResult<SampleOutcome> {
        validate_product_id(product_id)?;
        self.ctx.sample(product_id).await
    }

    /// Start sampling `product_id` every `interval_mins` minutes.
    ///
    /// Returns `Ok(false)` if the product is already monitored; the
    /// existing schedule is left untouched. Fails with `PoolClosed` once
    /// the sampler is closed. Must be called from within a Tokio runtime.
    pub fn start_monitoring(&self, product_id: ProductId, interval_mins: u32) -> SalesResult<bool> {
        validate_product_id(product_id)?;
        if interval_mins == 0 {
            return Err(SalesError::InvalidInput("interval must be at least one minute".into()));
        }

        match self.schedules.entry(product_id) {
            Entry::Occupied(existing) => {
                debug!(
                    product_id,
                    interval_mins = existing.get().interval_mins,
                    "Already monitoring, ignoring start request"
                );
                Ok(false)
            }
            // Checked under the entry lock so `close` cannot miss a schedule.
            Entry::Vacant(_) if self.is_closed() => Err(SalesError::PoolClosed("sampler")),
            Entry::Vacant(slot) => {
                let period = Duration::from_secs(u64::from(interval_mins) * 60);
                let task = tokio::spawn(run_schedule(self.ctx.clone(), product_id, period));
                slot.insert(ScheduleHandle {
                    interval_mins,
                    started_at: Utc::now(),
                    task,
                });
                info!(product_id, interval_mins, "Started stock monitoring");
                Ok(true)
            }
        }
    }

    /// Cancel a product's schedule. Returns whether one existed.
    pub fn stop_monitoring(&self, product_id: ProductId) -> bool {
        match self.schedules.remove(&product_id) {
            Some((_, handle)) => {
                handle.task.abort();
                info!(
                    product_id,
                    ran_for_mins = (Utc::now() - handle.started_at).num_minutes(),
                    "Stopped stock monitoring"
                );
                true
            }
            None => false,
        }
    }

    pub fn is_monitoring(&self, product_id: ProductId) -> bool {
        self.schedules.contains_key(&product_id)
    }

    /// Interval of the active schedule, if any.
    pub fn interval_of(&self, product_id: ProductId) -> Option<u32> {
        self.schedules.get(&product_id).map(|h| h.interval_mins)
    }

    pub fn monitored_products(&self) -> Vec<ProductId> {
        let mut ids: Vec<_> = self.schedules.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn active_schedules(&self) -> usize {
        self.schedules.len()
    }

    /// Cancel every schedule.
    pub fn stop_all(&self) -> usize {
        let ids = self.monitored_products();
        ids.into_iter().filter(|&id| self.stop_monitoring(id)).count()
    }

    /// Cancel every schedule and refuse new ones. Returns how many stopped.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        self.stop_all()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for StockSampler {
    fn drop(&mut self) {
        for entry in self.schedules.iter() {
            entry.task.abort();
        }
    }
}

/// Tick loop for one product. A failing tick is logged and the loop
/// carries on; only aborting the task ends it.
async fn run_schedule(ctx: SampleContext, product_id: ProductId, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match ctx.sample(product_id).await {
            Ok(SampleOutcome::Recorded { .. }) => {}
            Ok(SampleOutcome::Skipped(reason)) => {
                debug!(product_id, reason = %reason, "Tick skipped");
            }
            Err(e) => {
                ctx.metrics.record_skip();
                warn!(product_id, error = %e, "Stock sampling failed, skipping tick");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
