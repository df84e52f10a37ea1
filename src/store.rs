//! Bounded, retention-limited per-product snapshot history.
//!
//! Each product's history is kept in timestamp order, capped in length
//! and trimmed to the retention window on every append. A periodic
//! `sweep` trims all products and drops the ones left empty.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::types::{ProductId, StockSnapshot, VariantInfo};

/// Default maximum snapshots kept per product.
pub const DEFAULT_HISTORY_CAP: usize = 50;

/// Default retention window (24h).
pub const DEFAULT_RETENTION_HOURS: i64 = 24;

#[derive(Debug, Default)]
struct ProductHistory {
    snapshots: VecDeque<StockSnapshot>,
}

impl ProductHistory {
    /// Insert keeping timestamp order; equal timestamps keep arrival order.
    fn insert(&mut self, snapshot: StockSnapshot) {
        let at = self
            .snapshots
            .partition_point(|s| s.timestamp <= snapshot.timestamp);
        self.snapshots.insert(at, snapshot);
    }

    fn trim(&mut self, cap: usize, cutoff: DateTime<Utc>) {
        while self
            .snapshots
            .front()
            .is_some_and(|s| s.timestamp < cutoff)
        {
            self.snapshots.pop_front();
        }
        while self.snapshots.len() > cap {
            self.snapshots.pop_front();
        }
    }

    fn in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> impl Iterator<Item = &StockSnapshot> {
        self.snapshots
            .iter()
            .filter(move |s| s.timestamp >= from && s.timestamp <= to)
    }
}

/// Concurrent snapshot store shared by the sampler and the estimators.
pub struct TimeSeriesStore {
    histories: DashMap<ProductId, ProductHistory>,
    variants: DashMap<ProductId, HashMap<String, VariantInfo>>,
    cap: usize,
    retention: Duration,
}

impl Default for TimeSeriesStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP, Duration::hours(DEFAULT_RETENTION_HOURS))
    }
}

impl TimeSeriesStore {
    pub fn new(cap: usize, retention: Duration) -> Self {
        Self {
            histories: DashMap::new(),
            variants: DashMap::new(),
            cap: cap.max(1),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn append(&self, product_id: ProductId, snapshot: StockSnapshot) {
        self.append_at(product_id, snapshot, Utc::now());
    }

    /// Append, then enforce cap and retention relative to `now`.
    pub fn append_at(&self, product_id: ProductId, snapshot: StockSnapshot, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        let len = {
            let mut history = self.histories.entry(product_id).or_default();
            history.insert(snapshot);
            history.trim(self.cap, cutoff);
            history.snapshots.len()
        };
        // A snapshot older than retention can leave the history empty again.
        if len == 0 {
            self.histories
                .remove_if(&product_id, |_, h| h.snapshots.is_empty());
        }
    }

    /// Append a snapshot and replace the product's variant metadata.
    pub fn record(
        &self,
        product_id: ProductId,
        snapshot: StockSnapshot,
        variants: HashMap<String, VariantInfo>,
    ) {
        self.append(product_id, snapshot);
        self.variants.insert(product_id, variants);
    }

    /// First and last snapshot within `[now - duration, now]`.
    ///
    /// `None` unless at least two snapshots fall inside the window.
    pub fn window(
        &self,
        product_id: ProductId,
        duration: Duration,
    ) -> Option<(StockSnapshot, StockSnapshot)> {
        self.window_at(product_id, duration, Utc::now())
    }

    pub fn window_at(
        &self,
        product_id: ProductId,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Option<(StockSnapshot, StockSnapshot)> {
        let history = self.histories.get(&product_id)?;
        let from = now.checked_sub_signed(duration).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut inside = history.in_range(from, now);
        let first = inside.next()?;
        let last = inside.last()?;
        Some((first.clone(), last.clone()))
    }

    /// Snapshots with `timestamp >= since`, oldest first.
    pub fn snapshots_since(&self, product_id: ProductId, since: DateTime<Utc>) -> Vec<StockSnapshot> {
        self.histories
            .get(&product_id)
            .map(|h| {
                h.snapshots
                    .iter()
                    .filter(|s| s.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn history_len(&self, product_id: ProductId) -> usize {
        self.histories
            .get(&product_id)
            .map(|h| h.snapshots.len())
            .unwrap_or(0)
    }

    /// Timestamp of the newest snapshot held for a product.
    pub fn latest_timestamp(&self, product_id: ProductId) -> Option<DateTime<Utc>> {
        self.histories
            .get(&product_id)
            .and_then(|h| h.snapshots.back().map(|s| s.timestamp))
    }

    /// Latest variant metadata for a product.
    pub fn variants(&self, product_id: ProductId) -> Option<HashMap<String, VariantInfo>> {
        self.variants.get(&product_id).map(|v| v.clone())
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// Remove expired snapshots everywhere; drop products left empty.
    /// Returns the number of products removed.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let before = self.histories.len();
        self.histories.retain(|_, history| {
            history.trim(self.cap, cutoff);
            !history.snapshots.is_empty()
        });
        self.variants
            .retain(|id, _| self.histories.contains_key(id));
        let removed = before.saturating_sub(self.histories.len());
        debug!(
            products = self.histories.len(),
            removed,
            "Snapshot sweep complete"
        );
        removed
    }

    pub fn product_count(&self) -> usize {
        self.histories.len()
    }

    pub fn total_records(&self) -> usize {
        self.histories.iter().map(|h| h.snapshots.len()).sum()
    }

    pub fn clear(&self) {
        self.histories.clear();
        self.variants.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
