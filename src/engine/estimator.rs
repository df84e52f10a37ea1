//! Sales estimation from sampled stock history.
//!
//! Three independent estimators read the snapshot store:
//! - **stock-delta**: stock value lost between the first and last snapshot
//!   of the window
//! - **rate-extrapolation**: the last hour's depletion rate scaled to the
//!   window length
//! - **peer-reference**: mean of the positive stock figures recorded by
//!   peer entries tracking the same product
//!
//! The combiner takes a confidence-weighted mean of whichever produced a
//! positive figure and reports one tier less confidence than the best of
//! them. All amounts are minor units and negative results clamp to zero.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

use super::peers::PeerDirectory;
use crate::money;
use crate::store::TimeSeriesStore;
use crate::types::{
    validate_product_id, Confidence, EstimationResult, MinorUnits, ProductId, SalesError,
    SalesResult, SkuSales,
};

pub const METHOD_STOCK_DELTA: &str = "stock-delta";
pub const METHOD_RATE: &str = "rate-extrapolation";
pub const METHOD_PEER: &str = "peer-reference";
pub const METHOD_COMBINED: &str = "combined";

const MS_PER_HOUR: i128 = 3_600_000;

/// History depth needed for Medium / Low stock-delta confidence.
const DEPTH_MEDIUM: usize = 10;
const DEPTH_LOW: usize = 3;

/// Peer count needed for Low peer-reference confidence.
const PEERS_LOW: usize = 3;

pub struct EstimationEngine {
    store: Arc<TimeSeriesStore>,
    peers: Arc<dyn PeerDirectory>,
}

impl EstimationEngine {
    pub fn new(store: Arc<TimeSeriesStore>, peers: Arc<dyn PeerDirectory>) -> Self {
        Self { store, peers }
    }

    // -----------------------------------------------------------------------
    // Individual estimators
    // -----------------------------------------------------------------------

    pub fn stock_delta_at(
        &self,
        product_id: ProductId,
        window: Duration,
        now: DateTime<Utc>,
    ) -> EstimationResult {
        let Some((first, last)) = self.store.window_at(product_id, window, now) else {
            return EstimationResult::inapplicable(METHOD_STOCK_DELTA, "fewer than 2 snapshots in window");
        };

        let decrease = money::sub(first.total_stock_value, last.total_stock_value).max(0);
        let depth = self.store.history_len(product_id);
        let confidence = if depth >= DEPTH_MEDIUM {
            Confidence::Medium
        } else if depth >= DEPTH_LOW {
            Confidence::Low
        } else {
            Confidence::VeryLow
        };

        EstimationResult::new(decrease, confidence, METHOD_STOCK_DELTA)
            .with_detail("first_total", first.total_stock_value)
            .with_detail("last_total", last.total_stock_value)
            .with_detail("history_depth", depth)
            .with_detail("window_mins", window.num_minutes())
    }

    /// Stock value depleted per hour, from the first and last snapshot of
    /// the last hour. Zero when there is no positive depletion.
    pub fn hourly_rate_at(&self, product_id: ProductId, now: DateTime<Utc>) -> MinorUnits {
        let Some((first, last)) = self.store.window_at(product_id, Duration::hours(1), now) else {
            return 0;
        };
        let elapsed_ms = (last.timestamp - first.timestamp).num_milliseconds();
        let decrease = money::sub(first.total_stock_value, last.total_stock_value);
        if elapsed_ms <= 0 || decrease <= 0 {
            return 0;
        }
        money::narrow(i128::from(decrease) * MS_PER_HOUR / i128::from(elapsed_ms))
    }

    pub fn rate_extrapolation_at(
        &self,
        product_id: ProductId,
        window: Duration,
        now: DateTime<Utc>,
    ) -> EstimationResult {
        let rate = self.hourly_rate_at(product_id, now);
        if rate <= 0 {
            return EstimationResult::inapplicable(METHOD_RATE, "no positive hourly rate");
        }
        let hours = window.num_hours().max(1);
        EstimationResult::new(money::mul(rate, hours), Confidence::Low, METHOD_RATE)
            .with_detail("hourly_rate", rate)
            .with_detail("window_hours", hours)
    }

    pub fn peer_reference(&self, product_id: ProductId) -> EstimationResult {
        let stocks: Vec<i64> = self
            .peers
            .entries_for(product_id)
            .into_iter()
            .filter_map(|e| e.stock)
            .filter(|&s| s > 0)
            .collect();
        if stocks.is_empty() {
            return EstimationResult::inapplicable(METHOD_PEER, "no peer stock figures");
        }

        let sum: i128 = stocks.iter().map(|&s| i128::from(s)).sum();
        let mean = money::narrow(sum / stocks.len() as i128);
        let confidence = if stocks.len() >= PEERS_LOW {
            Confidence::Low
        } else {
            Confidence::VeryLow
        };
        EstimationResult::new(mean, confidence, METHOD_PEER).with_detail("peers", stocks.len())
    }

    // -----------------------------------------------------------------------
    // Combination
    // -----------------------------------------------------------------------

    /// Confidence-weighted mean of the contributing results.
    pub fn combine(results: &[EstimationResult]) -> EstimationResult {
        let contributors: Vec<&EstimationResult> = results.iter().filter(|r| r.contributes()).collect();
        let Some(best) = contributors.iter().map(|r| r.confidence).max() else {
            return EstimationResult::no_data();
        };

        let (weighted, weights) = contributors.iter().fold((0i128, 0i128), |(sum, w), r| {
            let weight = i128::from(r.confidence.weight());
            (sum + i128::from(r.estimated_amount) * weight, w + weight)
        });
        let amount = money::narrow(weighted / weights);

        let methods: Vec<&str> = contributors.iter().map(|r| r.method.as_str()).collect();
        let mut combined = EstimationResult::new(amount, best.downgraded(), METHOD_COMBINED)
            .with_detail("contributors", json!(methods));
        for r in &contributors {
            combined = combined.with_detail(&r.method, r.estimated_amount);
        }
        combined
    }

    /// Combined estimate of sales over `window` ending at `now`.
    pub fn estimate_at(
        &self,
        product_id: ProductId,
        window: Duration,
        now: DateTime<Utc>,
    ) -> SalesResult<EstimationResult> {
        validate_product_id(product_id)?;
        validate_window(window)?;

        let parts = [
            self.stock_delta_at(product_id, window, now),
            self.rate_extrapolation_at(product_id, window, now),
            self.peer_reference(product_id),
        ];
        let combined = Self::combine(&parts);
        debug!(
            product_id,
            estimate = combined.estimated_amount,
            confidence = ?combined.confidence,
            "Sales estimated"
        );
        Ok(combined)
    }

    pub fn estimate(&self, product_id: ProductId, window: Duration) -> SalesResult<EstimationResult> {
        self.estimate_at(product_id, window, Utc::now())
    }

    // -----------------------------------------------------------------------
    // Per-variant breakdown & report
    // -----------------------------------------------------------------------

    /// Units and value sold per variant over the window, largest first.
    ///
    /// Only variants present in the latest variant map and in both window
    /// boundary snapshots are reported.
    pub fn sku_breakdown_at(
        &self,
        product_id: ProductId,
        window: Duration,
        now: DateTime<Utc>,
    ) -> SalesResult<Vec<SkuSales>> {
        validate_product_id(product_id)?;
        validate_window(window)?;

        let (Some((first, last)), Some(variants)) = (
            self.store.window_at(product_id, window, now),
            self.store.variants(product_id),
        ) else {
            return Ok(Vec::new());
        };

        let mut sales: Vec<SkuSales> = variants
            .values()
            .filter_map(|info| {
                let before = *first.per_variant_stock.get(&info.variant_id)?;
                let after = *last.per_variant_stock.get(&info.variant_id)?;
                let sold_qty = money::sub(before, after).max(0);
                Some(SkuSales {
                    variant_id: info.variant_id.clone(),
                    display_name: info.display_name.clone(),
                    sold_qty,
                    sold_value: money::mul(info.unit_price, sold_qty),
                })
            })
            .collect();
        sales.sort_by(|a, b| {
            b.sold_value
                .cmp(&a.sold_value)
                .then_with(|| a.variant_id.cmp(&b.variant_id))
        });
        Ok(sales)
    }

    pub fn sku_breakdown(&self, product_id: ProductId, window: Duration) -> SalesResult<Vec<SkuSales>> {
        self.sku_breakdown_at(product_id, window, Utc::now())
    }

    pub fn analysis_report_at(
        &self,
        product_id: ProductId,
        window: Duration,
        now: DateTime<Utc>,
    ) -> SalesResult<String> {
        let result = self.estimate_at(product_id, window, now)?;
        let skus = self.sku_breakdown_at(product_id, window, now)?;

        let mut out = String::new();
        let _ = writeln!(out, "=== Sales analysis ===");
        let _ = writeln!(out, "Product: {product_id}");
        let _ = writeln!(out, "Window: {} min", window.num_minutes());
        let _ = writeln!(out, "Estimated sales: {} (minor units)", result.estimated_amount);
        let _ = writeln!(out, "Confidence: {}", result.confidence);
        let _ = writeln!(out, "Method: {}", result.method);
        if !result.details.is_empty() {
            let _ = writeln!(out, "Details:");
            for (key, value) in &result.details {
                let _ = writeln!(out, "  {key}: {value}");
            }
        }
        if !skus.is_empty() {
            let _ = writeln!(out, "Per-variant sales:");
            for s in &skus {
                let _ = writeln!(
                    out,
                    "  {} ({}): {} sold, {} minor units",
                    s.display_name, s.variant_id, s.sold_qty, s.sold_value
                );
            }
        }
        Ok(out)
    }

    pub fn analysis_report(&self, product_id: ProductId, window: Duration) -> SalesResult<String> {
        self.analysis_report_at(product_id, window, Utc::now())
    }
}

pub(crate) fn validate_window(window: Duration) -> SalesResult<()> {
    if window <= Duration::zero() {
        return Err(SalesError::InvalidInput("window must be positive".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
