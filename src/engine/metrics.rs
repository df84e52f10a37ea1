//! Process-wide request/error counters.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Error-rate alarm only arms after this many requests.
const ERROR_RATE_MIN_REQUESTS: u64 = 100;

/// Error rate (percent) above which the periodic report warns.
const ERROR_RATE_WARN_PCT: f64 = 10.0;

#[derive(Debug, Default)]
pub struct EngineMetrics {
    http_requests: AtomicU64,
    errors: AtomicU64,
    samples_recorded: AtomicU64,
    samples_skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub http_requests: u64,
    pub errors: u64,
    pub samples_recorded: u64,
    pub samples_skipped: u64,
    pub error_rate_pct: f64,
}

impl EngineMetrics {
    pub fn record_http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample(&self) {
        self.samples_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.samples_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let http_requests = self.http_requests.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        MetricsSnapshot {
            http_requests,
            errors,
            samples_recorded: self.samples_recorded.load(Ordering::Relaxed),
            samples_skipped: self.samples_skipped.load(Ordering::Relaxed),
            error_rate_pct: if http_requests == 0 {
                0.0
            } else {
                errors as f64 * 100.0 / http_requests as f64
            },
        }
    }

    /// Warn when the error rate is high enough to look like an outage.
    pub fn check_error_rate(&self) -> bool {
        let snap = self.snapshot();
        let alarming = snap.http_requests > ERROR_RATE_MIN_REQUESTS
            && snap.error_rate_pct > ERROR_RATE_WARN_PCT;
        if alarming {
            warn!(
                error_rate = format!("{:.1}%", snap.error_rate_pct),
                requests = snap.http_requests,
                "Error rate is high, check upstream availability"
            );
        }
        alarming
    }

    pub fn reset(&self) {
        self.http_requests.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.samples_recorded.store(0, Ordering::Relaxed);
        self.samples_skipped.store(0, Ordering::Relaxed);
    }
}
