//! In-memory TTL cache keyed by product id.
//!
//! Uses `DashMap` so readers never contend with writers on other keys.
//! Expired entries stay in the map (inert) until `sweep` runs.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// A cached value with its capture time.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub captured_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    /// Valid while `now - captured_at < ttl`.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.captured_at < ttl
    }
}

/// Hit/miss counters and entry counts for reporting.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub fresh_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate in percent; 0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 * 100.0 / total as f64
        }
    }

    /// Hit rate rendered for logs, e.g. `66.7%`.
    pub fn hit_rate_label(&self) -> String {
        format!("{:.1}%", self.hit_rate())
    }
}

pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    entries: DashMap<K, CacheEntry<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        self.get_entry_at(key, now).map(|entry| entry.value)
    }

    /// Fresh value together with the time it was captured.
    pub fn get_entry(&self, key: &K) -> Option<CacheEntry<V>> {
        self.get_entry_at(key, Utc::now())
    }

    pub fn get_entry_at(&self, key: &K, now: DateTime<Utc>) -> Option<CacheEntry<V>> {
        let fresh = self
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh(self.ttl, now))
            .map(|entry| entry.value().clone());
        match fresh {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        fresh
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, Utc::now());
    }

    pub fn insert_at(&self, key: K, value: V, captured_at: DateTime<Utc>) {
        self.entries.insert(key, CacheEntry { value, captured_at });
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(self.ttl, now));
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        CacheStats {
            entries: self.entries.len(),
            fresh_entries: self
                .entries
                .iter()
                .filter(|e| e.is_fresh(self.ttl, now))
                .count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> TtlCache<u64, i64> {
        TtlCache::new("test", Duration::seconds(60))
    }

    #[test]
    fn test_hit_just_before_ttl() {
        let c = cache();
        let t = Utc::now();
        c.insert_at(1, 500, t);
        let read = t + Duration::seconds(60) - Duration::milliseconds(1);
        assert_eq!(c.get_at(&1, read), Some(500));
    }

    #[test]
    fn test_miss_just_after_ttl() {
        let c = cache();
        let t = Utc::now();
        c.insert_at(1, 500, t);
        let read = t + Duration::seconds(60) + Duration::milliseconds(1);
        assert_eq!(c.get_at(&1, read), None);
    }

    #[test]
    fn test_miss_exactly_at_ttl() {
        let c = cache();
        let t = Utc::now();
        c.insert_at(1, 500, t);
        assert_eq!(c.get_at(&1, t + Duration::seconds(60)), None);
    }

    #[test]
    fn test_expired_entries_are_inert_until_sweep() {
        let c = cache();
        let t = Utc::now();
        c.insert_at(1, 500, t - Duration::seconds(120));
        c.insert_at(2, 700, t);
        assert_eq!(c.get_at(&1, t), None);
        assert_eq!(c.len(), 2);

        assert_eq!(c.sweep_at(t), 1);
        assert_eq!(c.len(), 1);
        assert_eq!(c.get_at(&2, t), Some(700));
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let c = cache();
        c.insert(1, 10);
        let _ = c.get(&1);
        let _ = c.get(&1);
        let _ = c.get(&2);
        let stats = c.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.fresh_entries, 1);
        assert!((stats.hit_rate() - 66.666).abs() < 0.1);
        assert_eq!(stats.hit_rate_label(), "66.7%");
    }

    #[test]
    fn test_hit_rate_label_before_lookups() {
        assert_eq!(cache().stats().hit_rate_label(), "0.0%");
    }

    #[test]
    fn test_entry_keeps_capture_time() {
        let c = cache();
        let t = Utc::now() - Duration::seconds(30);
        c.insert_at(1, 500, t);
        let entry = c.get_entry_at(&1, t + Duration::seconds(10)).unwrap();
        assert_eq!(entry.value, 500);
        assert_eq!(entry.captured_at, t);
        assert!(c.get_entry_at(&1, t + Duration::seconds(60)).is_none());
    }

    #[test]
    fn test_clear() {
        let c = cache();
        c.insert(1, 10);
        c.clear();
        assert!(c.is_empty());
    }
}
