//! Bounded worker pool for network fetches.
//!
//! A fixed number of workers plus a bounded queue, both modelled with
//! Tokio semaphores. When workers and queue are all taken, the submitting
//! caller runs the task itself instead of dropping it.
//!
//! A caller that stops waiting (timeout, dropped future) does not cancel
//! the pooled task; it runs to completion and its result is discarded.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use crate::types::{SalesError, SalesResult};

/// Upper bound for both worker and queue counts.
pub const MAX_POOL_SIZE: usize = 10_000;

/// Pool sizing.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub active: usize,
    pub queued: usize,
    pub submitted: u64,
    pub completed: u64,
    pub caller_runs: u64,
}

pub struct WorkerPool {
    name: &'static str,
    config: PoolConfig,
    /// Worker + queue slots; exhausting these triggers caller-runs.
    slots: Arc<Semaphore>,
    /// Concurrently executing tasks.
    workers: Arc<Semaphore>,
    stop_tx: watch::Sender<bool>,
    closed: AtomicBool,
    submitted: AtomicU64,
    completed: Arc<AtomicU64>,
    caller_runs: AtomicU64,
}

impl WorkerPool {
    pub fn new(name: &'static str, config: PoolConfig) -> Self {
        let config = PoolConfig {
            workers: config.workers.clamp(1, MAX_POOL_SIZE),
            queue_capacity: config.queue_capacity.min(MAX_POOL_SIZE),
        };
        let (stop_tx, _) = watch::channel(false);
        Self {
            name,
            config,
            slots: Arc::new(Semaphore::new(config.workers + config.queue_capacity)),
            workers: Arc::new(Semaphore::new(config.workers)),
            stop_tx,
            closed: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
            completed: Arc::new(AtomicU64::new(0)),
            caller_runs: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Run `task` on the pool and wait for its output.
    ///
    /// Falls back to running on the caller when the pool is saturated.
    pub async fn run<F, T>(&self, task: F) -> SalesResult<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shut_down() {
            return Err(SalesError::PoolClosed(self.name));
        }
        self.submitted.fetch_add(1, Ordering::Relaxed);

        let slot = match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(slot) => slot,
            Err(TryAcquireError::NoPermits) => {
                self.caller_runs.fetch_add(1, Ordering::Relaxed);
                debug!(pool = self.name, "Pool saturated, running on caller");
                let out = task.await;
                self.completed.fetch_add(1, Ordering::Relaxed);
                return Ok(out);
            }
            Err(TryAcquireError::Closed) => return Err(SalesError::PoolClosed(self.name)),
        };

        let workers = Arc::clone(&self.workers);
        let completed = Arc::clone(&self.completed);
        let mut stop_rx = self.stop_tx.subscribe();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let _slot = slot;
            let Ok(_worker) = workers.acquire_owned().await else {
                return;
            };
            tokio::select! {
                out = task => {
                    completed.fetch_add(1, Ordering::Relaxed);
                    let _ = tx.send(out);
                }
                _ = stop_rx.wait_for(|stop| *stop) => {}
            }
        });

        rx.await.map_err(|_| SalesError::PoolClosed(self.name))
    }

    pub fn stats(&self) -> PoolStats {
        let capacity = self.config.workers + self.config.queue_capacity;
        let in_flight = capacity.saturating_sub(self.slots.available_permits());
        let active = self
            .config
            .workers
            .saturating_sub(self.workers.available_permits())
            .min(in_flight);
        PoolStats {
            active,
            queued: in_flight - active,
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            caller_runs: self.caller_runs.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work, wait up to `grace` for in-flight tasks, then
    /// force-stop whatever is left. Safe to call more than once.
    pub async fn shutdown(&self, grace: Duration) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(pool = self.name, "Shutting down worker pool");

        let capacity = u32::try_from(self.config.workers + self.config.queue_capacity).unwrap_or(u32::MAX);
        match tokio::time::timeout(grace, self.slots.acquire_many(capacity)).await {
            Ok(Ok(permits)) => permits.forget(),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!(pool = self.name, "Grace period elapsed, force-stopping pool tasks");
                let _ = self.stop_tx.send(true);
            }
        }
        self.slots.close();
        self.workers.close();
        info!(pool = self.name, "Worker pool stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn pool(workers: usize, queue: usize) -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new("test", PoolConfig { workers, queue_capacity: queue }))
    }

    #[tokio::test]
    async fn test_runs_task_and_returns_output() {
        let p = pool(2, 2);
        let out = p.run(async { 21 * 2 }).await.unwrap();
        assert_eq!(out, 42);
        let stats = p.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.caller_runs, 0);
    }

    #[tokio::test]
    async fn test_saturated_pool_runs_on_caller() {
        let p = pool(1, 1);
        let gate = Arc::new(Semaphore::new(0));

        // Occupy the single worker and the single queue slot.
        let mut blockers = Vec::new();
        for _ in 0..2 {
            let p = Arc::clone(&p);
            let gate = Arc::clone(&gate);
            blockers.push(tokio::spawn(async move {
                p.run(async move {
                    let _ = gate.acquire().await;
                })
                .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let out = p.run(async { "inline" }).await.unwrap();
        assert_eq!(out, "inline");
        assert_eq!(p.stats().caller_runs, 1);

        gate.add_permits(2);
        for b in blockers {
            let _ = b.await;
        }
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_workers() {
        let p = pool(2, 10);
        let started = Instant::now();
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let p = Arc::clone(&p);
                tokio::spawn(async move {
                    p.run(tokio::time::sleep(Duration::from_millis(100))).await
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        // 4 tasks on 2 workers need at least two rounds.
        assert!(started.elapsed() >= Duration::from_millis(190));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_rejects_work() {
        let p = pool(2, 2);
        p.shutdown(Duration::from_secs(1)).await;
        p.shutdown(Duration::from_secs(1)).await;
        assert!(p.is_shut_down());
        assert!(matches!(p.run(async { 1 }).await, Err(SalesError::PoolClosed("test"))));
    }

    #[tokio::test]
    async fn test_oversized_config_is_clamped() {
        let p = pool(usize::MAX, usize::MAX);
        assert_eq!(p.run(async { 7 }).await.unwrap(), 7);

        let started = Instant::now();
        p.shutdown(Duration::from_secs(1)).await;
        // Every slot is free, so draining does not wait out the grace period.
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(p.is_shut_down());
    }

    #[tokio::test]
    async fn test_shutdown_force_stops_after_grace() {
        let p = pool(1, 0);
        let runner = {
            let p = Arc::clone(&p);
            tokio::spawn(async move {
                p.run(tokio::time::sleep(Duration::from_secs(60))).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        p.shutdown(Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(5));

        let res = runner.await.unwrap();
        assert!(matches!(res, Err(SalesError::PoolClosed(_))));
    }
}
