//! The bounded background refresh queue.
//!
//! `warm` and `invalidate` hand keys to this queue and return immediately. A fixed set of worker
//! tasks drains it. When the queue is full the key is dropped; the next foreground read of that
//! key fills it instead.

use crate::cache::CategoryTotalsKey;
use crate::error::CoreResult;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace, warn};

/// Counters for the refresh queue since the cache was created.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct RefreshStats {
    /// Keys accepted by the queue.
    pub scheduled: u64,
    /// Jobs that finished with the key present.
    pub completed: u64,
    /// Jobs whose upstream fetch failed.
    pub failed: u64,
    /// Keys turned away because the queue was full or closed.
    pub dropped: u64,
    /// Keys accepted but discarded because the cache was gone by the time they were dequeued.
    pub abandoned: u64,
}

impl RefreshStats {
    /// Jobs accepted but not yet finished.
    pub fn outstanding(&self) -> u64 {
        self.scheduled
            .saturating_sub(self.completed)
            .saturating_sub(self.failed)
            .saturating_sub(self.abandoned)
    }
}

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    abandoned: AtomicU64,
}

#[derive(Debug)]
pub(super) struct RefreshQueue {
    tx: mpsc::Sender<CategoryTotalsKey>,
    counters: Arc<Counters>,
}

impl RefreshQueue {
    /// Creates the queue and starts `workers` tasks on the current tokio runtime. Each job is
    /// handed to `run`. When `run` returns `None` the owner is gone; the worker keeps draining
    /// and counting what is left until the channel closes.
    pub(super) fn start<F, Fut>(depth: usize, workers: usize, run: F) -> Self
    where
        F: Fn(CategoryTotalsKey) -> Option<Fut> + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<()>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let counters = Arc::new(Counters::default());
        let rx = Arc::new(Mutex::new(rx));
        let run = Arc::new(run);
        for worker in 0..workers.max(1) {
            let rx = rx.clone();
            let run = run.clone();
            let counters = counters.clone();
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(key) = next else { break };
                    let Some(job) = run(key) else {
                        counters.abandoned.fetch_add(1, Ordering::Relaxed);
                        trace!("Refresh worker {worker} discarding {key:?}");
                        continue;
                    };
                    trace!("Refresh worker {worker} filling {key:?}");
                    match job.await {
                        Ok(()) => {
                            counters.completed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            warn!("Background refresh of {key:?} failed: {e}");
                        }
                    }
                }
                debug!("Refresh worker {worker} stopped");
            });
        }
        Self { tx, counters }
    }

    /// Enqueues `key` without waiting. Returns false if it was dropped.
    pub(super) fn schedule(&self, key: CategoryTotalsKey) -> bool {
        match self.tx.try_send(key) {
            Ok(()) => {
                self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Refresh of {key:?} dropped: {e}");
                false
            }
        }
    }

    pub(super) fn stats(&self) -> RefreshStats {
        RefreshStats {
            scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
        }
    }
}
