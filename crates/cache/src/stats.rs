//! Cache statistics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Live entries in the table
    pub entries: usize,

    /// Live entries holding loaded data
    pub valid_entries: usize,

    /// Requests that found loaded data
    pub hits: u64,

    /// Requests that found no entry or a placeholder
    pub misses: u64,

    /// Completed storage reads
    pub loads: u64,

    /// Storage reads that failed or were interrupted
    pub load_failures: u64,

    /// Budgeted requests that ran out of I/O time and were queued instead
    pub budget_degrades: u64,

    /// Keys put on the fetch queues
    pub enqueued: u64,

    /// Entries kept alive by the retention list
    pub retained_entries: usize,

    /// Estimated bytes of the retained entries
    pub retained_bytes: u64,

    /// Retention limit in bytes
    pub retention_limit: u64,

    /// Entries dropped from the retention list to stay within the limit
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Request and load counters shared by the render thread and the fetchers
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) loads: AtomicU64,
    pub(crate) load_failures: AtomicU64,
    pub(crate) budget_degrades: AtomicU64,
    pub(crate) enqueued: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fill(&self, stats: &mut CacheStats) {
        stats.hits = self.hits.load(Ordering::Relaxed);
        stats.misses = self.misses.load(Ordering::Relaxed);
        stats.loads = self.loads.load(Ordering::Relaxed);
        stats.load_failures = self.load_failures.load(Ordering::Relaxed);
        stats.budget_degrades = self.budget_degrades.load(Ordering::Relaxed);
        stats.enqueued = self.enqueued.load(Ordering::Relaxed);
    }
}
