//! Pyramid Scheduler Library
//!
//! Background loading machinery for the pyramid cell cache.
//!
//! This crate provides the parts of the cache that deal with *when* a cell
//! gets loaded rather than *what* gets loaded: per-priority fetch queues, the
//! fetcher thread pool that drains them, the per-frame I/O time budget that
//! bounds blocking loads on the render thread, and I/O statistics per
//! thread group.
//!
//! # Example
//!
//! ```
//! use pyramid_scheduler::{IoTimeBudget, FetchQueues};
//! use std::time::Duration;
//!
//! let queues = FetchQueues::new(2, 64);
//! queues.put(17u64, 1, true);
//! queues.put(3u64, 0, true);
//! assert_eq!(queues.try_take(), Some(3));
//!
//! let budget = IoTimeBudget::new(2);
//! budget.reset_durations(&[Duration::from_millis(8), Duration::from_millis(2)]);
//! budget.consume(Duration::from_millis(1), 0);
//! assert_eq!(budget.remaining(1), Duration::from_millis(2));
//! ```

mod budget;
mod fetcher;
mod pause;
mod queue;
mod timing;

// Re-export public API
pub use budget::{duration_to_nanos, IoTimeBudget};
pub use fetcher::{default_num_threads, Fetch, FetcherConfig, FetcherThreads};
pub use pause::PauseControl;
pub use queue::{FetchQueues, QueueStats, DEFAULT_PREFETCH_CAPACITY};
pub use timing::{IoStatistics, IoTimer, ThreadGroup, ThreadGroupGuard};
