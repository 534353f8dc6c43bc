//! Pyramid Cache Library
//!
//! Out-of-core cell cache for multi-resolution volumetric images.
//!
//! Cells of an image pyramid are loaded lazily from slow storage through a
//! [`CacheArrayLoader`], either synchronously on the requesting thread or by
//! background fetcher threads, as selected per request by [`CacheHints`].
//! Entries are held weakly: they live as long as a consumer holds a
//! [`CellRef`] or the retention list keeps them, and remove themselves from
//! the cache when reclaimed.
//!
//! Blocking work on the render thread is bounded by a per-priority I/O time
//! budget that the controller resets once per frame with
//! [`CellCache::reset_io_time_budget`].

mod cache;
mod cell;
mod config;
mod entry;
mod error;
mod grid;
mod hints;
mod key;
mod loader;
mod retention;
mod stats;
mod table;
mod view;

pub use cache::{CellCache, CellRef};
pub use cell::{Cell, CellLayout};
pub use config::CacheConfig;
pub use error::{BoxError, CacheError, ConfigError, LoadError};
pub use grid::CellGrid;
pub use hints::{CacheHints, LoadingStrategy, ParseStrategyError};
pub use key::{CacheKey, MAX_CELL_INDEX};
pub use loader::CacheArrayLoader;
pub use stats::CacheStats;
pub use view::VolatileCells;

// Scheduler types that appear in this crate's API
pub use pyramid_scheduler::{IoStatistics, QueueStats, ThreadGroup};
