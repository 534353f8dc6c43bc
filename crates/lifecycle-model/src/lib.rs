//! Pyramid Lifecycle Model
//!
//! Offline checker for the cell cache's get/load protocol. It models the
//! life-cycle of one cache entry under concurrent blocking and volatile
//! requests, a fetcher thread, failing loads and an eviction actor. Every
//! interleaving of their steps is explored, and any interleaving that breaks
//! the entry life-cycle, reads storage twice or observes a half-loaded cell
//! is reported.
//!
//! ```
//! use pyramid_lifecycle_model::{Explorer, Protocol, ViolationKind};
//!
//! let report = Explorer::new(Protocol::Unlocked).explore().unwrap();
//! assert!(report.has(ViolationKind::DuplicateLoad));
//! ```

mod explorer;
mod model;
mod state;

pub use explorer::{Explorer, ModelError, Report, Violation, ViolationKind, MAX_CALLERS};
pub use model::{Actor, Pc, Protocol, Step};
pub use state::{EntryState, TransitionTable};
