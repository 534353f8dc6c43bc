//! Per-request cache hints
//!
//! Hints travel with each request, not with the entry, so one entry may be
//! requested at the same time with different strategies and priorities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a request treats a cell that is missing or not loaded yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingStrategy {
    /// Load synchronously if not loaded. Never returns a placeholder.
    Blocking,

    /// Return what is there and queue the cell for background loading
    #[default]
    Volatile,

    /// Load synchronously while the frame's I/O budget for the request's
    /// priority lasts, otherwise behave like `Volatile`
    Budgeted,

    /// Return what is there, never create an entry and never queue
    DontLoad,
}

impl LoadingStrategy {
    pub const ALL: [LoadingStrategy; 4] = [
        LoadingStrategy::Blocking,
        LoadingStrategy::Volatile,
        LoadingStrategy::Budgeted,
        LoadingStrategy::DontLoad,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadingStrategy::Blocking => "blocking",
            LoadingStrategy::Volatile => "volatile",
            LoadingStrategy::Budgeted => "budgeted",
            LoadingStrategy::DontLoad => "dontload",
        }
    }
}

impl fmt::Display for LoadingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown loading strategy name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown loading strategy {0:?}, expected one of blocking, volatile, budgeted, dontload")]
pub struct ParseStrategyError(String);

impl FromStr for LoadingStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        LoadingStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| ParseStrategyError(s.to_string()))
    }
}

/// Strategy, priority and de-duplication flag for one request
///
/// # Example
///
/// ```
/// use pyramid_cache::{CacheHints, LoadingStrategy};
///
/// let hints = CacheHints::budgeted(1).with_update_once(true);
/// assert_eq!(hints.strategy, LoadingStrategy::Budgeted);
/// assert_eq!(hints.priority, 1);
/// assert!(hints.update_once);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CacheHints {
    pub strategy: LoadingStrategy,
    /// 0 is the most urgent
    pub priority: usize,
    /// Queue an unloaded cell at most once per frame
    pub update_once: bool,
}

impl CacheHints {
    pub fn new(strategy: LoadingStrategy, priority: usize, update_once: bool) -> Self {
        Self {
            strategy,
            priority,
            update_once,
        }
    }

    pub fn blocking() -> Self {
        Self::new(LoadingStrategy::Blocking, 0, false)
    }

    pub fn volatile(priority: usize) -> Self {
        Self::new(LoadingStrategy::Volatile, priority, false)
    }

    pub fn budgeted(priority: usize) -> Self {
        Self::new(LoadingStrategy::Budgeted, priority, false)
    }

    pub fn dont_load() -> Self {
        Self::new(LoadingStrategy::DontLoad, 0, false)
    }

    pub fn with_priority(mut self, priority: usize) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_update_once(mut self, update_once: bool) -> Self {
        self.update_once = update_once;
        self
    }
}
