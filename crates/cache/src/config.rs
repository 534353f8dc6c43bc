//! Cache configuration
//!
//! Configuration can be created programmatically, loaded from a TOML file or
//! read from environment variables. Durations are written in humantime
//! notation (`"100ms"`, `"2s"`).

use crate::ConfigError;
use pyramid_scheduler::{default_num_threads, FetcherConfig, DEFAULT_PREFETCH_CAPACITY};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const ENV_FETCHER_THREADS: &str = "PYRAMID_CACHE_FETCHER_THREADS";
const ENV_PRIORITIES: &str = "PYRAMID_CACHE_PRIORITIES";
const ENV_PREFETCH_CAPACITY: &str = "PYRAMID_CACHE_PREFETCH_CAPACITY";
const ENV_POLL_INTERVAL: &str = "PYRAMID_CACHE_POLL_INTERVAL";
const ENV_RETENTION_MB: &str = "PYRAMID_CACHE_RETENTION_MB";

/// Configuration for a [`CellCache`](crate::CellCache)
///
/// # Example
///
/// ```
/// use pyramid_cache::CacheConfig;
/// use std::time::Duration;
///
/// let config = CacheConfig::default()
///     .with_fetcher_threads(2)
///     .with_priorities(3)
///     .with_poll_interval(Duration::from_millis(20));
/// assert_eq!(config.num_fetcher_threads, 2);
/// assert_eq!(config.retention_bytes(), 256 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of background fetcher threads
    pub num_fetcher_threads: usize,
    /// Number of priority levels, for both fetch queues and the I/O budget
    pub num_priorities: usize,
    /// Maximum number of keys kept for prefetching across frames
    pub prefetch_capacity: usize,
    /// Longest time an idle fetcher waits before re-checking for shutdown
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Memory for soft-retained loaded cells, in megabytes
    pub retention_mb: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            num_fetcher_threads: default_num_threads(),
            num_priorities: 4,
            prefetch_capacity: DEFAULT_PREFETCH_CAPACITY,
            poll_interval: Duration::from_millis(100),
            retention_mb: 256,
        }
    }
}

impl CacheConfig {
    /// Configuration without background fetchers
    ///
    /// Only blocking loads ever populate such a cache. Queued keys stay
    /// queued until the cache is dropped.
    pub fn without_fetchers() -> Self {
        Self {
            num_fetcher_threads: 0,
            ..Self::default()
        }
    }

    pub fn with_fetcher_threads(mut self, threads: usize) -> Self {
        self.num_fetcher_threads = threads;
        self
    }

    pub fn with_priorities(mut self, priorities: usize) -> Self {
        self.num_priorities = priorities;
        self
    }

    pub fn with_prefetch_capacity(mut self, capacity: usize) -> Self {
        self.prefetch_capacity = capacity;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retention_mb(mut self, mb: usize) -> Self {
        self.retention_mb = mb;
        self
    }

    /// Retention limit in bytes
    pub fn retention_bytes(&self) -> u64 {
        self.retention_mb as u64 * 1024 * 1024
    }

    /// Fetcher pool settings derived from this configuration
    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig::new(self.num_fetcher_threads).with_poll_interval(self.poll_interval)
    }

    /// Check the values a cache cannot be built with
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] for zero priorities or a zero
    /// poll interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_priorities == 0 {
            return Err(ConfigError::invalid("num_priorities", self.num_priorities));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid(
                "poll_interval",
                humantime_serde::re::humantime::format_duration(self.poll_interval),
            ));
        }
        Ok(())
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PYRAMID_CACHE_FETCHER_THREADS`: fetcher threads, at least 1
    /// - `PYRAMID_CACHE_PRIORITIES`: priority levels, at least 1 (default: 4)
    /// - `PYRAMID_CACHE_PREFETCH_CAPACITY`: prefetch keys (default: 256)
    /// - `PYRAMID_CACHE_POLL_INTERVAL`: humantime duration (default: 100ms)
    /// - `PYRAMID_CACHE_RETENTION_MB`: retention in MB (default: 256)
    ///
    /// # Errors
    /// Returns an error if any variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(threads) = env_parse::<usize>(ENV_FETCHER_THREADS)? {
            if threads == 0 {
                return Err(ConfigError::invalid(ENV_FETCHER_THREADS, threads));
            }
            config.num_fetcher_threads = threads;
        }
        if let Some(priorities) = env_parse(ENV_PRIORITIES)? {
            config.num_priorities = priorities;
        }
        if let Some(capacity) = env_parse(ENV_PREFETCH_CAPACITY)? {
            config.prefetch_capacity = capacity;
        }
        if let Ok(value) = std::env::var(ENV_POLL_INTERVAL) {
            config.poll_interval = humantime_serde::re::humantime::parse_duration(&value)
                .map_err(|_| ConfigError::invalid(ENV_POLL_INTERVAL, &value))?;
        }
        if let Some(mb) = env_parse(ENV_RETENTION_MB)? {
            config.retention_mb = mb;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Missing keys take their default values:
    /// ```toml
    /// num_fetcher_threads = 4
    /// num_priorities = 4
    /// prefetch_capacity = 256
    /// poll_interval = "100ms"
    /// retention_mb = 256
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or holds an
    /// invalid value.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        if config.num_fetcher_threads == 0 {
            return Err(ConfigError::invalid("num_fetcher_threads", 0));
        }
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::invalid(name, value)),
        Err(_) => Ok(None),
    }
}
