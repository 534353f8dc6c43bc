//! Error types for the cell cache

use crate::CacheKey;
use std::io;
use thiserror::Error;

/// Boxed error reported by a storage backend
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by a [`CacheArrayLoader`](crate::CacheArrayLoader)
#[derive(Debug, Error)]
pub enum LoadError {
    /// The read was interrupted before it completed
    #[error("load interrupted")]
    Interrupted,

    /// The storage backend failed to produce the data
    #[error("storage read failed: {0}")]
    Storage(#[source] BoxError),
}

impl LoadError {
    /// Wrap any backend error
    pub fn storage(error: impl Into<BoxError>) -> Self {
        Self::Storage(error.into())
    }
}

impl From<io::Error> for LoadError {
    fn from(error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::Interrupted {
            Self::Interrupted
        } else {
            Self::Storage(Box::new(error))
        }
    }
}

/// Errors returned by [`CellCache`](crate::CellCache)
#[derive(Debug, Error)]
pub enum CacheError {
    /// A blocking load of `key` was interrupted; the entry keeps its placeholder
    #[error("load of cell {key} interrupted")]
    Interrupted { key: CacheKey },

    /// Storage failed while loading `key`; the entry keeps its placeholder
    #[error("failed to read cell {key}")]
    StorageRead {
        key: CacheKey,
        #[source]
        source: BoxError,
    },

    /// A fetcher thread could not be started
    #[error("failed to spawn fetcher thread")]
    Spawn(#[source] io::Error),

    /// The cache configuration is invalid
    #[error("invalid cache configuration")]
    Config(#[from] ConfigError),
}

impl CacheError {
    pub(crate) fn from_load(key: CacheKey, error: LoadError) -> Self {
        match error {
            LoadError::Interrupted => Self::Interrupted { key },
            LoadError::Storage(source) => Self::StorageRead { key, source },
        }
    }

    /// Key of the cell that failed to load, if any
    pub fn key(&self) -> Option<CacheKey> {
        match self {
            Self::Interrupted { key } | Self::StorageRead { key, .. } => Some(*key),
            Self::Spawn(_) | Self::Config(_) => None,
        }
    }
}

/// Errors from loading or saving a [`CacheConfig`](crate::CacheConfig)
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid value for a configuration key
    #[error("invalid value {value:?} for configuration key {key}")]
    InvalidValue { key: String, value: String },

    /// I/O error reading or writing a configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed TOML
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration could not be rendered as TOML
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, value: impl ToString) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}
