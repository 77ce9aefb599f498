//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

use crate::cache::CacheStatus;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A data operation was invoked outside the STARTED lifecycle state
    #[error("Cache '{name}' is not started (status: {status:?})")]
    IllegalState {
        /// Name of the cache the operation was invoked on
        name: String,
        /// Lifecycle state the cache was in
        status: CacheStatus,
    },

    /// A by-value deep copy failed during store or retrieve
    #[error("Value copy failed: {0}")]
    Copy(String),

    /// A caller-supplied loader callback failed
    #[error("Cache loader failed")]
    Loader(#[source] anyhow::Error),

    /// A caller-supplied write-through writer callback failed
    #[error("Cache writer failed")]
    Writer(#[source] anyhow::Error),

    /// Waiting on an asynchronous load handle timed out.
    ///
    /// The load itself is not cancelled; the worker may still complete
    /// and populate the store after the caller has given up.
    #[error("Timed out waiting for asynchronous load")]
    LoadTimeout,

    /// The asynchronous load task ended without producing a result
    #[error("Asynchronous load task failed: {0}")]
    LoadTaskFailed(String),

    /// A cache with the given name already exists in the registry
    #[error("A cache named '{0}' already exists")]
    AlreadyExists(String),

    /// An exception cache was requested without a cache name
    #[error("An exception cache name is required but was empty")]
    MissingExceptionCacheName,

    /// Invalid builder or registry configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
