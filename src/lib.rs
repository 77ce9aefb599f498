//! Cachecore - An embeddable in-process key-value cache
//!
//! Provides typed caches with by-value or by-reference storage, optional
//! read-through loading and write-through persistence, entry listeners,
//! statistics and a registry of named caches.

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{Cache, CacheBuilder, CacheRegistry, CacheStatus, Entry};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
