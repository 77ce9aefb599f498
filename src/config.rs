//! Configuration Module
//!
//! Immutable per-cache configuration, assembled once at build time.

use std::env;

/// Cache configuration parameters.
///
/// Fixed when the cache is built; later listener registration goes through
/// the engine, not the configuration. All values can also be loaded from
/// environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Store values by value (deep copy on store and retrieve) rather than
    /// by reference (shared handles)
    pub store_by_value: bool,
    /// Whether hit/miss/put/removal statistics are recorded
    pub statistics_enabled: bool,
    /// Whether lifecycle transitions are reported through the log
    pub management_enabled: bool,
    /// Number of worker threads backing asynchronous load operations
    pub load_workers: usize,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_STORE_BY_VALUE` - Copy values on store/retrieve (default: true)
    /// - `CACHE_STATISTICS_ENABLED` - Record statistics (default: false)
    /// - `CACHE_MANAGEMENT_ENABLED` - Log lifecycle transitions (default: false)
    /// - `CACHE_LOAD_WORKERS` - Async load worker threads (default: 2)
    pub fn from_env() -> Self {
        Self {
            store_by_value: env::var("CACHE_STORE_BY_VALUE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            statistics_enabled: env::var("CACHE_STATISTICS_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            management_enabled: env::var("CACHE_MANAGEMENT_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            load_workers: env::var("CACHE_LOAD_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            store_by_value: true,
            statistics_enabled: false,
            management_enabled: false,
            load_workers: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert!(config.store_by_value);
        assert!(!config.statistics_enabled);
        assert!(!config.management_enabled);
        assert_eq!(config.load_workers, 2);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("CACHE_STORE_BY_VALUE");
        env::remove_var("CACHE_STATISTICS_ENABLED");
        env::remove_var("CACHE_MANAGEMENT_ENABLED");
        env::remove_var("CACHE_LOAD_WORKERS");

        let config = CacheConfig::from_env();
        assert!(config.store_by_value);
        assert!(!config.statistics_enabled);
        assert!(!config.management_enabled);
        assert_eq!(config.load_workers, 2);
    }
}
