//! Cache Registry Module
//!
//! Named caches under one roof: lookup, explicit creation, lazy
//! get-or-create resolution and bulk shutdown. Caches created lazily are
//! built from the registry's default configuration and started immediately.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::warn;

use crate::cache::{Cache, CacheKey, CacheValue};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

// == Cache Registry ==
/// Registry of caches sharing a key/value shape, keyed by unique name.
pub struct CacheRegistry<K: CacheKey, V: CacheValue> {
    caches: Mutex<HashMap<String, Cache<K, V>>>,
    default_config: CacheConfig,
}

impl<K: CacheKey, V: CacheValue> CacheRegistry<K, V> {
    // == Constructors ==
    /// Creates an empty registry with the default cache configuration.
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Creates an empty registry; lazily created caches use this
    /// configuration.
    pub fn with_config(default_config: CacheConfig) -> Self {
        Self {
            caches: Mutex::new(HashMap::new()),
            default_config,
        }
    }

    // == Lookup ==
    /// Returns the cache registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Cache<K, V>> {
        self.caches.lock().unwrap().get(name).cloned()
    }

    /// Returns the number of registered caches.
    pub fn len(&self) -> usize {
        self.caches.lock().unwrap().len()
    }

    /// Returns true if no caches are registered.
    pub fn is_empty(&self) -> bool {
        self.caches.lock().unwrap().is_empty()
    }

    // == Creation ==
    /// Registers an externally built cache under its name.
    ///
    /// Fails with [`CacheError::AlreadyExists`] when the name is taken; the
    /// existing cache is left untouched.
    pub fn register(&self, cache: Cache<K, V>) -> Result<()> {
        let mut caches = self.caches.lock().unwrap();
        let name = cache.name().to_string();
        if caches.contains_key(&name) {
            return Err(CacheError::AlreadyExists(name));
        }
        caches.insert(name, cache);
        Ok(())
    }

    /// Builds, starts and registers a cache with the registry's default
    /// configuration.
    ///
    /// Fails with [`CacheError::AlreadyExists`] when the name is taken.
    pub fn create_cache(&self, name: &str) -> Result<Cache<K, V>> {
        let mut caches = self.caches.lock().unwrap();
        if caches.contains_key(name) {
            return Err(CacheError::AlreadyExists(name.to_string()));
        }
        let cache = self.build_default(name)?;
        caches.insert(name.to_string(), cache.clone());
        Ok(cache)
    }

    // == Resolution ==
    /// Returns the cache for `name`, lazily creating and starting it when
    /// absent.
    ///
    /// Lazy creation is logged as a warning: it usually means the caller
    /// expected the cache to have been set up beforehand.
    pub fn get_or_create(&self, name: &str) -> Result<Cache<K, V>> {
        let mut caches = self.caches.lock().unwrap();
        if let Some(cache) = caches.get(name) {
            return Ok(cache.clone());
        }
        warn!(cache = %name, "No cache named {name} was found, creating one with default configuration");
        let cache = self.build_default(name)?;
        caches.insert(name.to_string(), cache.clone());
        Ok(cache)
    }

    /// Resolves the cache that failure results are routed to.
    ///
    /// The name must be explicit and non-empty; there is no default
    /// exception cache.
    pub fn resolve_exception_cache(&self, name: &str) -> Result<Cache<K, V>> {
        if name.is_empty() {
            return Err(CacheError::MissingExceptionCacheName);
        }
        self.get_or_create(name)
    }

    // == Shutdown ==
    /// Stops every registered cache and empties the registry.
    pub fn stop_all(&self) -> Result<()> {
        let caches: Vec<Cache<K, V>> = {
            let mut registered = self.caches.lock().unwrap();
            registered.drain().map(|(_, cache)| cache).collect()
        };
        for cache in caches {
            cache.stop()?;
        }
        Ok(())
    }

    fn build_default(&self, name: &str) -> Result<Cache<K, V>> {
        let cache = Cache::builder(name)
            .config(self.default_config.clone())
            .build()?;
        cache.start()?;
        Ok(cache)
    }
}

impl<K: CacheKey, V: CacheValue> Default for CacheRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
