//! Cache Engine Module
//!
//! The façade sequencing store access, statistics, listener firing and
//! loader/writer invocation behind a lifecycle state machine. Built once
//! through [`CacheBuilder`] from immutable configuration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, info};

use crate::cache::listener::run_delivery_worker;
use crate::cache::{
    ByRefStore, ByValueStore, CacheEntryEvent, CacheEntryListener, CacheKey, CacheLoader,
    CacheStatistics, CacheValue, CacheWriter, Entry, EventType, ListenerRegistry, LoadHandle,
    NotificationScope, StatsSnapshot, TaskExecutor, ValueStore,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

// == Lifecycle ==
/// Lifecycle state of a cache.
///
/// `Uninitialised -> start() -> Started -> stop() -> Stopped`, with
/// `Stopped` terminal. All data operations require `Started` and fail fast
/// otherwise; `start()` and `stop()` are idempotent no-ops when already in
/// the target state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Built but not yet started
    Uninitialised,
    /// Accepting data operations
    Started,
    /// Terminal: entries released, no restart permitted
    Stopped,
}

const STATUS_UNINITIALISED: u8 = 0;
const STATUS_STARTED: u8 = 1;
const STATUS_STOPPED: u8 = 2;

impl CacheStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            STATUS_STARTED => CacheStatus::Started,
            STATUS_STOPPED => CacheStatus::Stopped,
            _ => CacheStatus::Uninitialised,
        }
    }
}

// == Entry Processor Outcome ==
/// Mutation chosen by an entry processor after inspecting the current value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryMutation<V> {
    /// Leave the entry as it is
    Keep,
    /// Store this value under the key
    Put(V),
    /// Remove the entry
    Remove,
}

// == Shared Engine State ==
/// Everything shared between the cache facade and its background tasks.
///
/// Load tasks capture this (not [`Cache`]) so the task executor's runtime is
/// only ever dropped from a caller thread.
struct CacheInner<K, V> {
    name: String,
    config: CacheConfig,
    status: AtomicU8,
    store: Mutex<Box<dyn ValueStore<K, V>>>,
    statistics: CacheStatistics,
    listeners: ListenerRegistry<K, V>,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    writer: Option<Arc<dyn CacheWriter<K, V>>>,
}

fn elapsed_nanos(start: Instant) -> u64 {
    start.elapsed().as_nanos() as u64
}

impl<K: CacheKey, V: CacheValue> CacheInner<K, V> {
    // == State Checks ==
    fn status(&self) -> CacheStatus {
        CacheStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Fails fast unless the cache is started.
    fn check_started(&self) -> Result<()> {
        let status = self.status();
        if status != CacheStatus::Started {
            return Err(CacheError::IllegalState {
                name: self.name.clone(),
                status,
            });
        }
        Ok(())
    }

    fn statistics_enabled(&self) -> bool {
        self.config.statistics_enabled
    }

    fn lock_store(&self) -> MutexGuard<'_, Box<dyn ValueStore<K, V>>> {
        self.store.lock().unwrap()
    }

    /// Start timing when statistics are enabled.
    fn timer(&self) -> Option<Instant> {
        self.statistics_enabled().then(Instant::now)
    }

    // == Write-Through ==
    /// Consults the writer before a store, if one is configured.
    fn write_through(&self, key: &K, value: &V) -> Result<()> {
        if let Some(writer) = &self.writer {
            writer
                .write(&Entry::new(key.clone(), value.clone()))
                .map_err(CacheError::Writer)?;
        }
        Ok(())
    }

    /// Consults the writer before a removal, if one is configured.
    fn delete_through(&self, key: &K) -> Result<()> {
        if let Some(writer) = &self.writer {
            writer.delete(key).map_err(CacheError::Writer)?;
        }
        Ok(())
    }

    // == Read Path ==
    fn get(&self, key: &K) -> Result<Option<V>> {
        self.check_started()?;
        let start = self.timer();
        let value = { self.lock_store().get(key)? };
        if let Some(start) = start {
            self.statistics.add_get_time_nanos(elapsed_nanos(start));
        }
        match value {
            Some(value) => {
                if self.statistics_enabled() {
                    self.statistics.record_hits(1);
                }
                Ok(Some(value))
            }
            None => {
                // The miss is recorded before the loader runs; a load-fill
                // is never counted again as a hit.
                if self.statistics_enabled() {
                    self.statistics.record_misses(1);
                }
                match self.loader.clone() {
                    Some(loader) => self.read_through(&loader, key),
                    None => Ok(None),
                }
            }
        }
    }

    /// Synchronously loads a missing entry and stores it.
    fn read_through(&self, loader: &Arc<dyn CacheLoader<K, V>>, key: &K) -> Result<Option<V>> {
        let entry = loader.load(key).map_err(CacheError::Loader)?;
        match entry {
            Some(entry) => {
                let (key, value) = entry.into_pair();
                let prior = {
                    self.lock_store()
                        .get_and_put(key.clone(), value.clone())?
                };
                // A load-fill is not a caller put: no put statistics.
                let event_type = if prior.is_some() {
                    EventType::Updated
                } else {
                    EventType::Created
                };
                self.listeners.fire(CacheEntryEvent {
                    event_type,
                    key,
                    value: Some(value.clone()),
                });
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn get_all(&self, keys: &[K]) -> Result<HashMap<K, V>> {
        self.check_started()?;
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            // Absent keys are omitted, never mapped to an empty value.
            if let Some(value) = self.get(key)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    fn contains_key(&self, key: &K) -> Result<bool> {
        self.check_started()?;
        Ok(self.lock_store().contains_key(key))
    }

    fn size(&self) -> Result<usize> {
        self.check_started()?;
        Ok(self.lock_store().len())
    }

    // == Write Path ==
    fn put(&self, key: K, value: V) -> Result<()> {
        self.check_started()?;
        let start = self.timer();
        let prior = {
            let mut store = self.lock_store();
            self.write_through(&key, &value)?;
            store.get_and_put(key.clone(), value.clone())?
        };
        if let Some(start) = start {
            self.statistics.record_puts(1);
            self.statistics.add_put_time_nanos(elapsed_nanos(start));
        }
        let event_type = if prior.is_some() {
            EventType::Updated
        } else {
            EventType::Created
        };
        self.listeners.fire(CacheEntryEvent {
            event_type,
            key,
            value: Some(value),
        });
        Ok(())
    }

    fn get_and_put(&self, key: K, value: V) -> Result<Option<V>> {
        self.check_started()?;
        let start = self.timer();
        let prior = {
            let mut store = self.lock_store();
            self.write_through(&key, &value)?;
            store.get_and_put(key.clone(), value.clone())?
        };
        if let Some(start) = start {
            self.statistics.record_puts(1);
            self.statistics.add_put_time_nanos(elapsed_nanos(start));
        }
        let event_type = if prior.is_some() {
            EventType::Updated
        } else {
            EventType::Created
        };
        self.listeners.fire(CacheEntryEvent {
            event_type,
            key,
            value: Some(value),
        });
        Ok(prior)
    }

    fn put_all(&self, entries: HashMap<K, V>) -> Result<()> {
        self.check_started()?;
        let start = self.timer();
        let count = entries.len() as u64;
        let mut events = Vec::with_capacity(entries.len());
        {
            let mut store = self.lock_store();
            // Consult the writer for the whole batch before mutating, so a
            // writer failure leaves the cache state untouched.
            for (key, value) in &entries {
                self.write_through(key, value)?;
            }
            let batch: Vec<(K, V)> = entries.into_iter().collect();
            for (key, value) in &batch {
                let event_type = if store.contains_key(key) {
                    EventType::Updated
                } else {
                    EventType::Created
                };
                events.push(CacheEntryEvent {
                    event_type,
                    key: key.clone(),
                    value: Some(value.clone()),
                });
            }
            store.put_all(batch)?;
        }
        if let Some(start) = start {
            self.statistics.record_puts(count);
            self.statistics.add_put_time_nanos(elapsed_nanos(start));
        }
        for event in events {
            self.listeners.fire(event);
        }
        Ok(())
    }

    fn put_if_absent(&self, key: K, value: V) -> Result<bool> {
        self.check_started()?;
        let start = self.timer();
        let inserted = {
            let mut store = self.lock_store();
            if store.contains_key(&key) {
                false
            } else {
                self.write_through(&key, &value)?;
                store.put(key.clone(), value.clone())?;
                true
            }
        };
        if inserted {
            // Counted only when the insert actually happened.
            if let Some(start) = start {
                self.statistics.record_puts(1);
                self.statistics.add_put_time_nanos(elapsed_nanos(start));
            }
            self.listeners.fire(CacheEntryEvent {
                event_type: EventType::Created,
                key,
                value: Some(value),
            });
        }
        Ok(inserted)
    }

    // == Removal Path ==
    fn remove(&self, key: &K) -> Result<bool> {
        self.check_started()?;
        let start = self.timer();
        let prior = {
            let mut store = self.lock_store();
            self.delete_through(key)?;
            store.remove(key)
        };
        match prior {
            Some(value) => {
                if let Some(start) = start {
                    self.statistics.record_removals(1);
                    self.statistics.add_remove_time_nanos(elapsed_nanos(start));
                }
                self.listeners.fire(CacheEntryEvent {
                    event_type: EventType::Removed,
                    key: key.clone(),
                    value: Some(value),
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove_if_equals(&self, key: &K, expected: &V) -> Result<bool> {
        self.check_started()?;
        let start = self.timer();
        let prior = {
            let mut store = self.lock_store();
            // Compare and mutate under one lock so nothing interleaves,
            // with the writer consulted only when the removal will happen.
            let matches = match store.get(key)? {
                Some(current) => &current == expected,
                None => false,
            };
            if matches {
                self.delete_through(key)?;
                store.remove(key)
            } else {
                None
            }
        };
        match prior {
            Some(value) => {
                if let Some(start) = start {
                    self.statistics.record_removals(1);
                    self.statistics.add_remove_time_nanos(elapsed_nanos(start));
                }
                self.listeners.fire(CacheEntryEvent {
                    event_type: EventType::Removed,
                    key: key.clone(),
                    value: Some(value),
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_and_remove(&self, key: &K) -> Result<Option<V>> {
        self.check_started()?;
        let start = self.timer();
        let prior = {
            let mut store = self.lock_store();
            self.delete_through(key)?;
            store.get_and_remove(key)
        };
        if self.statistics_enabled() {
            if prior.is_some() {
                self.statistics.record_hits(1);
                self.statistics.record_removals(1);
                if let Some(start) = start {
                    self.statistics.add_remove_time_nanos(elapsed_nanos(start));
                }
            } else {
                self.statistics.record_misses(1);
            }
        }
        if let Some(value) = &prior {
            self.listeners.fire(CacheEntryEvent {
                event_type: EventType::Removed,
                key: key.clone(),
                value: Some(value.clone()),
            });
        }
        Ok(prior)
    }

    fn remove_all_keys(&self, keys: &[K]) -> Result<()> {
        self.check_started()?;
        let start = self.timer();
        let mut removed = Vec::new();
        {
            let mut store = self.lock_store();
            for key in keys {
                self.delete_through(key)?;
            }
            for key in keys {
                if let Some(value) = store.remove(key) {
                    removed.push(CacheEntryEvent {
                        event_type: EventType::Removed,
                        key: key.clone(),
                        value: Some(value),
                    });
                }
            }
        }
        // Removal statistics reflect the count actually removed.
        if let Some(start) = start {
            self.statistics.record_removals(removed.len() as u64);
            self.statistics.add_remove_time_nanos(elapsed_nanos(start));
        }
        for event in removed {
            self.listeners.fire(event);
        }
        Ok(())
    }

    fn remove_all(&self) -> Result<()> {
        self.check_started()?;
        let (count, keys) = {
            let mut store = self.lock_store();
            let keys = store.keys();
            for key in &keys {
                self.delete_through(key)?;
            }
            // Size snapshot taken before the clear; statistics are
            // best-effort and the count may race with concurrent writers.
            let count = store.len();
            store.clear();
            (count, keys)
        };
        if self.statistics_enabled() {
            self.statistics.record_removals(count as u64);
        }
        for key in keys {
            // Bulk clears do not materialize removed values.
            self.listeners.fire(CacheEntryEvent {
                event_type: EventType::Removed,
                key,
                value: None,
            });
        }
        Ok(())
    }

    // == Replace Path ==
    fn replace(&self, key: &K, value: V) -> Result<bool> {
        self.check_started()?;
        let start = self.timer();
        let prior = {
            let mut store = self.lock_store();
            if store.contains_key(key) {
                self.write_through(key, &value)?;
                store.replace(key, value.clone())?
            } else {
                None
            }
        };
        let replaced = prior.is_some();
        if replaced {
            if let Some(start) = start {
                self.statistics.record_puts(1);
                self.statistics.add_put_time_nanos(elapsed_nanos(start));
            }
            self.listeners.fire(CacheEntryEvent {
                event_type: EventType::Updated,
                key: key.clone(),
                value: Some(value),
            });
        }
        Ok(replaced)
    }

    fn replace_if_equals(&self, key: &K, expected: &V, value: V) -> Result<bool> {
        self.check_started()?;
        let start = self.timer();
        let swapped = {
            let mut store = self.lock_store();
            let matches = match store.get(key)? {
                Some(current) => &current == expected,
                None => false,
            };
            if matches {
                self.write_through(key, &value)?;
                store.replace_if_equals(key, expected, value.clone())?
            } else {
                false
            }
        };
        if swapped {
            if let Some(start) = start {
                self.statistics.record_puts(1);
                self.statistics.add_put_time_nanos(elapsed_nanos(start));
            }
            self.listeners.fire(CacheEntryEvent {
                event_type: EventType::Updated,
                key: key.clone(),
                value: Some(value),
            });
        }
        Ok(swapped)
    }

    fn get_and_replace(&self, key: &K, value: V) -> Result<Option<V>> {
        self.check_started()?;
        let start = self.timer();
        let prior = {
            let mut store = self.lock_store();
            if store.contains_key(key) {
                self.write_through(key, &value)?;
                store.get_and_replace(key, value.clone())?
            } else {
                None
            }
        };
        if self.statistics_enabled() {
            if prior.is_some() {
                self.statistics.record_hits(1);
                self.statistics.record_puts(1);
                if let Some(start) = start {
                    self.statistics.add_put_time_nanos(elapsed_nanos(start));
                }
            } else {
                self.statistics.record_misses(1);
            }
        }
        if prior.is_some() {
            self.listeners.fire(CacheEntryEvent {
                event_type: EventType::Updated,
                key: key.clone(),
                value: Some(value),
            });
        }
        Ok(prior)
    }

    // == Entry Processor ==
    fn invoke_entry_processor<R>(
        &self,
        key: &K,
        processor: impl FnOnce(Option<&V>) -> (EntryMutation<V>, R),
    ) -> Result<R> {
        self.check_started()?;
        let mut event = None;
        let result = {
            let mut store = self.lock_store();
            let current = store.get(key)?;
            let (mutation, result) = processor(current.as_ref());
            match mutation {
                EntryMutation::Keep => {}
                EntryMutation::Put(value) => {
                    self.write_through(key, &value)?;
                    let prior = store.get_and_put(key.clone(), value.clone())?;
                    if self.statistics_enabled() {
                        self.statistics.record_puts(1);
                    }
                    let event_type = if prior.is_some() {
                        EventType::Updated
                    } else {
                        EventType::Created
                    };
                    event = Some(CacheEntryEvent {
                        event_type,
                        key: key.clone(),
                        value: Some(value),
                    });
                }
                EntryMutation::Remove => {
                    self.delete_through(key)?;
                    if let Some(value) = store.remove(key) {
                        if self.statistics_enabled() {
                            self.statistics.record_removals(1);
                        }
                        event = Some(CacheEntryEvent {
                            event_type: EventType::Removed,
                            key: key.clone(),
                            value: Some(value),
                        });
                    }
                }
            }
            result
        };
        if let Some(event) = event {
            self.listeners.fire(event);
        }
        Ok(result)
    }

    // == Lifecycle ==
    fn start(&self) -> Result<()> {
        match self.status.compare_exchange(
            STATUS_UNINITIALISED,
            STATUS_STARTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                if self.config.management_enabled {
                    info!(cache = %self.name, "Cache started");
                }
                Ok(())
            }
            // Repeated start is a no-op; start after stop is rejected.
            Err(STATUS_STARTED) => Ok(()),
            Err(raw) => Err(CacheError::IllegalState {
                name: self.name.clone(),
                status: CacheStatus::from_u8(raw),
            }),
        }
    }

    fn stop(&self) -> Result<()> {
        let previous = self.status.swap(STATUS_STOPPED, Ordering::AcqRel);
        if previous == STATUS_STOPPED {
            return Ok(());
        }
        // All entries are released before stop returns; operations racing
        // with the stop fail fast on the status check.
        self.lock_store().clear();
        if self.config.management_enabled {
            info!(cache = %self.name, "Cache stopped");
        }
        Ok(())
    }

    // == Statistics ==
    fn statistics(&self) -> Result<Option<StatsSnapshot>> {
        self.check_started()?;
        if !self.statistics_enabled() {
            return Ok(None);
        }
        Ok(Some(self.statistics.snapshot()))
    }

    fn clear_statistics(&self) -> Result<()> {
        self.check_started()?;
        self.statistics.clear();
        Ok(())
    }
}

// == Snapshot Iterator ==
/// Lazy, finite, non-restartable iterator over a point-in-time snapshot.
///
/// Concurrent mutation during iteration has "no crash, but no consistency"
/// semantics: entries removed or updated after the snapshot may still be
/// yielded, and later writes are not reflected, but internal state is never
/// corrupted.
#[derive(Debug)]
pub struct EntryIter<K, V> {
    entries: std::vec::IntoIter<Entry<K, V>>,
}

impl<K, V> Iterator for EntryIter<K, V> {
    type Item = Entry<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

// == Cache Facade ==
/// An embeddable key-value cache.
///
/// Cheap to clone; all clones observe the same cache. The cache exclusively
/// owns its store, statistics and listener registry; listeners, loader and
/// writer are supplied by the caller and merely referenced (the cache never
/// closes them).
pub struct Cache<K: CacheKey, V: CacheValue> {
    inner: Arc<CacheInner<K, V>>,
    executor: Arc<TaskExecutor>,
}

impl<K: CacheKey, V: CacheValue> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<K: CacheKey, V: CacheValue> Cache<K, V> {
    // == Construction ==
    /// Starts building a cache with the given name and default configuration.
    pub fn builder(name: impl Into<String>) -> CacheBuilder<K, V> {
        CacheBuilder::new(name)
    }

    // == Identity ==
    /// The cache name, unique within its owning registry.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The immutable configuration the cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// The current lifecycle state.
    pub fn status(&self) -> CacheStatus {
        self.inner.status()
    }

    // == Lifecycle ==
    /// Transitions the cache to STARTED. A no-op when already started;
    /// fails once stopped.
    pub fn start(&self) -> Result<()> {
        self.inner.start()
    }

    /// Clears all entries and transitions to the terminal STOPPED state.
    /// Idempotent.
    pub fn stop(&self) -> Result<()> {
        self.inner.stop()
    }

    // == Reads ==
    /// Returns the value for a key. On a miss with a loader configured, the
    /// loader is invoked synchronously and the loaded entry is stored.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.inner.get(key)
    }

    /// Returns a mapping for the keys that resolved to a value; absent keys
    /// are omitted.
    pub fn get_all(&self, keys: &[K]) -> Result<HashMap<K, V>> {
        self.inner.get_all(keys)
    }

    /// Returns true if the key is present.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.inner.contains_key(key)
    }

    /// Returns the number of entries.
    pub fn size(&self) -> Result<usize> {
        self.inner.size()
    }

    // == Writes ==
    /// Stores a value under a key.
    pub fn put(&self, key: K, value: V) -> Result<()> {
        self.inner.put(key, value)
    }

    /// Stores a value and returns the previous one, if any.
    pub fn get_and_put(&self, key: K, value: V) -> Result<Option<V>> {
        self.inner.get_and_put(key, value)
    }

    /// Stores every pair in the map.
    pub fn put_all(&self, entries: HashMap<K, V>) -> Result<()> {
        self.inner.put_all(entries)
    }

    /// Stores the value only if the key is absent. Returns true on insert.
    pub fn put_if_absent(&self, key: K, value: V) -> Result<bool> {
        self.inner.put_if_absent(key, value)
    }

    // == Removals ==
    /// Removes a key. Returns true if it was present.
    pub fn remove(&self, key: &K) -> Result<bool> {
        self.inner.remove(key)
    }

    /// Removes the key only if its current value equals `expected`
    /// (compare-and-swap).
    pub fn remove_if_equals(&self, key: &K, expected: &V) -> Result<bool> {
        self.inner.remove_if_equals(key, expected)
    }

    /// Removes a key and returns the previous value, if any.
    pub fn get_and_remove(&self, key: &K) -> Result<Option<V>> {
        self.inner.get_and_remove(key)
    }

    /// Removes the given keys; removal statistics count the keys actually
    /// removed.
    pub fn remove_all_keys(&self, keys: &[K]) -> Result<()> {
        self.inner.remove_all_keys(keys)
    }

    /// Removes every entry.
    pub fn remove_all(&self) -> Result<()> {
        self.inner.remove_all()
    }

    // == Replacements ==
    /// Replaces the value only if the key is present.
    pub fn replace(&self, key: &K, value: V) -> Result<bool> {
        self.inner.replace(key, value)
    }

    /// Replaces the value only if the current value equals `expected`
    /// (compare-and-swap).
    pub fn replace_if_equals(&self, key: &K, expected: &V, value: V) -> Result<bool> {
        self.inner.replace_if_equals(key, expected, value)
    }

    /// Replaces the value if present, returning the previous value.
    pub fn get_and_replace(&self, key: &K, value: V) -> Result<Option<V>> {
        self.inner.get_and_replace(key, value)
    }

    // == Entry Processor ==
    /// Runs a read-modify-write against a single entry with the same
    /// single-key atomicity as the compare-and-swap operations: the
    /// processor observes the current value and chooses a mutation, with
    /// nothing interleaving in between.
    pub fn invoke_entry_processor<R>(
        &self,
        key: &K,
        processor: impl FnOnce(Option<&V>) -> (EntryMutation<V>, R),
    ) -> Result<R> {
        self.inner.invoke_entry_processor(key, processor)
    }

    // == Asynchronous Loads ==
    /// Asynchronously loads a key through the configured loader.
    ///
    /// Returns `Ok(None)` ("no operation") when no loader is configured or
    /// the key is already present; the loader is not invoked in either
    /// case. Otherwise the returned handle completes with the loaded value
    /// once it has been stored.
    pub fn load(&self, key: K) -> Result<Option<LoadHandle<Option<V>>>> {
        self.inner.check_started()?;
        let Some(loader) = self.inner.loader.clone() else {
            return Ok(None);
        };
        if self.inner.contains_key(&key)? {
            return Ok(None);
        }
        let inner = Arc::clone(&self.inner);
        let handle = self.executor.spawn(move || {
            let entry = loader.load(&key).map_err(CacheError::Loader)?;
            match entry {
                Some(entry) => {
                    let (key, value) = entry.into_pair();
                    // Stored through the normal put path: put statistics
                    // and a created/updated event apply.
                    inner.put(key, value.clone())?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        });
        Ok(Some(handle))
    }

    /// Asynchronously loads a batch of keys through the configured loader.
    ///
    /// Keys already present are filtered out before the bulk loader runs;
    /// the loaded mapping is merged into the store and returned through the
    /// handle. Returns `Ok(None)` when no loader is configured.
    pub fn load_all(&self, keys: Vec<K>) -> Result<Option<LoadHandle<HashMap<K, V>>>> {
        self.inner.check_started()?;
        let Some(loader) = self.inner.loader.clone() else {
            return Ok(None);
        };
        let inner = Arc::clone(&self.inner);
        let handle = self.executor.spawn(move || {
            inner.check_started()?;
            let missing: Vec<K> = {
                let store = inner.lock_store();
                keys.into_iter().filter(|k| !store.contains_key(k)).collect()
            };
            let loaded = loader.load_all(&missing).map_err(CacheError::Loader)?;
            inner.put_all(loaded.clone())?;
            Ok(loaded)
        });
        Ok(Some(handle))
    }

    // == Listeners ==
    /// Registers a listener. Returns false when the identical listener is
    /// already registered (scope and delivery mode are ignored for
    /// duplicate detection).
    pub fn register_listener(
        &self,
        listener: Arc<dyn CacheEntryListener<K, V>>,
        scope: NotificationScope,
        synchronous: bool,
    ) -> bool {
        self.inner.listeners.register(listener, scope, synchronous)
    }

    /// Unregisters a listener by identity. Returns false if it was not
    /// registered.
    pub fn unregister_listener(&self, listener: &Arc<dyn CacheEntryListener<K, V>>) -> bool {
        self.inner.listeners.unregister(listener)
    }

    // == Iteration ==
    /// Returns an iterator over a point-in-time snapshot of the entries.
    pub fn iter(&self) -> Result<EntryIter<K, V>> {
        self.inner.check_started()?;
        let snapshot = self.inner.lock_store().snapshot()?;
        Ok(EntryIter {
            entries: snapshot.into_iter(),
        })
    }

    // == Statistics ==
    /// Returns a statistics snapshot, or None when statistics are disabled.
    pub fn statistics(&self) -> Result<Option<StatsSnapshot>> {
        self.inner.statistics()
    }

    /// Resets all statistics counters.
    pub fn clear_statistics(&self) -> Result<()> {
        self.inner.clear_statistics()
    }
}

// == Cache Builder ==
/// Assembles the immutable configuration of a cache before its first start.
///
/// Listeners registered through the builder are subject to the same
/// identity-based duplicate rejection as
/// [`Cache::register_listener`]; later registration changes go through the
/// engine, not the configuration.
pub struct CacheBuilder<K: CacheKey, V: CacheValue> {
    name: String,
    config: CacheConfig,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    writer: Option<Arc<dyn CacheWriter<K, V>>>,
    listeners: Vec<(Arc<dyn CacheEntryListener<K, V>>, NotificationScope, bool)>,
}

impl<K: CacheKey, V: CacheValue> CacheBuilder<K, V> {
    /// Creates a builder with the default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: CacheConfig::default(),
            loader: None,
            writer: None,
            listeners: Vec::new(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the storage policy: by value (deep copies) or by reference
    /// (shared handles).
    pub fn store_by_value(mut self, store_by_value: bool) -> Self {
        self.config.store_by_value = store_by_value;
        self
    }

    /// Enables or disables statistics recording.
    pub fn statistics_enabled(mut self, enabled: bool) -> Self {
        self.config.statistics_enabled = enabled;
        self
    }

    /// Enables or disables lifecycle management logging.
    pub fn management_enabled(mut self, enabled: bool) -> Self {
        self.config.management_enabled = enabled;
        self
    }

    /// Sets the number of asynchronous load workers.
    pub fn load_workers(mut self, workers: usize) -> Self {
        self.config.load_workers = workers;
        self
    }

    /// Sets the read-through loader.
    pub fn loader(mut self, loader: Arc<dyn CacheLoader<K, V>>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Sets the write-through writer.
    pub fn writer(mut self, writer: Arc<dyn CacheWriter<K, V>>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Registers a listener to be installed when the cache is built.
    pub fn add_listener(
        mut self,
        listener: Arc<dyn CacheEntryListener<K, V>>,
        scope: NotificationScope,
        synchronous: bool,
    ) -> Self {
        self.listeners.push((listener, scope, synchronous));
        self
    }

    /// Builds the cache in the UNINITIALISED state.
    pub fn build(self) -> Result<Cache<K, V>> {
        let executor = TaskExecutor::new(self.config.load_workers)?;
        let (listeners, delivery_rx) = ListenerRegistry::new();
        for (listener, scope, synchronous) in self.listeners {
            if !listeners.register(listener, scope, synchronous) {
                debug!(cache = %self.name, "Ignoring duplicate listener registration");
            }
        }
        let store: Box<dyn ValueStore<K, V>> = if self.config.store_by_value {
            Box::new(ByValueStore::new())
        } else {
            Box::new(ByRefStore::new())
        };
        let inner = Arc::new(CacheInner {
            name: self.name,
            config: self.config,
            status: AtomicU8::new(STATUS_UNINITIALISED),
            store: Mutex::new(store),
            statistics: CacheStatistics::new(),
            listeners,
            loader: self.loader,
            writer: self.writer,
        });
        executor.spawn_task(run_delivery_worker(delivery_rx));
        Ok(Cache {
            inner,
            executor: Arc::new(executor),
        })
    }
}
