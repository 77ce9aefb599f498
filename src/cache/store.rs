//! Value Store Module
//!
//! Key-value storage behind the cache engine, in two variants: by-reference
//! (shared handles) and by-value (deep copies on store and retrieve).

use std::collections::HashMap;

use crate::cache::{CacheKey, CacheValue, DeepCopy, Entry};
use crate::error::Result;

// == Value Store Contract ==
/// Storage contract the cache engine drives.
///
/// The engine serializes access with a whole-store mutex, so implementations
/// are single-threaded and the compare-and-swap operations
/// ([`remove_if_equals`](ValueStore::remove_if_equals),
/// [`replace_if_equals`](ValueStore::replace_if_equals)) evaluate equality
/// and mutate in one call with nothing interleaving.
pub trait ValueStore<K, V>: Send {
    /// Returns the value for a key, or None if absent.
    fn get(&self, key: &K) -> Result<Option<V>>;

    /// Returns true if the key is present.
    fn contains_key(&self, key: &K) -> bool;

    /// Stores a value under a key, overwriting any previous value.
    fn put(&mut self, key: K, value: V) -> Result<()>;

    /// Stores a value and returns the previous value, if any.
    fn get_and_put(&mut self, key: K, value: V) -> Result<Option<V>>;

    /// Stores every pair in the batch.
    fn put_all(&mut self, entries: Vec<(K, V)>) -> Result<()>;

    /// Stores the value only if the key is absent. Returns true on insert.
    fn put_if_absent(&mut self, key: K, value: V) -> Result<bool>;

    /// Removes a key, returning the previous value if one was present.
    fn remove(&mut self, key: &K) -> Option<V>;

    /// Removes the key only if its current value equals `expected`.
    fn remove_if_equals(&mut self, key: &K, expected: &V) -> bool;

    /// Removes a key and returns the previous value, if any.
    fn get_and_remove(&mut self, key: &K) -> Option<V>;

    /// Replaces the value only if the key is present. Returns the replaced
    /// value, or None if the key was absent.
    fn replace(&mut self, key: &K, value: V) -> Result<Option<V>>;

    /// Replaces the value only if the current value equals `expected`.
    fn replace_if_equals(&mut self, key: &K, expected: &V, value: V) -> Result<bool>;

    /// Replaces the value if present, returning the previous value.
    fn get_and_replace(&mut self, key: &K, value: V) -> Result<Option<V>>;

    /// Returns the number of stored entries.
    fn len(&self) -> usize;

    /// Returns a copy of every stored key.
    fn keys(&self) -> Vec<K>;

    /// Removes every entry.
    fn clear(&mut self);

    /// Returns a point-in-time copy of all entries.
    fn snapshot(&self) -> Result<Vec<Entry<K, V>>>;
}

// == By-Reference Store ==
/// Stores and returns the exact handle supplied by the caller.
///
/// Values are cloned as handles, not copied: with handle types such as
/// `Arc<Mutex<T>>`, callers share mutable state with the store. Externally
/// mutating a stored value is a documented hazard of this policy, not a bug.
#[derive(Debug)]
pub struct ByRefStore<K, V> {
    entries: HashMap<K, V>,
}

impl<K, V> ByRefStore<K, V> {
    /// Creates an empty by-reference store.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, V> Default for ByRefStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey, V: CacheValue> ValueStore<K, V> for ByRefStore<K, V> {
    fn get(&self, key: &K) -> Result<Option<V>> {
        Ok(self.entries.get(key).cloned())
    }

    fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn put(&mut self, key: K, value: V) -> Result<()> {
        self.entries.insert(key, value);
        Ok(())
    }

    fn get_and_put(&mut self, key: K, value: V) -> Result<Option<V>> {
        Ok(self.entries.insert(key, value))
    }

    fn put_all(&mut self, entries: Vec<(K, V)>) -> Result<()> {
        self.entries.extend(entries);
        Ok(())
    }

    fn put_if_absent(&mut self, key: K, value: V) -> Result<bool> {
        if self.entries.contains_key(&key) {
            return Ok(false);
        }
        self.entries.insert(key, value);
        Ok(true)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    fn remove_if_equals(&mut self, key: &K, expected: &V) -> bool {
        let matches = matches!(self.entries.get(key), Some(current) if current == expected);
        if matches {
            self.entries.remove(key);
        }
        matches
    }

    fn get_and_remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    fn replace(&mut self, key: &K, value: V) -> Result<Option<V>> {
        match self.entries.get_mut(key) {
            Some(slot) => Ok(Some(std::mem::replace(slot, value))),
            None => Ok(None),
        }
    }

    fn replace_if_equals(&mut self, key: &K, expected: &V, value: V) -> Result<bool> {
        match self.entries.get_mut(key) {
            Some(slot) if slot == expected => {
                *slot = value;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get_and_replace(&mut self, key: &K, value: V) -> Result<Option<V>> {
        match self.entries.get_mut(key) {
            Some(slot) => Ok(Some(std::mem::replace(slot, value))),
            None => Ok(None),
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn keys(&self) -> Vec<K> {
        self.entries.keys().cloned().collect()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn snapshot(&self) -> Result<Vec<Entry<K, V>>> {
        Ok(self
            .entries
            .iter()
            .map(|(k, v)| Entry::new(k.clone(), v.clone()))
            .collect())
    }
}

// == By-Value Store ==
/// Deep-copies every key and value on store, and every value on retrieve.
///
/// The incoming copy protects the store from external key/value mutation
/// corrupting its index; the outgoing copy guarantees no caller can observe
/// another caller's in-place mutation. Types marked
/// [`DeepCopy::IMMUTABLE`] skip the copy.
#[derive(Debug)]
pub struct ByValueStore<K, V> {
    entries: HashMap<K, V>,
}

impl<K, V> ByValueStore<K, V> {
    /// Creates an empty by-value store.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, V> Default for ByValueStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Copies a value unless its type is marked immutable.
fn copied<T: DeepCopy + Clone>(value: &T) -> Result<T> {
    if T::IMMUTABLE {
        Ok(value.clone())
    } else {
        value.deep_copy()
    }
}

impl<K: CacheKey, V: CacheValue> ValueStore<K, V> for ByValueStore<K, V> {
    fn get(&self, key: &K) -> Result<Option<V>> {
        match self.entries.get(key) {
            Some(value) => Ok(Some(copied(value)?)),
            None => Ok(None),
        }
    }

    fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn put(&mut self, key: K, value: V) -> Result<()> {
        self.entries.insert(copied(&key)?, copied(&value)?);
        Ok(())
    }

    fn get_and_put(&mut self, key: K, value: V) -> Result<Option<V>> {
        // The displaced value is moved out, nothing else references it.
        Ok(self.entries.insert(copied(&key)?, copied(&value)?))
    }

    fn put_all(&mut self, entries: Vec<(K, V)>) -> Result<()> {
        // Copy the whole batch before mutating so a copy failure midway
        // leaves the store untouched.
        let copies: Vec<(K, V)> = entries
            .iter()
            .map(|(k, v)| Ok((copied(k)?, copied(v)?)))
            .collect::<Result<_>>()?;
        self.entries.extend(copies);
        Ok(())
    }

    fn put_if_absent(&mut self, key: K, value: V) -> Result<bool> {
        if self.entries.contains_key(&key) {
            return Ok(false);
        }
        self.entries.insert(copied(&key)?, copied(&value)?);
        Ok(true)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    fn remove_if_equals(&mut self, key: &K, expected: &V) -> bool {
        let matches = matches!(self.entries.get(key), Some(current) if current == expected);
        if matches {
            self.entries.remove(key);
        }
        matches
    }

    fn get_and_remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    fn replace(&mut self, key: &K, value: V) -> Result<Option<V>> {
        if !self.entries.contains_key(key) {
            return Ok(None);
        }
        let copy = copied(&value)?;
        match self.entries.get_mut(key) {
            Some(slot) => Ok(Some(std::mem::replace(slot, copy))),
            None => Ok(None),
        }
    }

    fn replace_if_equals(&mut self, key: &K, expected: &V, value: V) -> Result<bool> {
        let matches = matches!(self.entries.get(key), Some(current) if current == expected);
        if !matches {
            return Ok(false);
        }
        let copy = copied(&value)?;
        if let Some(slot) = self.entries.get_mut(key) {
            *slot = copy;
        }
        Ok(true)
    }

    fn get_and_replace(&mut self, key: &K, value: V) -> Result<Option<V>> {
        if !self.entries.contains_key(key) {
            return Ok(None);
        }
        let copy = copied(&value)?;
        match self.entries.get_mut(key) {
            Some(slot) => Ok(Some(std::mem::replace(slot, copy))),
            None => Ok(None),
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn keys(&self) -> Vec<K> {
        self.entries.keys().cloned().collect()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn snapshot(&self) -> Result<Vec<Entry<K, V>>> {
        self.entries
            .iter()
            .map(|(k, v)| Ok(Entry::new(copied(k)?, copied(v)?)))
            .collect()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn by_ref() -> ByRefStore<String, Vec<u32>> {
        ByRefStore::new()
    }

    fn by_value() -> ByValueStore<String, Vec<u32>> {
        ByValueStore::new()
    }

    #[test]
    fn test_put_and_get_round_trip() {
        let mut store = by_ref();

        store.put("k".to_string(), vec![1, 2]).unwrap();
        assert_eq!(store.get(&"k".to_string()).unwrap(), Some(vec![1, 2]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_absent() {
        let store = by_ref();
        assert_eq!(store.get(&"missing".to_string()).unwrap(), None);
    }

    #[test]
    fn test_get_and_put_returns_prior() {
        let mut store = by_ref();

        let prior = store.get_and_put("k".to_string(), vec![1]).unwrap();
        assert_eq!(prior, None);

        let prior = store.get_and_put("k".to_string(), vec![2]).unwrap();
        assert_eq!(prior, Some(vec![1]));
    }

    #[test]
    fn test_put_if_absent_only_inserts_once() {
        let mut store = by_ref();

        assert!(store.put_if_absent("k".to_string(), vec![1]).unwrap());
        assert!(!store.put_if_absent("k".to_string(), vec![2]).unwrap());
        assert_eq!(store.get(&"k".to_string()).unwrap(), Some(vec![1]));
    }

    #[test]
    fn test_remove_returns_prior() {
        let mut store = by_ref();
        store.put("k".to_string(), vec![1]).unwrap();

        assert_eq!(store.remove(&"k".to_string()), Some(vec![1]));
        assert_eq!(store.remove(&"k".to_string()), None);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_remove_if_equals() {
        let mut store = by_ref();
        store.put("k".to_string(), vec![1]).unwrap();

        assert!(!store.remove_if_equals(&"k".to_string(), &vec![9]));
        assert!(store.contains_key(&"k".to_string()));

        assert!(store.remove_if_equals(&"k".to_string(), &vec![1]));
        assert!(!store.contains_key(&"k".to_string()));
    }

    #[test]
    fn test_replace_only_if_present() {
        let mut store = by_ref();

        assert_eq!(store.replace(&"k".to_string(), vec![1]).unwrap(), None);
        assert!(!store.contains_key(&"k".to_string()));

        store.put("k".to_string(), vec![1]).unwrap();
        let prior = store.replace(&"k".to_string(), vec![2]).unwrap();
        assert_eq!(prior, Some(vec![1]));
        assert_eq!(store.get(&"k".to_string()).unwrap(), Some(vec![2]));
    }

    #[test]
    fn test_replace_if_equals() {
        let mut store = by_ref();
        store.put("k".to_string(), vec![1]).unwrap();

        assert!(!store
            .replace_if_equals(&"k".to_string(), &vec![9], vec![2])
            .unwrap());
        assert_eq!(store.get(&"k".to_string()).unwrap(), Some(vec![1]));

        assert!(store
            .replace_if_equals(&"k".to_string(), &vec![1], vec![2])
            .unwrap());
        assert_eq!(store.get(&"k".to_string()).unwrap(), Some(vec![2]));
    }

    #[test]
    fn test_put_all_and_clear() {
        let mut store = by_ref();

        store
            .put_all(vec![
                ("a".to_string(), vec![1]),
                ("b".to_string(), vec![2]),
            ])
            .unwrap();
        assert_eq!(store.len(), 2);

        store.clear();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_snapshot_contains_all_entries() {
        let mut store = by_ref();
        store.put("a".to_string(), vec![1]).unwrap();
        store.put("b".to_string(), vec![2]).unwrap();

        let mut snapshot = store.snapshot().unwrap();
        snapshot.sort_by(|x, y| x.key().cmp(y.key()));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].key(), "a");
        assert_eq!(snapshot[1].value(), &vec![2]);
    }

    #[test]
    fn test_by_value_get_returns_independent_copy() {
        let mut store = by_value();
        store.put("k".to_string(), vec![1, 2, 3]).unwrap();

        let mut first = store.get(&"k".to_string()).unwrap().unwrap();
        first.push(99);

        // The caller's mutation must not be observable on a second get.
        let second = store.get(&"k".to_string()).unwrap().unwrap();
        assert_eq!(second, vec![1, 2, 3]);
    }

    #[test]
    fn test_by_value_put_copies_input() {
        let mut store = by_value();
        let mut value = vec![1, 2];

        store.put("k".to_string(), value.clone()).unwrap();
        value.push(3);

        assert_eq!(store.get(&"k".to_string()).unwrap(), Some(vec![1, 2]));
    }

    #[test]
    fn test_by_value_cas_semantics() {
        let mut store = by_value();
        store.put("k".to_string(), vec![1]).unwrap();

        assert!(store
            .replace_if_equals(&"k".to_string(), &vec![1], vec![2])
            .unwrap());
        assert!(store.remove_if_equals(&"k".to_string(), &vec![2]));
        assert_eq!(store.len(), 0);
    }
}
