//! Cache Entry Module
//!
//! Defines the immutable key-value pair exposed to callers on iteration
//! and returned from loader callbacks.

// == Cache Entry ==
/// An immutable (key, value) pair.
///
/// A key is always present by construction; values are never optional once
/// stored. Equality is by content of both key and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K, V> {
    key: K,
    value: V,
}

impl<K, V> Entry<K, V> {
    // == Constructor ==
    /// Creates a new entry from a key and a value.
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    // == Accessors ==
    /// Returns a reference to the key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns a reference to the value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the entry and returns the (key, value) pair.
    pub fn into_pair(self) -> (K, V) {
        (self.key, self.value)
    }
}
