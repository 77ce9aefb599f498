//! Value Copy Module
//!
//! The explicit deep-copy capability behind the by-value storage policy.
//! Storable types declare how an independent copy is produced; known
//! immutable types opt out of copying entirely.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, Result};

// == Deep Copy Capability ==
/// Produces an independent copy of a value for by-value storage.
///
/// A by-value cache round-trips every stored and retrieved value through
/// [`DeepCopy::deep_copy`] so that no caller can observe another caller's
/// in-place mutation. Types whose `clone()` already yields an independent
/// value (primitives, `String`) set [`DeepCopy::IMMUTABLE`] to `true` and
/// the store skips the copy.
///
/// User types typically opt in through the [`deep_copy_via_serde`] macro,
/// which implements the copy as a serialize-then-deserialize round trip.
///
/// [`deep_copy_via_serde`]: crate::deep_copy_via_serde
pub trait DeepCopy: Sized {
    /// True for types where `clone()` already yields an independent value,
    /// allowing the by-value store to skip the copy.
    const IMMUTABLE: bool = false;

    /// Returns a copy sharing no mutable state with `self`.
    fn deep_copy(&self) -> Result<Self>;
}

// == Serde Round Trip ==
/// Copies a value by serializing it to JSON and deserializing it back.
///
/// The round trip guarantees the copy shares no state with the original,
/// matching the serializer-based copy path of by-value caches.
pub fn serde_round_trip<T: Serialize + DeserializeOwned>(value: &T) -> Result<T> {
    let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Copy(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| CacheError::Copy(e.to_string()))
}

// == Serde-backed Implementations ==
/// Implements [`DeepCopy`] for one or more types via a serde round trip.
///
/// # Example
/// ```
/// use cachecore::deep_copy_via_serde;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Profile {
///     name: String,
///     scores: Vec<u32>,
/// }
///
/// deep_copy_via_serde!(Profile);
/// ```
#[macro_export]
macro_rules! deep_copy_via_serde {
    ($($t:ty),+ $(,)?) => {
        $(
            impl $crate::cache::DeepCopy for $t {
                fn deep_copy(&self) -> $crate::error::Result<Self> {
                    $crate::cache::serde_round_trip(self)
                }
            }
        )+
    };
}

// Primitives and String: clone is already an independent value.
macro_rules! deep_copy_immutable {
    ($($t:ty),+ $(,)?) => {
        $(
            impl DeepCopy for $t {
                const IMMUTABLE: bool = true;

                fn deep_copy(&self) -> Result<Self> {
                    Ok(self.clone())
                }
            }
        )+
    };
}

deep_copy_immutable!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, String
);

impl<T: DeepCopy> DeepCopy for Option<T> {
    const IMMUTABLE: bool = T::IMMUTABLE;

    fn deep_copy(&self) -> Result<Self> {
        self.as_ref().map(|v| v.deep_copy()).transpose()
    }
}

impl<T: DeepCopy> DeepCopy for Vec<T> {
    fn deep_copy(&self) -> Result<Self> {
        self.iter().map(|v| v.deep_copy()).collect()
    }
}

impl<K, V> DeepCopy for HashMap<K, V>
where
    K: DeepCopy + Eq + Hash,
    V: DeepCopy,
{
    fn deep_copy(&self) -> Result<Self> {
        self.iter()
            .map(|(k, v)| Ok((k.deep_copy()?, v.deep_copy()?)))
            .collect()
    }
}

// == Storable Type Bounds ==
/// Bounds required of cache keys.
///
/// Blanket-implemented; any hashable, clonable, deep-copyable type usable
/// across threads qualifies.
pub trait CacheKey: Eq + Hash + Clone + DeepCopy + Debug + Send + Sync + 'static {}

impl<T: Eq + Hash + Clone + DeepCopy + Debug + Send + Sync + 'static> CacheKey for T {}

/// Bounds required of cache values.
///
/// `PartialEq` backs the compare-and-swap operations; `DeepCopy` backs the
/// by-value storage policy.
pub trait CacheValue: Clone + PartialEq + DeepCopy + Debug + Send + Sync + 'static {}

impl<T: Clone + PartialEq + DeepCopy + Debug + Send + Sync + 'static> CacheValue for T {}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        id: u32,
        tags: Vec<String>,
    }

    deep_copy_via_serde!(Payload);

    #[test]
    fn test_primitives_are_immutable() {
        assert!(u64::IMMUTABLE);
        assert!(String::IMMUTABLE);
        assert!(!Vec::<String>::IMMUTABLE);
    }

    #[test]
    fn test_serde_round_trip_is_independent() {
        let original = Payload {
            id: 9,
            tags: vec!["a".to_string(), "b".to_string()],
        };

        let mut copy = original.deep_copy().unwrap();
        assert_eq!(copy, original);

        copy.tags.push("c".to_string());
        assert_eq!(original.tags.len(), 2);
    }

    #[test]
    fn test_vec_deep_copy() {
        let original = vec!["x".to_string(), "y".to_string()];
        let copy = original.deep_copy().unwrap();

        assert_eq!(copy, original);
    }

    #[test]
    fn test_option_deep_copy() {
        let value: Option<u32> = Some(5);
        assert_eq!(value.deep_copy().unwrap(), Some(5));

        let absent: Option<u32> = None;
        assert_eq!(absent.deep_copy().unwrap(), None);
    }

    #[test]
    fn test_hashmap_deep_copy() {
        let mut original = HashMap::new();
        original.insert("k".to_string(), vec![1u32, 2]);

        let copy = original.deep_copy().unwrap();
        assert_eq!(copy, original);
    }
}
