//! Cache Module
//!
//! The in-process cache engine: typed entries, storage policies, statistics,
//! listeners, loader/writer bridging and the lifecycle-aware facade.

mod copy;
mod engine;
mod entry;
mod listener;
mod loader;
mod registry;
mod stats;
mod store;


// Re-export public types
pub use copy::{serde_round_trip, CacheKey, CacheValue, DeepCopy};
pub use engine::{Cache, CacheBuilder, CacheStatus, EntryIter, EntryMutation};
pub use entry::Entry;
pub use listener::{
    CacheEntryEvent, CacheEntryListener, EventType, ListenerRegistry, NotificationScope,
};
pub use loader::{CacheLoader, CacheWriter, LoadHandle, TaskExecutor};
pub use registry::CacheRegistry;
pub use stats::{CacheStatistics, StatsSnapshot};
pub use store::{ByRefStore, ByValueStore, ValueStore};
