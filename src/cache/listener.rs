//! Listener Registry Module
//!
//! Registered entry observers, each bound to a notification scope and a
//! synchronous/asynchronous delivery mode. Synchronous listeners run on the
//! mutating caller's thread; asynchronous listeners are fed through a queue
//! drained by a dedicated delivery worker so a slow listener never blocks
//! cache operations.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

// == Event Types ==
/// The kind of change an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// An entry was stored under a previously absent key
    Created,
    /// An existing entry's value was replaced
    Updated,
    /// An entry was removed
    Removed,
    /// An entry expired (no producer in this engine; deliverable for
    /// listeners shared with expiring caches)
    Expired,
}

/// A change notification delivered to registered listeners.
///
/// `value` is absent only for removal signaling where the removed value was
/// not materialized (bulk clears).
#[derive(Debug, Clone)]
pub struct CacheEntryEvent<K, V> {
    /// What happened
    pub event_type: EventType,
    /// The affected key
    pub key: K,
    /// The stored (or removed) value, when materialized
    pub value: Option<V>,
}

// == Notification Scope ==
/// Whether an event is observed locally only or also propagated to peers.
///
/// Peer propagation is outside this engine; `Remote` registrations are
/// accepted and recorded, and still receive local delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationScope {
    /// Deliver on this node only
    Local,
    /// Deliver locally and mark for peer propagation
    Remote,
}

// == Listener Contract ==
/// An observer of cache entry changes.
///
/// Implementations must tolerate concurrent invocation. A panicking listener
/// is logged and skipped; it never aborts the mutation that fired the event
/// or delivery to the remaining listeners.
pub trait CacheEntryListener<K, V>: Send + Sync {
    /// Called once per matching event.
    fn on_event(&self, event: &CacheEntryEvent<K, V>);
}

/// A listener handle paired with its delivery options.
struct Registration<K, V> {
    listener: Arc<dyn CacheEntryListener<K, V>>,
    #[allow(dead_code)] // recorded for peer propagation, unused locally
    scope: NotificationScope,
    synchronous: bool,
}

/// Work item for the asynchronous delivery worker: one event plus the
/// listeners it goes to, snapshotted at fire time.
pub(crate) struct DeliveryJob<K, V> {
    listeners: Vec<Arc<dyn CacheEntryListener<K, V>>>,
    event: CacheEntryEvent<K, V>,
}

// == Listener Registry ==
/// The set of registered listeners, keyed by listener identity.
///
/// Identity is the listener allocation (the `Arc` pointer), never its
/// contents: registering the same listener twice is rejected even when the
/// scopes differ, and the first registration's scope wins. Whether that
/// scope-ignoring rejection is intended is ambiguous in the source contract;
/// it is preserved here and documented rather than resolved.
pub struct ListenerRegistry<K, V> {
    registrations: RwLock<HashMap<usize, Registration<K, V>>>,
    async_tx: UnboundedSender<DeliveryJob<K, V>>,
}

/// Identity of a listener allocation.
fn listener_id<K, V>(listener: &Arc<dyn CacheEntryListener<K, V>>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

/// Invokes one listener, isolating panics from the caller.
fn deliver<K, V>(listener: &Arc<dyn CacheEntryListener<K, V>>, event: &CacheEntryEvent<K, V>) {
    if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
        warn!("Cache entry listener panicked; continuing with remaining listeners");
    }
}

impl<K: Clone + Send + 'static, V: Clone + Send + 'static> ListenerRegistry<K, V> {
    // == Constructor ==
    /// Creates an empty registry and the queue its delivery worker drains.
    pub(crate) fn new() -> (Self, UnboundedReceiver<DeliveryJob<K, V>>) {
        let (async_tx, async_rx) = unbounded_channel();
        (
            Self {
                registrations: RwLock::new(HashMap::new()),
                async_tx,
            },
            async_rx,
        )
    }

    // == Register ==
    /// Adds a listener with its scope and delivery mode.
    ///
    /// Returns false (and changes nothing) if the identical listener is
    /// already registered, regardless of scope.
    pub fn register(
        &self,
        listener: Arc<dyn CacheEntryListener<K, V>>,
        scope: NotificationScope,
        synchronous: bool,
    ) -> bool {
        let id = listener_id(&listener);
        let mut registrations = self.registrations.write().unwrap();
        if registrations.contains_key(&id) {
            return false;
        }
        registrations.insert(
            id,
            Registration {
                listener,
                scope,
                synchronous,
            },
        );
        true
    }

    // == Unregister ==
    /// Removes a listener by identity. Returns false if it was not registered.
    pub fn unregister(&self, listener: &Arc<dyn CacheEntryListener<K, V>>) -> bool {
        let id = listener_id(listener);
        self.registrations.write().unwrap().remove(&id).is_some()
    }

    /// Returns the number of registered listeners.
    pub fn len(&self) -> usize {
        self.registrations.read().unwrap().len()
    }

    /// Returns true if no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.read().unwrap().is_empty()
    }

    // == Fire ==
    /// Delivers an event to every registered listener.
    ///
    /// Synchronous listeners run on the calling thread before this returns;
    /// asynchronous listeners are queued for the delivery worker. The caller
    /// must not hold the store lock, so a slow listener cannot stall
    /// unrelated cache operations.
    pub fn fire(&self, event: CacheEntryEvent<K, V>) {
        let (sync_listeners, async_listeners) = {
            let registrations = self.registrations.read().unwrap();
            let mut sync_listeners = Vec::new();
            let mut async_listeners = Vec::new();
            for registration in registrations.values() {
                if registration.synchronous {
                    sync_listeners.push(Arc::clone(&registration.listener));
                } else {
                    async_listeners.push(Arc::clone(&registration.listener));
                }
            }
            (sync_listeners, async_listeners)
        };

        for listener in &sync_listeners {
            deliver(listener, &event);
        }

        if !async_listeners.is_empty() {
            // Send only fails when the worker is gone, i.e. the cache is
            // being torn down.
            let _ = self.async_tx.send(DeliveryJob {
                listeners: async_listeners,
                event,
            });
        }
    }
}

// == Delivery Worker ==
/// Drains the asynchronous delivery queue.
///
/// A single consumer processes jobs in order, which preserves per-listener
/// program order for events on the same key. Runs until every sender is
/// dropped.
pub(crate) async fn run_delivery_worker<K, V>(mut rx: UnboundedReceiver<DeliveryJob<K, V>>) {
    while let Some(job) = rx.recv().await {
        for listener in &job.listeners {
            deliver(listener, &job.event);
        }
    }
    debug!("Listener delivery worker stopped");
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every event it sees.
    struct Recorder {
        seen: Mutex<Vec<(EventType, String)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<(EventType, String)> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl CacheEntryListener<String, String> for Recorder {
        fn on_event(&self, event: &CacheEntryEvent<String, String>) {
            self.seen
                .lock()
                .unwrap()
                .push((event.event_type, event.key.clone()));
        }
    }

    /// Panics on every event.
    struct Panicker;

    impl CacheEntryListener<String, String> for Panicker {
        fn on_event(&self, _event: &CacheEntryEvent<String, String>) {
            panic!("listener failure");
        }
    }

    fn created(key: &str) -> CacheEntryEvent<String, String> {
        CacheEntryEvent {
            event_type: EventType::Created,
            key: key.to_string(),
            value: Some("v".to_string()),
        }
    }

    #[test]
    fn test_register_rejects_duplicate_listener() {
        let (registry, _rx) = ListenerRegistry::<String, String>::new();
        let recorder = Recorder::new();
        let listener: Arc<dyn CacheEntryListener<String, String>> = recorder;

        assert!(registry.register(Arc::clone(&listener), NotificationScope::Local, true));
        // Same listener under a different scope is still a duplicate.
        assert!(!registry.register(Arc::clone(&listener), NotificationScope::Remote, true));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_by_identity() {
        let (registry, _rx) = ListenerRegistry::<String, String>::new();
        let listener: Arc<dyn CacheEntryListener<String, String>> = Recorder::new();

        assert!(!registry.unregister(&listener));
        registry.register(Arc::clone(&listener), NotificationScope::Local, true);
        assert!(registry.unregister(&listener));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_distinct_listeners_both_registered() {
        let (registry, _rx) = ListenerRegistry::<String, String>::new();
        let first: Arc<dyn CacheEntryListener<String, String>> = Recorder::new();
        let second: Arc<dyn CacheEntryListener<String, String>> = Recorder::new();

        assert!(registry.register(first, NotificationScope::Local, true));
        assert!(registry.register(second, NotificationScope::Local, false));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_sync_delivery_in_program_order() {
        let (registry, _rx) = ListenerRegistry::<String, String>::new();
        let recorder = Recorder::new();
        registry.register(Arc::clone(&recorder) as Arc<dyn CacheEntryListener<String, String>>, NotificationScope::Local, true);

        registry.fire(created("a"));
        registry.fire(CacheEntryEvent {
            event_type: EventType::Removed,
            key: "a".to_string(),
            value: None,
        });

        assert_eq!(
            recorder.events(),
            vec![
                (EventType::Created, "a".to_string()),
                (EventType::Removed, "a".to_string()),
            ]
        );
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let (registry, _rx) = ListenerRegistry::<String, String>::new();
        let panicker: Arc<dyn CacheEntryListener<String, String>> = Arc::new(Panicker);
        let recorder = Recorder::new();

        registry.register(panicker, NotificationScope::Local, true);
        registry.register(Arc::clone(&recorder) as Arc<dyn CacheEntryListener<String, String>>, NotificationScope::Local, true);

        registry.fire(created("a"));

        assert_eq!(recorder.events().len(), 1);
    }

    #[tokio::test]
    async fn test_async_delivery_through_worker() {
        let (registry, rx) = ListenerRegistry::<String, String>::new();
        let recorder = Recorder::new();
        registry.register(Arc::clone(&recorder) as Arc<dyn CacheEntryListener<String, String>>, NotificationScope::Local, false);

        registry.fire(created("a"));
        registry.fire(created("b"));
        drop(registry); // close the channel so the worker drains and exits

        run_delivery_worker(rx).await;

        assert_eq!(
            recorder.events(),
            vec![
                (EventType::Created, "a".to_string()),
                (EventType::Created, "b".to_string()),
            ]
        );
    }
}
