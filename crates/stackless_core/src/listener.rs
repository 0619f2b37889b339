//! Listener callbacks and the per-stream event listener registry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::entity::Entity;
use crate::keys::{ClassKey, EventInstanceKey, EventSource};
use crate::value::Value;

/// Handle returned when a listener is registered; used to remove it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocates a process-unique listener id.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener:{}", self.0)
    }
}

/// Notification delivered to an entity's change listeners.
#[derive(Debug, Clone)]
pub struct EntityUpdated {
    /// The entity that changed. Still readable when `deleted` is set.
    pub entity: Entity,
    /// Whether the server deleted the entity.
    pub deleted: bool,
}

/// An event raised by an entity or service and pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event class.
    pub class: ClassKey,
    /// Raising object.
    pub source: EventSource,
    /// Event payload, with references resolved.
    pub properties: BTreeMap<String, Value>,
}

impl Event {
    /// Returns the stream this event belongs to.
    #[must_use]
    pub fn instance_key(&self) -> EventInstanceKey {
        EventInstanceKey::new(self.class, self.source.clone())
    }

    /// Looks up a payload property.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

type Callback<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// Async callback invoked with an [`EntityUpdated`] notification.
#[derive(Clone)]
pub struct ChangeListener(Callback<EntityUpdated>);

impl ChangeListener {
    /// Wraps an async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(EntityUpdated) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self(Arc::new(move |update| -> BoxFuture<'static, ()> { Box::pin(f(update)) }))
    }

    /// Wraps a synchronous closure.
    pub fn from_fn(f: impl Fn(EntityUpdated) + Send + Sync + 'static) -> Self {
        Self(Arc::new(move |update| -> BoxFuture<'static, ()> {
            f(update);
            Box::pin(async {})
        }))
    }

    /// Invokes the listener.
    pub fn call(&self, update: EntityUpdated) -> BoxFuture<'static, ()> {
        (self.0)(update)
    }
}

impl fmt::Debug for ChangeListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChangeListener")
    }
}

/// Async callback invoked with an [`Event`].
#[derive(Clone)]
pub struct EventListener(Callback<Event>);

impl EventListener {
    /// Wraps an async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self(Arc::new(move |event| -> BoxFuture<'static, ()> { Box::pin(f(event)) }))
    }

    /// Wraps a synchronous closure.
    pub fn from_fn(f: impl Fn(Event) + Send + Sync + 'static) -> Self {
        Self(Arc::new(move |event| -> BoxFuture<'static, ()> {
            f(event);
            Box::pin(async {})
        }))
    }

    /// Invokes the listener.
    pub fn call(&self, event: Event) -> BoxFuture<'static, ()> {
        (self.0)(event)
    }
}

impl fmt::Debug for EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventListener")
    }
}

/// Listeners per event stream, kept in registration order.
#[derive(Debug, Default)]
pub struct EventListenerRegistry {
    streams: Mutex<HashMap<EventInstanceKey, Vec<(ListenerId, EventListener)>>>,
}

impl EventListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener to a stream.
    pub fn add(&self, key: EventInstanceKey, listener: EventListener) -> ListenerId {
        let id = ListenerId::next();
        self.streams.lock().entry(key).or_default().push((id, listener));
        id
    }

    /// Whether anything listens to the stream.
    #[must_use]
    pub fn has_listeners(&self, key: &EventInstanceKey) -> bool {
        self.streams.lock().get(key).is_some_and(|l| !l.is_empty())
    }

    /// Snapshot of a stream's listeners in registration order.
    #[must_use]
    pub fn listeners(&self, key: &EventInstanceKey) -> Vec<EventListener> {
        self.streams
            .lock()
            .get(key)
            .map(|l| l.iter().map(|(_, listener)| listener.clone()).collect())
            .unwrap_or_default()
    }

    /// Removes one listener. Returns whether it was registered.
    pub fn remove(&self, key: &EventInstanceKey, id: ListenerId) -> bool {
        let mut streams = self.streams.lock();
        let Some(listeners) = streams.get_mut(key) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            streams.remove(key);
        }
        removed
    }

    /// Removes every listener of a stream. Returns how many were removed.
    pub fn remove_all(&self, key: &EventInstanceKey) -> usize {
        self.streams.lock().remove(key).map_or(0, |l| l.len())
    }

    /// Drops every listener of every stream.
    pub fn clear(&self) {
        self.streams.lock().clear();
    }

    /// Number of streams with at least one listener.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }
}
