//! Deferred work tracker.
//!
//! A [`Tracker`] collects the side effects of one top-level operation and
//! applies them in a single pass, in a fixed order:
//!
//! 1. reference resolution, drained to a fixpoint;
//! 2. event delivery;
//! 3. entity change notifications;
//! 4. deletions.
//!
//! Resolution runs as a work-list loop. Resolving a key may fetch an entity,
//! and merging that entity may queue more resolutions on the same tracker;
//! those are handled in the same pass before any listener runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use stackless_core::{
    ClassKey, Entity, EntityKey, EntityUpdated, Event, EventListenerRegistry, EventSource,
    IdentityRegistry, Value,
};
use tracing::debug;

use crate::error::ClientResult;

/// Shared cell receiving a value once its references resolve.
pub type Slot = Arc<Mutex<Value>>;

/// Creates an empty slot.
pub fn new_slot() -> Slot {
    Arc::new(Mutex::new(Value::Undefined))
}

/// Loads entities that are not in the identity registry.
#[async_trait]
pub trait EntityFetcher: Send + Sync {
    /// Fetches `key` from the server, merging the result through `tracker`.
    ///
    /// Returns `None` when the server reports the entity deleted.
    async fn fetch_entity(
        &self,
        log_context: &str,
        key: &EntityKey,
        tracker: &mut Tracker,
    ) -> ClientResult<Option<Entity>>;
}

/// Where a resolved value goes.
#[derive(Debug)]
pub enum Binding {
    /// Nowhere; the resolution only warms the registry.
    Discard,
    /// A property of an entity.
    Property {
        /// Target entity.
        entity: Entity,
        /// Property name.
        name: String,
    },
    /// A caller-owned slot.
    Slot(Slot),
}

impl Binding {
    fn store(self, value: Value) {
        match self {
            Self::Discard => {}
            Self::Property { entity, name } => entity.set(name, value),
            Self::Slot(slot) => *slot.lock() = value,
        }
    }
}

/// One joint resolution: every key is resolved before the value is bound,
/// so a composite value is never stored half-resolved.
#[derive(Debug)]
struct Resolution {
    keys: Vec<EntityKey>,
    then: Option<(Value, Binding)>,
}

/// An event waiting for its payload references.
#[derive(Debug)]
pub struct PendingEvent {
    class: ClassKey,
    source: EventSource,
    properties: Vec<(String, Slot)>,
}

impl PendingEvent {
    /// Creates an event with no payload yet.
    pub fn new(class: ClassKey, source: EventSource) -> Self {
        Self {
            class,
            source,
            properties: Vec::new(),
        }
    }

    /// Adds a payload property, deferring its references through `tracker`.
    pub fn push_property(&mut self, name: impl Into<String>, value: Value, tracker: &mut Tracker) {
        let slot = new_slot();
        tracker.defer(value, Binding::Slot(slot.clone()));
        self.properties.push((name.into(), slot));
    }

    fn into_event(self) -> Event {
        let properties: BTreeMap<String, Value> = self
            .properties
            .into_iter()
            .map(|(name, slot)| {
                let value = std::mem::replace(&mut *slot.lock(), Value::Undefined);
                (name, value)
            })
            .collect();
        Event {
            class: self.class,
            source: self.source,
            properties,
        }
    }
}

/// Per-operation batch of deferred side effects.
#[derive(Debug, Default)]
pub struct Tracker {
    resolutions: Vec<Resolution>,
    events: Vec<PendingEvent>,
    changes: Vec<(Entity, bool)>,
    deletions: Vec<EntityKey>,
    retained: Vec<Entity>,
}

impl Tracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a fetch of `key` with nothing waiting on the result.
    pub fn enqueue_fetch(&mut self, key: EntityKey) {
        self.resolutions.push(Resolution {
            keys: vec![key],
            then: None,
        });
    }

    /// Binds `value` to `binding` once all its references are resolved.
    ///
    /// A value without unresolved references is bound immediately.
    pub fn defer(&mut self, value: Value, binding: Binding) {
        let keys = value.unresolved_keys();
        if keys.is_empty() {
            binding.store(value);
        } else {
            self.resolutions.push(Resolution {
                keys,
                then: Some((value, binding)),
            });
        }
    }

    /// Queues an event for delivery.
    pub fn enqueue_event(&mut self, event: PendingEvent) {
        self.events.push(event);
    }

    /// Queues a change notification.
    pub fn enqueue_change(&mut self, entity: Entity, deleted: bool) {
        self.changes.push((entity, deleted));
    }

    /// Queues an eviction from the identity registry.
    pub fn enqueue_deletion(&mut self, key: EntityKey) {
        self.deletions.push(key);
    }

    /// Keeps `entity` alive until the tracker is applied.
    ///
    /// The identity registry holds entities weakly; an instance merged in
    /// for a nested reference must survive until that reference is bound.
    pub fn retain(&mut self, entity: Entity) {
        self.retained.push(entity);
    }

    /// Number of queued resolutions.
    pub fn pending_resolutions(&self) -> usize {
        self.resolutions.len()
    }

    /// Whether nothing is queued. Retained entities do not count.
    pub fn is_empty(&self) -> bool {
        self.resolutions.is_empty()
            && self.events.is_empty()
            && self.changes.is_empty()
            && self.deletions.is_empty()
    }

    /// Applies every queue once, in order.
    ///
    /// # Errors
    ///
    /// A failed fetch aborts the pass; later queues are left unapplied.
    pub async fn apply_once(
        &mut self,
        log_context: &str,
        registry: &IdentityRegistry,
        events: &EventListenerRegistry,
        fetcher: &dyn EntityFetcher,
    ) -> ClientResult<()> {
        self.resolve_all(log_context, registry, fetcher).await?;
        self.fire_events(log_context, events).await;
        self.fire_changes(log_context).await;
        self.apply_deletions(log_context, registry);
        self.retained.clear();
        Ok(())
    }

    async fn resolve_all(
        &mut self,
        log_context: &str,
        registry: &IdentityRegistry,
        fetcher: &dyn EntityFetcher,
    ) -> ClientResult<()> {
        while !self.resolutions.is_empty() {
            let batch = std::mem::take(&mut self.resolutions);
            for resolution in batch {
                let mut resolved: HashMap<EntityKey, Option<Entity>> = HashMap::new();
                for key in resolution.keys {
                    let entity = match registry.get_or_null(&key) {
                        Some(entity) => Some(entity),
                        None => fetcher.fetch_entity(log_context, &key, self).await?,
                    };
                    resolved.insert(key, entity);
                }
                if let Some((mut value, binding)) = resolution.then {
                    value.resolve_with(&|key: &EntityKey| resolved.get(key).cloned().flatten());
                    binding.store(value);
                }
            }
        }
        Ok(())
    }

    async fn fire_events(&mut self, log_context: &str, registry: &EventListenerRegistry) {
        for pending in std::mem::take(&mut self.events) {
            let event = pending.into_event();
            let key = event.instance_key();
            let listeners = registry.listeners(&key);
            if listeners.is_empty() {
                continue;
            }
            for listener in &listeners {
                listener.call(event.clone()).await;
            }
            debug!(log_context = %log_context, event = %key, count = listeners.len(), "event handled");
        }
    }

    async fn fire_changes(&mut self, log_context: &str) {
        for (entity, deleted) in std::mem::take(&mut self.changes) {
            let listeners = entity.change_listeners();
            if listeners.is_empty() {
                continue;
            }
            for listener in &listeners {
                listener
                    .call(EntityUpdated {
                        entity: entity.clone(),
                        deleted,
                    })
                    .await;
            }
            debug!(
                log_context = %log_context,
                entity = %entity.key(),
                deleted,
                count = listeners.len(),
                "entity update handled"
            );
        }
    }

    fn apply_deletions(&mut self, log_context: &str, registry: &IdentityRegistry) {
        for key in std::mem::take(&mut self.deletions) {
            registry.remove(&key);
            debug!(log_context = %log_context, entity = %key, "entity deleted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackless_core::{ChangeListener, EventInstanceKey, EventListener, NamespaceKey};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(pk: &str) -> EntityKey {
        EntityKey::new(NamespaceKey::new(1, 1).unwrap().class(1), pk).unwrap()
    }

    /// Serves entities from a fixed map, counting fetches.
    #[derive(Default)]
    struct MapFetcher {
        entities: Mutex<HashMap<EntityKey, Entity>>,
        links: Mutex<HashMap<EntityKey, EntityKey>>,
        fetches: AtomicUsize,
        registry: Arc<IdentityRegistry>,
    }

    impl MapFetcher {
        fn with(registry: Arc<IdentityRegistry>) -> Self {
            Self {
                registry,
                ..Self::default()
            }
        }

        fn serve(&self, entity: Entity) {
            self.entities.lock().insert(entity.key().clone(), entity);
        }

        /// When `from` is fetched, its `next` property references `to`.
        fn link(&self, from: &EntityKey, to: &EntityKey) {
            self.links.lock().insert(from.clone(), to.clone());
        }
    }

    #[async_trait]
    impl EntityFetcher for MapFetcher {
        async fn fetch_entity(
            &self,
            _log_context: &str,
            key: &EntityKey,
            tracker: &mut Tracker,
        ) -> ClientResult<Option<Entity>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let entity = self.entities.lock().get(key).cloned();
            if let Some(entity) = &entity {
                self.registry.install(entity)?;
                let link = self.links.lock().get(key).cloned();
                if let Some(next) = link {
                    tracker.defer(
                        Value::Unresolved(next),
                        Binding::Property {
                            entity: entity.clone(),
                            name: "next".into(),
                        },
                    );
                }
            }
            Ok(entity)
        }
    }

    #[tokio::test]
    async fn plain_values_bind_immediately() {
        let mut tracker = Tracker::new();
        let slot = new_slot();
        tracker.defer(Value::from(4), Binding::Slot(slot.clone()));
        assert_eq!(*slot.lock(), Value::Number(4.0));
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn map_entry_binds_only_after_both_sides_resolve() {
        let registry = Arc::new(IdentityRegistry::new());
        let events = EventListenerRegistry::new();
        let fetcher = MapFetcher::with(registry.clone());

        let a = Entity::new(key("a"));
        let b = Entity::new(key("b"));
        fetcher.serve(a.clone());
        fetcher.serve(b.clone());

        let slot = new_slot();
        let mut tracker = Tracker::new();
        tracker.defer(
            Value::Map(vec![(Value::Unresolved(key("a")), Value::Unresolved(key("b")))]),
            Binding::Slot(slot.clone()),
        );
        assert_eq!(*slot.lock(), Value::Undefined);
        assert_eq!(tracker.pending_resolutions(), 1);

        tracker.apply_once("lc", &registry, &events, &fetcher).await.unwrap();

        match &*slot.lock() {
            Value::Map(pairs) => {
                assert!(pairs[0].0.as_entity().unwrap().ptr_eq(&a));
                assert!(pairs[0].1.as_entity().unwrap().ptr_eq(&b));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn registry_hits_skip_the_network() {
        let registry = Arc::new(IdentityRegistry::new());
        let events = EventListenerRegistry::new();
        let fetcher = MapFetcher::with(registry.clone());

        let a = Entity::new(key("a"));
        registry.install(&a).unwrap();

        let slot = new_slot();
        let mut tracker = Tracker::new();
        tracker.defer(Value::Unresolved(key("a")), Binding::Slot(slot.clone()));
        tracker.apply_once("lc", &registry, &events, &fetcher).await.unwrap();

        assert!(slot.lock().as_entity().unwrap().ptr_eq(&a));
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_entities_resolve_to_null() {
        let registry = Arc::new(IdentityRegistry::new());
        let events = EventListenerRegistry::new();
        let fetcher = MapFetcher::with(registry.clone());

        let slot = new_slot();
        let mut tracker = Tracker::new();
        tracker.defer(Value::Unresolved(key("gone")), Binding::Slot(slot.clone()));
        tracker.apply_once("lc", &registry, &events, &fetcher).await.unwrap();

        assert_eq!(*slot.lock(), Value::Null);
    }

    #[tokio::test]
    async fn resolution_drains_to_a_fixpoint() {
        let registry = Arc::new(IdentityRegistry::new());
        let events = EventListenerRegistry::new();
        let fetcher = MapFetcher::with(registry.clone());

        let a = Entity::new(key("a"));
        let b = Entity::new(key("b"));
        let c = Entity::new(key("c"));
        for e in [&a, &b, &c] {
            fetcher.serve(e.clone());
        }
        fetcher.link(a.key(), b.key());
        fetcher.link(b.key(), c.key());

        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = order.clone();
        let probe = a.clone();
        registry.add_listener(
            &a,
            ChangeListener::from_fn(move |_| {
                let next = probe.get("next").and_then(|v| v.as_entity().cloned());
                let deep = next.and_then(|n| n.get("next")).and_then(|v| v.as_entity().cloned());
                seen.lock().push(deep.map(|d| d.primary_key().to_string()));
            }),
        );

        let mut tracker = Tracker::new();
        tracker.enqueue_fetch(key("a"));
        tracker.enqueue_change(a.clone(), false);
        tracker.apply_once("lc", &registry, &events, &fetcher).await.unwrap();

        assert_eq!(*order.lock(), vec![Some("c".to_string())]);
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn events_run_before_change_listeners_and_deletions_run_last() {
        let registry = Arc::new(IdentityRegistry::new());
        let events = EventListenerRegistry::new();
        let fetcher = MapFetcher::with(registry.clone());

        let a = Entity::new(key("a"));
        registry.install(&a).unwrap();

        let log = Arc::new(Mutex::new(Vec::<String>::new()));

        let event_class = a.namespace().class(50);
        let source = EventSource::Entity(a.key().clone());
        let stream = EventInstanceKey::new(event_class, source.clone());
        let l = log.clone();
        events.add(
            stream,
            EventListener::new(move |event| {
                let l = l.clone();
                async move {
                    tokio::task::yield_now().await;
                    let why = event.get("why").and_then(Value::as_str).unwrap_or("").to_string();
                    l.lock().push(format!("event:{why}"));
                }
            }),
        );

        let l = log.clone();
        let r = registry.clone();
        let k = a.key().clone();
        registry.add_listener(
            &a,
            ChangeListener::from_fn(move |update| {
                l.lock().push(format!("change:{}:{}", update.deleted, r.is_live(&k)));
            }),
        );

        let mut tracker = Tracker::new();
        tracker.enqueue_deletion(a.key().clone());
        tracker.enqueue_change(a.clone(), true);
        let mut pending = PendingEvent::new(event_class, source);
        pending.push_property("why", Value::from("closing"), &mut tracker);
        tracker.enqueue_event(pending);

        tracker.apply_once("lc", &registry, &events, &fetcher).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["event:closing".to_string(), "change:true:true".to_string()]
        );
        assert!(!registry.is_live(a.key()));
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn event_payload_references_are_resolved_before_delivery() {
        let registry = Arc::new(IdentityRegistry::new());
        let events = EventListenerRegistry::new();
        let fetcher = MapFetcher::with(registry.clone());

        let target = Entity::new(key("t"));
        fetcher.serve(target.clone());

        let service = stackless_core::ServiceKey::new(target.namespace().class(2), "svc").unwrap();
        let source = EventSource::Service(service);
        let event_class = target.namespace().class(60);

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let expected = target.clone();
        events.add(
            EventInstanceKey::new(event_class, source.clone()),
            EventListener::from_fn(move |event| {
                let got = event.get("who").and_then(Value::as_entity).cloned().unwrap();
                assert!(got.ptr_eq(&expected));
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut tracker = Tracker::new();
        let mut pending = PendingEvent::new(event_class, source);
        pending.push_property("who", Value::Unresolved(key("t")), &mut tracker);
        tracker.enqueue_event(pending);
        tracker.apply_once("lc", &registry, &events, &fetcher).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
