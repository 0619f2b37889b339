//! Delta merge engine.
//!
//! Applies server state to local entities. Side effects that must wait for
//! the whole batch (notifications, evictions, re-fetches) go to the caller's
//! [`Tracker`].

use stackless_core::{Entity, EntityKey, IdentityRegistry, NamespaceKey, Value};
use stackless_protocol::{decode_properties, EntityDelta, EntitySnapshot, WireProperty};
use tracing::{debug, info};

use crate::error::{ClientError, ClientResult};
use crate::tracker::{Binding, Tracker};

/// Merges deltas and snapshots of one namespace into the identity registry.
pub struct Merger<'a> {
    registry: &'a IdentityRegistry,
    namespace: NamespaceKey,
    log_context: &'a str,
    verbose: bool,
}

impl<'a> Merger<'a> {
    /// Creates a merger for `namespace`.
    pub fn new(
        registry: &'a IdentityRegistry,
        namespace: NamespaceKey,
        log_context: &'a str,
        verbose: bool,
    ) -> Self {
        Self {
            registry,
            namespace,
            log_context,
            verbose,
        }
    }

    fn key_of(&self, class_id: u32, primary_key: &str) -> ClientResult<EntityKey> {
        Ok(EntityKey::new(self.namespace.class(class_id), primary_key)?)
    }

    /// Applies one incremental change.
    ///
    /// Accepts the next version or a first version; deletes on a deleted
    /// flag; otherwise evicts the local copy and queues a re-fetch.
    ///
    /// # Errors
    ///
    /// Fails on version 0 or undecodable properties.
    pub fn merge_delta(&self, delta: &EntityDelta, tracker: &mut Tracker) -> ClientResult<()> {
        if delta.version == 0 {
            return Err(ClientError::protocol(format!(
                "delta for {} has version 0",
                delta.primary_key
            )));
        }
        let key = self.key_of(delta.class_id, &delta.primary_key)?;
        let local = self.registry.get_or_null(&key);

        if delta.deleted {
            if let Some(entity) = local {
                tracker.enqueue_change(entity, true);
            }
            tracker.enqueue_deletion(key);
            return Ok(());
        }

        let local_version = local.as_ref().and_then(Entity::version);
        let accepted = match local_version {
            None => delta.version == 1,
            Some(version) => version.checked_add(1) == Some(delta.version),
        };

        if !accepted {
            if self.verbose {
                info!(
                    log_context = %self.log_context,
                    entity = %key,
                    local_version = ?local_version,
                    incoming_version = delta.version,
                    "rejecting out-of-sequence delta, refetching"
                );
            }
            self.registry.remove(&key);
            tracker.enqueue_fetch(key);
            return Ok(());
        }

        let entity = match local {
            Some(entity) => entity,
            None => {
                let entity = Entity::new(key);
                self.registry.install(&entity)?;
                entity
            }
        };

        let ready = self.split_properties(&entity, &delta.properties, tracker)?;
        entity.apply_changes(ready, delta.deleted_properties.iter().cloned());
        self.registry.set_version(&entity, delta.version)?;
        debug!(
            log_context = %self.log_context,
            entity = %entity,
            version = delta.version,
            "merged delta"
        );
        tracker.enqueue_change(entity, false);
        Ok(())
    }

    /// Replaces an entity with a full snapshot.
    ///
    /// Returns `None` when the snapshot is deleted.
    ///
    /// # Errors
    ///
    /// Fails on version 0 or undecodable properties.
    pub fn replace_entity(
        &self,
        snapshot: &EntitySnapshot,
        tracker: &mut Tracker,
    ) -> ClientResult<Option<Entity>> {
        if snapshot.version == 0 {
            return Err(ClientError::protocol(format!(
                "snapshot of {} has version 0",
                snapshot.primary_key
            )));
        }
        let key = self.key_of(snapshot.class_id, &snapshot.primary_key)?;

        match self.registry.get_or_null(&key) {
            Some(entity) if snapshot.deleted => {
                tracker.enqueue_change(entity, true);
                tracker.enqueue_deletion(key);
                Ok(None)
            }
            Some(entity) => {
                let ready = self.split_properties(&entity, &snapshot.properties, tracker)?;
                entity.replace_properties(ready);
                self.registry.set_version(&entity, snapshot.version)?;
                tracker.enqueue_change(entity.clone(), false);
                Ok(Some(entity))
            }
            None if snapshot.deleted => Ok(None),
            None => {
                let entity = Entity::new(key);
                self.registry.install(&entity)?;
                let ready = self.split_properties(&entity, &snapshot.properties, tracker)?;
                entity.replace_properties(ready);
                self.registry.set_version(&entity, snapshot.version)?;
                tracker.retain(entity.clone());
                Ok(Some(entity))
            }
        }
    }

    /// Decodes properties, deferring those that reference unresolved
    /// entities onto the entity and returning the rest.
    fn split_properties(
        &self,
        entity: &Entity,
        properties: &[WireProperty],
        tracker: &mut Tracker,
    ) -> ClientResult<Vec<(String, Value)>> {
        let decoded = decode_properties(properties, self.namespace)?;
        let mut ready = Vec::with_capacity(decoded.len());
        for (name, value) in decoded {
            if value.has_unresolved() {
                tracker.defer(
                    value,
                    Binding::Property {
                        entity: entity.clone(),
                        name,
                    },
                );
            } else {
                ready.push((name, value));
            }
        }
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::EntityFetcher;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use stackless_core::{ChangeListener, EventListenerRegistry};
    use stackless_protocol::{WireRef, WireValue};
    use std::sync::Arc;

    fn ns() -> NamespaceKey {
        NamespaceKey::new(3, 1).unwrap()
    }

    fn key(pk: &str) -> EntityKey {
        EntityKey::new(ns().class(10), pk).unwrap()
    }

    fn delta(pk: &str, version: u64) -> EntityDelta {
        EntityDelta {
            class_id: 10,
            primary_key: pk.into(),
            version,
            properties: vec![WireProperty::new("title", WireValue::String(format!("v{version}")))],
            deleted_properties: Vec::new(),
            deleted: false,
        }
    }

    /// Records fetches and answers every one with "deleted".
    #[derive(Default)]
    struct RecordingFetcher {
        fetched: Mutex<Vec<EntityKey>>,
    }

    #[async_trait]
    impl EntityFetcher for RecordingFetcher {
        async fn fetch_entity(
            &self,
            _log_context: &str,
            key: &EntityKey,
            _tracker: &mut Tracker,
        ) -> ClientResult<Option<Entity>> {
            self.fetched.lock().push(key.clone());
            Ok(None)
        }
    }

    fn watch(registry: &IdentityRegistry, entity: &Entity) -> Arc<Mutex<Vec<bool>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry.add_listener(
            entity,
            ChangeListener::from_fn(move |update| sink.lock().push(update.deleted)),
        );
        seen
    }

    #[tokio::test]
    async fn next_version_updates_in_place_and_notifies_once() {
        let registry = IdentityRegistry::new();
        let events = EventListenerRegistry::new();
        let fetcher = RecordingFetcher::default();

        let entity = Entity::new(key("a"));
        registry.install(&entity).unwrap();
        registry.set_version(&entity, 4).unwrap();
        let seen = watch(&registry, &entity);

        let merger = Merger::new(&registry, ns(), "lc", true);
        let mut tracker = Tracker::new();
        merger.merge_delta(&delta("a", 5), &mut tracker).unwrap();
        tracker.apply_once("lc", &registry, &events, &fetcher).await.unwrap();

        assert_eq!(entity.version(), Some(5));
        assert_eq!(entity.get("title"), Some(Value::from("v5")));
        assert_eq!(*seen.lock(), vec![false]);
        assert!(fetcher.fetched.lock().is_empty());
    }

    #[tokio::test]
    async fn gaps_and_regressions_evict_and_refetch() {
        for incoming in [6, 4, 3] {
            let registry = IdentityRegistry::new();
            let events = EventListenerRegistry::new();
            let fetcher = RecordingFetcher::default();

            let entity = Entity::new(key("a"));
            registry.install(&entity).unwrap();
            registry.set_version(&entity, 4).unwrap();
            let seen = watch(&registry, &entity);

            let merger = Merger::new(&registry, ns(), "lc", false);
            let mut tracker = Tracker::new();
            merger.merge_delta(&delta("a", incoming), &mut tracker).unwrap();

            assert!(!registry.is_live(entity.key()));
            assert_eq!(entity.version(), None);
            assert_eq!(tracker.pending_resolutions(), 1);

            tracker.apply_once("lc", &registry, &events, &fetcher).await.unwrap();
            assert_eq!(*fetcher.fetched.lock(), vec![key("a")]);
            assert!(seen.lock().is_empty());
            assert_eq!(entity.get("title"), None);
        }
    }

    #[tokio::test]
    async fn dropped_instances_do_not_accumulate() {
        let registry = IdentityRegistry::new();
        let events = EventListenerRegistry::new();
        let fetcher = RecordingFetcher::default();

        for round in 0..3 {
            let merger = Merger::new(&registry, ns(), "lc", false);
            let mut tracker = Tracker::new();
            for i in 0..1000 {
                merger
                    .merge_delta(&delta(&format!("r{round}-{i}"), 1), &mut tracker)
                    .unwrap();
            }
            tracker.apply_once("lc", &registry, &events, &fetcher).await.unwrap();
        }

        assert!(registry.len() <= 1000, "len = {}", registry.len());
        registry.purge();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn first_version_creates_an_instance() {
        let registry = IdentityRegistry::new();
        let merger = Merger::new(&registry, ns(), "lc", false);
        let mut tracker = Tracker::new();

        let mut d = delta("fresh", 1);
        d.properties.push(WireProperty::new("count", WireValue::Number(2.0)));
        merger.merge_delta(&d, &mut tracker).unwrap();

        let entity = registry.get_or_null(&key("fresh")).unwrap();
        assert_eq!(entity.version(), Some(1));
        assert_eq!(entity.property_names(), vec!["count".to_string(), "title".to_string()]);
    }

    #[tokio::test]
    async fn first_version_reuses_a_pending_local_instance() {
        let registry = IdentityRegistry::new();
        let pending = Entity::new(key("mine"));
        registry.install(&pending).unwrap();
        pending.set("draft", true);

        let merger = Merger::new(&registry, ns(), "lc", false);
        let mut tracker = Tracker::new();
        merger.merge_delta(&delta("mine", 1), &mut tracker).unwrap();

        assert_eq!(pending.version(), Some(1));
        assert_eq!(pending.get("draft"), Some(Value::Bool(true)));
        assert!(registry.get_or_null(&key("mine")).unwrap().ptr_eq(&pending));
    }

    #[tokio::test]
    async fn unknown_entity_at_later_version_is_fetched() {
        let registry = IdentityRegistry::new();
        let merger = Merger::new(&registry, ns(), "lc", false);
        let mut tracker = Tracker::new();
        merger.merge_delta(&delta("far", 3), &mut tracker).unwrap();

        assert!(registry.get_or_null(&key("far")).is_none());
        assert_eq!(tracker.pending_resolutions(), 1);
    }

    #[tokio::test]
    async fn deletion_notifies_then_evicts() {
        let registry = IdentityRegistry::new();
        let events = EventListenerRegistry::new();
        let fetcher = RecordingFetcher::default();

        let entity = Entity::new(key("a"));
        registry.install(&entity).unwrap();
        let seen = watch(&registry, &entity);

        let mut d = delta("a", 9);
        d.deleted = true;
        let merger = Merger::new(&registry, ns(), "lc", false);
        let mut tracker = Tracker::new();
        merger.merge_delta(&d, &mut tracker).unwrap();
        assert!(registry.is_live(entity.key()));

        tracker.apply_once("lc", &registry, &events, &fetcher).await.unwrap();
        assert_eq!(*seen.lock(), vec![true]);
        assert!(!registry.is_live(entity.key()));
    }

    #[tokio::test]
    async fn deleted_properties_are_removed() {
        let registry = IdentityRegistry::new();
        let entity = Entity::new(key("a"));
        registry.install(&entity).unwrap();
        registry.set_version(&entity, 1).unwrap();
        entity.set("old", 1);

        let mut d = delta("a", 2);
        d.deleted_properties.push("old".into());
        Merger::new(&registry, ns(), "lc", false)
            .merge_delta(&d, &mut Tracker::new())
            .unwrap();

        assert!(!entity.contains("old"));
        assert!(entity.contains("title"));
    }

    #[test]
    fn version_zero_is_rejected() {
        let registry = IdentityRegistry::new();
        let merger = Merger::new(&registry, ns(), "lc", false);
        let err = merger.merge_delta(&delta("a", 0), &mut Tracker::new()).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));

        let snapshot = EntitySnapshot {
            class_id: 10,
            primary_key: "a".into(),
            version: 0,
            properties: Vec::new(),
            deleted: false,
        };
        assert!(merger.replace_entity(&snapshot, &mut Tracker::new()).is_err());
    }

    #[tokio::test]
    async fn reference_properties_wait_for_resolution() {
        let registry = IdentityRegistry::new();
        let events = EventListenerRegistry::new();
        let fetcher = RecordingFetcher::default();

        let target = Entity::new(key("t"));
        registry.install(&target).unwrap();

        let mut d = delta("a", 1);
        d.properties.push(WireProperty::new("link", WireValue::EntityRef(WireRef::new(10, "t"))));
        let merger = Merger::new(&registry, ns(), "lc", false);
        let mut tracker = Tracker::new();
        merger.merge_delta(&d, &mut tracker).unwrap();

        let entity = registry.get_or_null(&key("a")).unwrap();
        assert!(!entity.contains("link"));

        tracker.apply_once("lc", &registry, &events, &fetcher).await.unwrap();
        assert!(entity.get("link").unwrap().as_entity().unwrap().ptr_eq(&target));
    }

    #[tokio::test]
    async fn replace_clears_tombstones_and_old_properties() {
        let registry = IdentityRegistry::new();
        let entity = Entity::new(key("a"));
        registry.install(&entity).unwrap();
        entity.set("stale", 1);
        entity.set("gone", 2);
        entity.remove("gone");
        let seen = watch(&registry, &entity);

        let snapshot = EntitySnapshot {
            class_id: 10,
            primary_key: "a".into(),
            version: 7,
            properties: vec![WireProperty::new("fresh", WireValue::Bool(true))],
            deleted: false,
        };
        let mut tracker = Tracker::new();
        let merger = Merger::new(&registry, ns(), "lc", false);
        let replaced = merger.replace_entity(&snapshot, &mut tracker).unwrap().unwrap();

        assert!(replaced.ptr_eq(&entity));
        assert_eq!(entity.property_names(), vec!["fresh".to_string()]);
        assert!(entity.tombstones().is_empty());
        assert_eq!(entity.version(), Some(7));

        tracker
            .apply_once("lc", &registry, &EventListenerRegistry::new(), &RecordingFetcher::default())
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec![false]);
    }

    #[test]
    fn deleted_snapshot_of_unknown_entity_is_none() {
        let registry = IdentityRegistry::new();
        let snapshot = EntitySnapshot {
            class_id: 10,
            primary_key: "ghost".into(),
            version: 2,
            properties: Vec::new(),
            deleted: true,
        };
        let mut tracker = Tracker::new();
        let merger = Merger::new(&registry, ns(), "lc", false);
        assert!(merger.replace_entity(&snapshot, &mut tracker).unwrap().is_none());
        assert!(tracker.is_empty());
    }
}
