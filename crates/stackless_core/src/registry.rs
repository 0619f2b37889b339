//! Identity registry: at most one live local instance per entity key.
//!
//! The map holds weak references only. Whether an entry is still alive is
//! an explicit query ([`IdentityRegistry::is_live`]); dead entries are
//! skipped on lookup and swept lazily by [`IdentityRegistry::install`] once
//! the map doubles past its last swept size, or eagerly by
//! [`IdentityRegistry::purge`].

use std::collections::HashMap;
use std::sync::Weak;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::entity::{Entity, EntityCell};
use crate::error::{CoreError, CoreResult};
use crate::keys::EntityKey;
use crate::listener::{ChangeListener, ListenerId};

/// Smallest map size that triggers a sweep from `install`.
const MIN_SWEEP_LEN: usize = 64;

/// Weak key to instance map shared by every operation of one client.
#[derive(Default)]
pub struct IdentityRegistry {
    entries: Mutex<Entries>,
}

#[derive(Default)]
struct Entries {
    map: HashMap<EntityKey, Weak<EntityCell>>,
    sweep_at: usize,
}

impl Entries {
    fn get(&self, key: &EntityKey) -> Option<&Weak<EntityCell>> {
        self.map.get(key)
    }

    fn sweep(&mut self) -> usize {
        let before = self.map.len();
        self.map.retain(|_, weak| weak.strong_count() > 0);
        self.sweep_at = (self.map.len() * 2).max(MIN_SWEEP_LEN);
        before - self.map.len()
    }
}

impl IdentityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live instance for `key`, if any.
    #[must_use]
    pub fn get_or_null(&self, key: &EntityKey) -> Option<Entity> {
        self.entries.lock().get(key).and_then(Entity::upgrade)
    }

    /// Whether a live instance is installed under `key`.
    #[must_use]
    pub fn is_live(&self, key: &EntityKey) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Installs `entity` under its key.
    ///
    /// A dead entry under the same key is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EntityAlreadyInstalled`] if another live instance
    /// holds the key.
    pub fn install(&self, entity: &Entity) -> CoreResult<()> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(entity.key()).and_then(Entity::upgrade) {
            if !existing.ptr_eq(entity) {
                return Err(CoreError::EntityAlreadyInstalled {
                    key: entity.key().clone(),
                });
            }
            return Ok(());
        }
        if entries.map.len() >= entries.sweep_at.max(MIN_SWEEP_LEN) {
            let dropped = entries.sweep();
            trace!(dropped, remaining = entries.map.len(), "swept dead entries");
        }
        trace!(key = %entity.key(), "installing entity");
        entries.map.insert(entity.key().clone(), entity.downgrade());
        Ok(())
    }

    /// Records the last server version of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidVersion`] for version 0.
    pub fn set_version(&self, entity: &Entity, version: u64) -> CoreResult<()> {
        if version == 0 {
            return Err(CoreError::InvalidVersion {
                key: entity.key().clone(),
            });
        }
        entity.set_version(Some(version));
        Ok(())
    }

    /// Evicts `key`, dropping its version and listeners immediately.
    ///
    /// Returns the evicted instance if it was still alive. Handles held by the
    /// application stay readable but are detached from the registry.
    pub fn remove(&self, key: &EntityKey) -> Option<Entity> {
        let removed = self.entries.lock().map.remove(key).and_then(|weak| Entity::upgrade(&weak));
        if let Some(entity) = &removed {
            debug!(key = %key, "evicting entity");
            entity.set_version(None);
            entity.drop_all_listeners();
        }
        removed
    }

    /// Registers a change listener on `entity`.
    pub fn add_listener(&self, entity: &Entity, listener: ChangeListener) -> ListenerId {
        self.add_shared_listener(std::slice::from_ref(entity), listener)
    }

    /// Registers one listener on every entity in `entities`, under a single id.
    pub fn add_shared_listener(&self, entities: &[Entity], listener: ChangeListener) -> ListenerId {
        let id = ListenerId::next();
        for entity in entities {
            entity.push_listener(id, listener.clone());
        }
        id
    }

    /// Removes one change listener. Returns whether it was registered.
    pub fn remove_listener(&self, entity: &Entity, id: ListenerId) -> bool {
        entity.drop_listener(id)
    }

    /// Removes every change listener of `entity`.
    pub fn clear_listeners(&self, entity: &Entity) {
        entity.drop_all_listeners();
    }

    /// Removes every change listener of every live entity.
    pub fn clear_all_listeners(&self) {
        for entity in self.live_entities() {
            entity.drop_all_listeners();
        }
    }

    /// Drops entries whose instance is gone. Returns how many were dropped.
    pub fn purge(&self) -> usize {
        self.entries.lock().sweep()
    }

    /// Number of entries, dead ones included until the next sweep.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    /// Whether the registry has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().map.is_empty()
    }

    fn live_entities(&self) -> Vec<Entity> {
        self.entries.lock().map.values().filter_map(Entity::upgrade).collect()
    }
}

impl std::fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::NamespaceKey;
    use crate::listener::ChangeListener;

    fn key(pk: &str) -> EntityKey {
        EntityKey::new(NamespaceKey::new(3, 1).unwrap().class(2), pk).unwrap()
    }

    #[test]
    fn install_and_lookup() {
        let registry = IdentityRegistry::new();
        let entity = Entity::new(key("a"));
        registry.install(&entity).unwrap();

        let found = registry.get_or_null(&key("a")).unwrap();
        assert!(found.ptr_eq(&entity));
        assert!(registry.get_or_null(&key("b")).is_none());
    }

    #[test]
    fn second_live_instance_is_rejected() {
        let registry = IdentityRegistry::new();
        let first = Entity::new(key("a"));
        registry.install(&first).unwrap();
        registry.install(&first).unwrap();

        let second = Entity::new(key("a"));
        assert!(matches!(
            registry.install(&second),
            Err(CoreError::EntityAlreadyInstalled { .. })
        ));
    }

    #[test]
    fn registry_does_not_keep_entities_alive() {
        let registry = IdentityRegistry::new();
        let entity = Entity::new(key("a"));
        registry.install(&entity).unwrap();
        assert!(registry.is_live(&key("a")));

        drop(entity);
        assert!(!registry.is_live(&key("a")));
        assert!(registry.get_or_null(&key("a")).is_none());

        // a dead slot can be reused
        let replacement = Entity::new(key("a"));
        registry.install(&replacement).unwrap();
        assert!(registry.is_live(&key("a")));
    }

    #[test]
    fn purge_drops_dead_entries() {
        let registry = IdentityRegistry::new();
        let kept = Entity::new(key("kept"));
        registry.install(&kept).unwrap();
        registry.install(&Entity::new(key("dropped"))).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.purge(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn install_sweeps_dead_entries() {
        let registry = IdentityRegistry::new();
        let kept = Entity::new(key("kept"));
        registry.install(&kept).unwrap();
        for round in 0..3 {
            for i in 0..1000 {
                registry.install(&Entity::new(key(&format!("r{round}-{i}")))).unwrap();
            }
        }
        assert!(registry.len() < 1000, "len = {}", registry.len());
        assert!(registry.is_live(&key("kept")));

        registry.purge();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn set_version_rejects_zero() {
        let registry = IdentityRegistry::new();
        let entity = Entity::new(key("a"));
        assert!(registry.set_version(&entity, 0).is_err());
        registry.set_version(&entity, 4).unwrap();
        assert_eq!(entity.version(), Some(4));
    }

    #[test]
    fn remove_drops_bookkeeping() {
        let registry = IdentityRegistry::new();
        let entity = Entity::new(key("a"));
        registry.install(&entity).unwrap();
        registry.set_version(&entity, 2).unwrap();
        registry.add_listener(&entity, ChangeListener::from_fn(|_| {}));

        let removed = registry.remove(&key("a")).unwrap();
        assert!(removed.ptr_eq(&entity));
        assert_eq!(entity.version(), None);
        assert!(entity.change_listeners().is_empty());
        assert!(registry.get_or_null(&key("a")).is_none());
        assert!(registry.remove(&key("a")).is_none());
    }

    #[test]
    fn listener_bookkeeping() {
        let registry = IdentityRegistry::new();
        let a = Entity::new(key("a"));
        let b = Entity::new(key("b"));
        registry.install(&a).unwrap();
        registry.install(&b).unwrap();

        let id = registry.add_listener(&a, ChangeListener::from_fn(|_| {}));
        registry.add_listener(&a, ChangeListener::from_fn(|_| {}));
        registry.add_listener(&b, ChangeListener::from_fn(|_| {}));
        assert_eq!(a.change_listeners().len(), 2);

        assert!(registry.remove_listener(&a, id));
        assert!(!registry.remove_listener(&a, id));
        assert_eq!(a.change_listeners().len(), 1);

        registry.clear_all_listeners();
        assert!(a.change_listeners().is_empty());
        assert!(b.change_listeners().is_empty());
    }

    #[test]
    fn shared_listener_spans_entities() {
        let registry = IdentityRegistry::new();
        let a = Entity::new(key("a"));
        let b = Entity::new(key("b"));

        let id = registry.add_shared_listener(&[a.clone(), b.clone()], ChangeListener::from_fn(|_| {}));
        assert_eq!(a.change_listeners().len(), 1);
        assert_eq!(b.change_listeners().len(), 1);

        assert!(registry.remove_listener(&a, id));
        assert_eq!(b.change_listeners().len(), 1);
        assert!(registry.remove_listener(&b, id));
    }
}
