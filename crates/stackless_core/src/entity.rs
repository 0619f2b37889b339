//! Entity handles.
//!
//! An [`Entity`] is a shared handle to the local mirror of one server-side
//! object. Clones share state; identity is pointer identity. The version and
//! change listeners live inside the shared cell, so they disappear together
//! with the last application-visible handle.
//!
//! Entities that reference each other through properties form `Arc` cycles
//! and stay alive until one side drops the reference.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::keys::{ClassKey, EntityKey, NamespaceKey};
use crate::listener::{ChangeListener, ListenerId};
use crate::value::Value;

/// Shared handle to a local entity instance.
#[derive(Clone)]
pub struct Entity(Arc<EntityCell>);

pub(crate) struct EntityCell {
    key: EntityKey,
    state: RwLock<EntityState>,
}

#[derive(Default)]
struct EntityState {
    properties: BTreeMap<String, Value>,
    /// Properties removed locally since the last server state.
    removed: BTreeSet<String>,
    /// `None` until the server has acknowledged a version.
    version: Option<u64>,
    listeners: Vec<(ListenerId, ChangeListener)>,
}

impl Entity {
    /// Creates a local instance that the server has not seen yet.
    #[must_use]
    pub fn new(key: EntityKey) -> Self {
        Self(Arc::new(EntityCell {
            key,
            state: RwLock::new(EntityState::default()),
        }))
    }

    /// Returns the identity key.
    #[must_use]
    pub fn key(&self) -> &EntityKey {
        &self.0.key
    }

    /// Returns the entity class.
    #[must_use]
    pub fn class(&self) -> ClassKey {
        self.0.key.class
    }

    /// Returns the owning namespace.
    #[must_use]
    pub fn namespace(&self) -> NamespaceKey {
        self.0.key.namespace()
    }

    /// Returns the primary key.
    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.0.key.primary_key
    }

    /// Last version acknowledged by the server, if any.
    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.0.state.read().version
    }

    /// Whether two handles point at the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Reads one property.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.state.read().properties.get(name).cloned()
    }

    /// Sets one property locally.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let mut state = self.0.state.write();
        state.removed.remove(&name);
        state.properties.insert(name, value.into());
    }

    /// Removes one property locally, recording a tombstone that is sent
    /// with the next save.
    pub fn remove(&self, name: &str) -> Option<Value> {
        let mut state = self.0.state.write();
        let previous = state.properties.remove(name);
        if previous.is_some() {
            state.removed.insert(name.to_string());
        }
        previous
    }

    /// Whether the property is set.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.state.read().properties.contains_key(name)
    }

    /// Property names in order.
    #[must_use]
    pub fn property_names(&self) -> Vec<String> {
        self.0.state.read().properties.keys().cloned().collect()
    }

    /// Snapshot of all properties.
    #[must_use]
    pub fn properties(&self) -> BTreeMap<String, Value> {
        self.0.state.read().properties.clone()
    }

    /// Names removed locally and not yet overwritten by server state.
    #[must_use]
    pub fn tombstones(&self) -> Vec<String> {
        self.0.state.read().removed.iter().cloned().collect()
    }

    /// Applies server-originated changes in place.
    ///
    /// Every touched property loses its local tombstone.
    pub fn apply_changes(
        &self,
        changed: impl IntoIterator<Item = (String, Value)>,
        deleted: impl IntoIterator<Item = String>,
    ) {
        let mut state = self.0.state.write();
        for (name, value) in changed {
            state.removed.remove(&name);
            state.properties.insert(name, value);
        }
        for name in deleted {
            state.removed.remove(&name);
            state.properties.remove(&name);
        }
    }

    /// Replaces all properties with server state, dropping every tombstone.
    pub fn replace_properties(&self, properties: impl IntoIterator<Item = (String, Value)>) {
        let mut state = self.0.state.write();
        state.removed.clear();
        state.properties = properties.into_iter().collect();
    }

    /// Snapshot of the change listeners in registration order.
    #[must_use]
    pub fn change_listeners(&self) -> Vec<ChangeListener> {
        self.0
            .state
            .read()
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    pub(crate) fn set_version(&self, version: Option<u64>) {
        self.0.state.write().version = version;
    }

    pub(crate) fn push_listener(&self, id: ListenerId, listener: ChangeListener) {
        self.0.state.write().listeners.push((id, listener));
    }

    pub(crate) fn drop_listener(&self, id: ListenerId) -> bool {
        let mut state = self.0.state.write();
        let before = state.listeners.len();
        state.listeners.retain(|(existing, _)| *existing != id);
        state.listeners.len() != before
    }

    pub(crate) fn drop_all_listeners(&self) {
        self.0.state.write().listeners.clear();
    }

    pub(crate) fn downgrade(&self) -> Weak<EntityCell> {
        Arc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &Weak<EntityCell>) -> Option<Self> {
        weak.upgrade().map(Self)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Entity").field(&self.0.key).finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.key, f)
    }
}
