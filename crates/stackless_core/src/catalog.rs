//! Namespace and class catalog.
//!
//! Registrations are made once at startup, before any network traffic.
//! Names exist only for diagnostics; the wire carries numeric ids.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::keys::{ClassKey, NamespaceKey};

/// Kind of a registered class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    /// Persisted, versioned entity class.
    Entity,
    /// Stateless service class.
    Service,
    /// Event class.
    Event,
}

impl fmt::Display for ClassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Entity => "entity",
            Self::Service => "service",
            Self::Event => "event",
        })
    }
}

/// A registered namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
    /// Human-readable name.
    pub name: String,
    /// Namespace key.
    pub key: NamespaceKey,
    /// Authorization key presented when connecting.
    pub user_key: String,
}

#[derive(Default)]
struct CatalogInner {
    namespaces: HashMap<u64, NamespaceInfo>,
    classes: HashMap<(ClassKind, ClassKey), String>,
}

/// Registered namespaces and classes.
#[derive(Default)]
pub struct Catalog {
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a namespace.
    ///
    /// # Errors
    ///
    /// Fails if either number is zero, if the exact key is already
    /// registered, or if another version of the id is registered.
    pub fn register_namespace(
        &self,
        name: impl Into<String>,
        user_key: impl Into<String>,
        id: u64,
        version: u64,
    ) -> CoreResult<NamespaceKey> {
        let key = NamespaceKey::new(id, version)?;
        let mut inner = self.inner.write();
        if let Some(existing) = inner.namespaces.get(&id) {
            if existing.key == key {
                return Err(CoreError::NamespaceAlreadyRegistered { key });
            }
            return Err(CoreError::NamespaceVersionConflict {
                id,
                registered: existing.key.version(),
                requested: version,
            });
        }
        inner.namespaces.insert(
            id,
            NamespaceInfo {
                name: name.into(),
                key,
                user_key: user_key.into(),
            },
        );
        Ok(key)
    }

    /// Looks up the registered namespace for an id, whatever its version.
    #[must_use]
    pub fn namespace_by_id(&self, id: u64) -> Option<NamespaceInfo> {
        self.inner.read().namespaces.get(&id).cloned()
    }

    /// Looks up an exact namespace key.
    #[must_use]
    pub fn namespace(&self, key: NamespaceKey) -> Option<NamespaceInfo> {
        self.namespace_by_id(key.id()).filter(|info| info.key == key)
    }

    /// Returns the exact namespace registration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownNamespace`] if it was never registered.
    pub fn require_namespace(&self, key: NamespaceKey) -> CoreResult<NamespaceInfo> {
        self.namespace(key)
            .ok_or(CoreError::UnknownNamespace { key })
    }

    /// Name of a registered namespace, or its key when unknown.
    #[must_use]
    pub fn name_of(&self, key: NamespaceKey) -> String {
        self.namespace(key)
            .map_or_else(|| key.to_string(), |info| info.name)
    }

    /// Registers a class.
    ///
    /// # Errors
    ///
    /// Fails if the namespace is unknown or the class is already registered
    /// for this kind.
    pub fn register_class(
        &self,
        kind: ClassKind,
        name: impl Into<String>,
        class: ClassKey,
    ) -> CoreResult<()> {
        self.require_namespace(class.namespace)?;
        let mut inner = self.inner.write();
        if inner.classes.contains_key(&(kind, class)) {
            return Err(CoreError::ClassAlreadyRegistered { kind, class });
        }
        inner.classes.insert((kind, class), name.into());
        Ok(())
    }

    /// Whether the class is registered for `kind`.
    #[must_use]
    pub fn is_registered(&self, kind: ClassKind, class: ClassKey) -> bool {
        self.inner.read().classes.contains_key(&(kind, class))
    }

    /// Fails unless the class is registered for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownClass`].
    pub fn require_class(&self, kind: ClassKind, class: ClassKey) -> CoreResult<()> {
        if self.is_registered(kind, class) {
            Ok(())
        } else {
            Err(CoreError::UnknownClass { kind, class })
        }
    }

    /// Name of a registered class.
    #[must_use]
    pub fn class_name(&self, kind: ClassKind, class: ClassKey) -> Option<String> {
        self.inner.read().classes.get(&(kind, class)).cloned()
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Catalog")
            .field("namespaces", &inner.namespaces.len())
            .field("classes", &inner.classes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup_namespace() {
        let catalog = Catalog::new();
        let key = catalog.register_namespace("shop", "uk", 10, 2).unwrap();

        assert_eq!(catalog.namespace_by_id(10).unwrap().name, "shop");
        assert_eq!(catalog.namespace(key).unwrap().user_key, "uk");
        assert_eq!(catalog.name_of(key), "shop");
        assert!(catalog.namespace(NamespaceKey::new(10, 3).unwrap()).is_none());
        assert_eq!(catalog.name_of(NamespaceKey::new(11, 1).unwrap()), "ns:11.1");
    }

    #[test]
    fn duplicate_namespace_rejected() {
        let catalog = Catalog::new();
        catalog.register_namespace("shop", "uk", 10, 2).unwrap();
        assert!(matches!(
            catalog.register_namespace("shop", "uk", 10, 2),
            Err(CoreError::NamespaceAlreadyRegistered { .. })
        ));
        assert!(matches!(
            catalog.register_namespace("shop", "uk", 10, 3),
            Err(CoreError::NamespaceVersionConflict {
                id: 10,
                registered: 2,
                requested: 3
            })
        ));
        assert!(catalog.register_namespace("zero", "uk", 0, 1).is_err());
    }

    #[test]
    fn class_registration() {
        let catalog = Catalog::new();
        let ns = catalog.register_namespace("shop", "uk", 1, 1).unwrap();
        let class = ns.class(5);

        catalog.register_class(ClassKind::Entity, "Order", class).unwrap();
        // the same id may be used by another kind
        catalog.register_class(ClassKind::Event, "OrderPlaced", class).unwrap();

        assert!(matches!(
            catalog.register_class(ClassKind::Entity, "Order", class),
            Err(CoreError::ClassAlreadyRegistered { .. })
        ));
        assert_eq!(catalog.class_name(ClassKind::Entity, class).as_deref(), Some("Order"));
        assert!(catalog.require_class(ClassKind::Service, class).is_err());
    }

    #[test]
    fn class_needs_registered_namespace() {
        let catalog = Catalog::new();
        let unknown = NamespaceKey::new(9, 9).unwrap();
        assert!(matches!(
            catalog.register_class(ClassKind::Service, "Svc", unknown.class(1)),
            Err(CoreError::UnknownNamespace { .. })
        ));
    }
}
