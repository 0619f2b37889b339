//! Identity keys.
//!
//! Every class, entity, service and event stream is scoped to exactly one
//! namespace key. Keys are plain values: cheap to clone, hashable, ordered.

use std::collections::HashSet;
use std::fmt;

use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Identifier of a server method on a service class.
pub type MethodId = u32;

/// A versioned namespace: `(id, version)`, both non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespaceKey {
    id: u64,
    version: u64,
}

impl NamespaceKey {
    /// Creates a namespace key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidNamespaceKey`] if either part is zero.
    pub fn new(id: u64, version: u64) -> CoreResult<Self> {
        if id == 0 || version == 0 {
            return Err(CoreError::InvalidNamespaceKey { id, version });
        }
        Ok(Self { id, version })
    }

    /// Returns the namespace id.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.id
    }

    /// Returns the namespace version.
    #[must_use]
    pub const fn version(self) -> u64 {
        self.version
    }

    /// Returns the class key for `class_id` in this namespace.
    #[must_use]
    pub const fn class(self, class_id: u32) -> ClassKey {
        ClassKey::new(self, class_id)
    }
}

impl fmt::Display for NamespaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns:{}.{}", self.id, self.version)
    }
}

/// A registered entity, service or event class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassKey {
    /// Owning namespace.
    pub namespace: NamespaceKey,
    /// Class id within the namespace.
    pub class_id: u32,
}

impl ClassKey {
    /// Creates a class key.
    #[must_use]
    pub const fn new(namespace: NamespaceKey, class_id: u32) -> Self {
        Self {
            namespace,
            class_id,
        }
    }
}

impl fmt::Display for ClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/class:{}", self.namespace, self.class_id)
    }
}

/// Identity of a persisted entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    /// Entity class.
    pub class: ClassKey,
    /// Primary key, unique within the class.
    pub primary_key: String,
}

impl EntityKey {
    /// Creates an entity key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyPrimaryKey`] for an empty primary key.
    pub fn new(class: ClassKey, primary_key: impl Into<String>) -> CoreResult<Self> {
        let primary_key = primary_key.into();
        if primary_key.is_empty() {
            return Err(CoreError::EmptyPrimaryKey);
        }
        Ok(Self { class, primary_key })
    }

    /// Returns the namespace this entity lives in.
    #[must_use]
    pub fn namespace(&self) -> NamespaceKey {
        self.class.namespace
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class, self.primary_key)
    }
}

/// Address of a stateless remote service object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceKey {
    /// Service class.
    pub class: ClassKey,
    /// Primary key of the addressed instance.
    pub primary_key: String,
}

impl ServiceKey {
    /// Creates a service key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyPrimaryKey`] for an empty primary key.
    pub fn new(class: ClassKey, primary_key: impl Into<String>) -> CoreResult<Self> {
        let primary_key = primary_key.into();
        if primary_key.is_empty() {
            return Err(CoreError::EmptyPrimaryKey);
        }
        Ok(Self { class, primary_key })
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class, self.primary_key)
    }
}

/// The object an event stream is attached to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventSource {
    /// Events raised by an entity.
    Entity(EntityKey),
    /// Events raised by a service.
    Service(ServiceKey),
}

impl EventSource {
    /// Returns the class of the source object.
    #[must_use]
    pub fn class(&self) -> ClassKey {
        match self {
            Self::Entity(key) => key.class,
            Self::Service(key) => key.class,
        }
    }

    /// Returns the primary key of the source object.
    #[must_use]
    pub fn primary_key(&self) -> &str {
        match self {
            Self::Entity(key) => &key.primary_key,
            Self::Service(key) => &key.primary_key,
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(key) => write!(f, "entity {key}"),
            Self::Service(key) => write!(f, "service {key}"),
        }
    }
}

/// One subscribable event stream: an event class raised by one source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventInstanceKey {
    /// Event class.
    pub event_class: ClassKey,
    /// Raising object.
    pub source: EventSource,
}

impl EventInstanceKey {
    /// Creates an event instance key.
    #[must_use]
    pub fn new(event_class: ClassKey, source: EventSource) -> Self {
        Self {
            event_class,
            source,
        }
    }
}

impl fmt::Display for EventInstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event {} from {}", self.event_class, self.source)
    }
}

/// Checks a batch of entity keys for a single-namespace, duplicate-free request.
///
/// Returns the shared namespace.
///
/// # Errors
///
/// Fails on an empty batch, a repeated key, or keys from different namespaces.
pub fn check_entity_batch<'a>(keys: impl IntoIterator<Item = &'a EntityKey>) -> CoreResult<NamespaceKey> {
    let mut seen = HashSet::new();
    let mut namespace = None;
    for key in keys {
        match namespace {
            None => namespace = Some(key.namespace()),
            Some(expected) if expected != key.namespace() => {
                return Err(CoreError::MixedNamespaces {
                    expected,
                    found: key.namespace(),
                });
            }
            Some(_) => {}
        }
        if !seen.insert(key) {
            return Err(CoreError::DuplicateEntity { key: key.clone() });
        }
    }
    namespace.ok_or(CoreError::EmptyEntityList)
}

/// Generates a random primary key (UUID v4, hyphenated).
#[must_use]
pub fn new_primary_key() -> String {
    Uuid::new_v4().to_string()
}
