//! Error types for the core crate.

use thiserror::Error;

use crate::catalog::ClassKind;
use crate::keys::{ClassKey, EntityKey, NamespaceKey};

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by local bookkeeping: keys, catalog and identity registry.
///
/// These never involve the network. They signal a programming error in the
/// caller (bad key, duplicate registration, mixed namespaces, ...).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Namespace id and version must both be non-zero.
    #[error("invalid namespace key: id {id}, version {version} (zero is reserved)")]
    InvalidNamespaceKey {
        /// Requested id.
        id: u64,
        /// Requested version.
        version: u64,
    },

    /// The exact namespace key is already registered.
    #[error("namespace {key} is already registered")]
    NamespaceAlreadyRegistered {
        /// The duplicate key.
        key: NamespaceKey,
    },

    /// Another version of the same namespace id is already registered.
    #[error("namespace id {id} is already registered at version {registered}, cannot add version {requested}")]
    NamespaceVersionConflict {
        /// Namespace id.
        id: u64,
        /// Version already registered.
        registered: u64,
        /// Version that was requested.
        requested: u64,
    },

    /// The namespace key was never registered.
    #[error("namespace {key} is not registered")]
    UnknownNamespace {
        /// The unknown key.
        key: NamespaceKey,
    },

    /// A class of this kind is already registered under the key.
    #[error("{kind} class {class} is already registered")]
    ClassAlreadyRegistered {
        /// Class kind.
        kind: ClassKind,
        /// Duplicate class key.
        class: ClassKey,
    },

    /// No class of this kind is registered under the key.
    #[error("{kind} class {class} is not registered")]
    UnknownClass {
        /// Class kind.
        kind: ClassKind,
        /// Unknown class key.
        class: ClassKey,
    },

    /// A live instance already exists for the key.
    #[error("entity {key} already has a live local instance")]
    EntityAlreadyInstalled {
        /// Entity key.
        key: EntityKey,
    },

    /// Entity versions start at 1.
    #[error("entity {key}: version 0 is reserved")]
    InvalidVersion {
        /// Entity key.
        key: EntityKey,
    },

    /// Primary keys must not be empty.
    #[error("primary key must not be empty")]
    EmptyPrimaryKey,

    /// An operation that needs at least one entity was given none.
    #[error("at least one entity is required")]
    EmptyEntityList,

    /// The same entity appears twice in one batch.
    #[error("entity {key} appears more than once")]
    DuplicateEntity {
        /// Repeated key.
        key: EntityKey,
    },

    /// A batch spans more than one namespace.
    #[error("entities from namespace {found} cannot be combined with namespace {expected}")]
    MixedNamespaces {
        /// Namespace of the first entity.
        expected: NamespaceKey,
        /// Conflicting namespace.
        found: NamespaceKey,
    },
}
