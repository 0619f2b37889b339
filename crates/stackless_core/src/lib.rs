//! # Stackless Core
//!
//! Local object model for the Stackless client.
//!
//! This crate provides:
//! - Identity keys for namespaces, classes, entities, services and event streams
//! - The native [`Value`] union used in entity properties and method arguments
//! - [`Entity`] handles with a property bag, tombstones, version and listeners
//! - The weak [`IdentityRegistry`] (one live instance per entity key)
//! - The namespace/class [`Catalog`] and the [`EventListenerRegistry`]
//!
//! Nothing here touches the network.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod entity;
mod error;
pub mod keys;
pub mod listener;
pub mod registry;
pub mod value;

pub use catalog::{Catalog, ClassKind, NamespaceInfo};
pub use entity::Entity;
pub use error::{CoreError, CoreResult};
pub use keys::{
    check_entity_batch, new_primary_key, ClassKey, EntityKey, EventInstanceKey, EventSource,
    MethodId, NamespaceKey, ServiceKey,
};
pub use listener::{
    ChangeListener, EntityUpdated, Event, EventListener, EventListenerRegistry, ListenerId,
};
pub use registry::IdentityRegistry;
pub use value::{Service, Value};
