//! # Stackless Client
//!
//! Client runtime for the Stackless object replication platform.
//!
//! This crate provides:
//! - [`Client`]: fetch and save entities, call service methods, subscribe
//!   to events and entity updates
//! - [`Tracker`]: the per-operation batch of deferred side effects
//! - [`Merger`]: version-checked merging of server deltas and snapshots
//! - [`Connection`]: correlation-id multiplexing over one byte stream
//! - [`ProtocolClient`]: typed requests and response classification
//!
//! ## Ordering
//!
//! Each operation applies its tracker once, after its network round-trip:
//! references resolve first (fetching what is missing), then events are
//! delivered, then entity change listeners run, then deletions are evicted.
//! A pushed event gets a tracker of its own.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use stackless_client::{Client, ClientConfig, LoopbackConnector};
//!
//! let client = Client::new(Arc::new(LoopbackConnector::new()), ClientConfig::default());
//! let shop = client.register_namespace("shop", "user-key", 7, 1).unwrap();
//! let order_class = shop.class(1);
//! client.register_entity_class("Order", order_class).unwrap();
//!
//! let order = client.create_entity(order_class, "order-1").unwrap();
//! order.set("total", 42);
//! assert_eq!(order.version(), None);
//! assert!(client.registry().is_live(order.key()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod connection;
mod dispatch;
mod error;
mod log_context;
mod merge;
mod pool;
mod protocol;
mod tracker;

pub use client::Client;
pub use config::ClientConfig;
pub use connection::{
    BoxedStream, ByteStream, Connection, Connector, LoopbackConnector, PushHandler, TcpConnector,
};
pub use error::{ClientError, ClientResult};
pub use log_context::{new_log_context, LOG_CONTEXT_LEN};
pub use merge::Merger;
pub use pool::{ConnectionPool, PushHandlerFactory};
pub use protocol::{accepts_messages, validate_namespace_target, ProtocolClient, Reply};
pub use tracker::{new_slot, Binding, EntityFetcher, PendingEvent, Slot, Tracker};

pub use stackless_core::{
    ChangeListener, ClassKey, ClassKind, Entity, EntityKey, EntityUpdated, Event, EventListener,
    EventSource, ListenerId, NamespaceKey, Service, ServiceKey, Value,
};
pub use stackless_protocol::ErrorCode;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
