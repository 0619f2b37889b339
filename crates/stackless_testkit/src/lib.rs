//! # Stackless Testkit
//!
//! Test utilities for the Stackless client.
//!
//! This crate provides:
//! - [`ServerPeer`]: a scripted server on the far end of an in-memory pipe
//! - Fixtures for namespaces, deltas, snapshots and push frames
//! - Property-based generators for native and wire values
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stackless_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn fetches() {
//!     let (stream, mut server) = loopback_pair();
//!     // hand `stream` to a client, then script the server:
//!     let (id, request) = server.read_request().await;
//!     server.respond(id, &ResponseEnvelope::ok(/* ... */)).await;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod peer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::peer::*;
}

pub use fixtures::*;
pub use generators::*;
pub use peer::*;
