//! # Stackless Protocol
//!
//! Wire layer of the Stackless client.
//!
//! - [`WireValue`] and friends: self-describing value records
//! - [`EntityDelta`], [`EntitySnapshot`], [`InboundDelta`]: entity state records
//! - [`RequestEnvelope`], [`ResponseEnvelope`], [`PushFrame`]: the envelopes
//! - [`ErrorCode`]: platform failure codes
//! - [`frame`]: correlation-id framing of the byte stream
//! - [`value_codec`]: native [`stackless_core::Value`] to wire and back
//!
//! Every record is a canonical CBOR map produced by `stackless_codec`.
//!
//! ```rust
//! use stackless_protocol::{RequestBody, RequestEnvelope};
//! use stackless_core::NamespaceKey;
//!
//! let ns = NamespaceKey::new(7, 1).unwrap();
//! let request = RequestEnvelope::new(
//!     "lc",
//!     ns,
//!     RequestBody::GetEntity { class_id: 2, primary_key: "abc".into() },
//! );
//! let bytes = request.encode().unwrap();
//! assert_eq!(RequestEnvelope::decode(&bytes).unwrap(), request);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod code;
mod delta;
mod error;
mod fields;
pub mod frame;
mod push;
mod request;
mod response;
pub mod value_codec;
mod wire;

pub use code::ErrorCode;
pub use delta::{EntityDelta, EntitySnapshot, InboundDelta};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{FrameKind, InboundHeader, OutboundHeader};
pub use push::{EventMessage, PushFrame, PushMessage, WireEvent};
pub use request::{RequestBody, RequestEnvelope, RequestKind, WireSource, PROTOCOL_VERSION};
pub use response::{ConsoleLog, LogEntry, OkPayload, ResponseBody, ResponseEnvelope};
pub use value_codec::{decode_properties, decode_value, encode_value, inbound_delta, TransferQueue};
pub use wire::{ValueTag, WireElement, WireProperty, WireRef, WireValue};
