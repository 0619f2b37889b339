//! # Stackless Codec
//!
//! Canonical CBOR encoding/decoding for the Stackless wire protocol.
//!
//! Every request, response and push payload is a single CBOR item. The
//! encoder is deterministic so that identical records produce identical
//! bytes, which keeps message traces diffable.
//!
//! ## Canonical CBOR Rules
//!
//! - Maps are sorted by key (length-first, then bytewise)
//! - Integers use shortest encoding and span `-2^64 ..= 2^64 - 1`
//! - Floats are written as 64-bit doubles; 16- and 32-bit floats are accepted on read
//! - Strings must be UTF-8
//! - No indefinite-length items
//!
//! ## Usage
//!
//! ```
//! use stackless_codec::{to_canonical_cbor, from_cbor, Value};
//!
//! let value = Value::text_map([("version", Value::from(7u64)), ("ratio", Value::Float(0.5))]);
//! let bytes = to_canonical_cbor(&value).unwrap();
//!
//! let decoded = from_cbor(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod value;

use bytes::Bytes;

pub use decoder::{from_cbor, CanonicalDecoder};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use value::{Value, CBOR_INT_MAX, CBOR_INT_MIN};

/// Trait for records that can be written as canonical CBOR.
pub trait Encode {
    /// Encode this record to canonical CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;

    /// Encode into a shared buffer ready to hand to a transport.
    fn encode_bytes(&self) -> CodecResult<Bytes> {
        self.encode().map(Bytes::from)
    }
}

/// Trait for records that can be read from CBOR.
pub trait Decode: Sized {
    /// Decode this record from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}
