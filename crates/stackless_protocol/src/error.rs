//! Error types for the protocol crate.

use stackless_codec::CodecError;
use stackless_core::{CoreError, EntityKey};
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building, framing or reading wire records.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// CBOR layer failure, including missing or mistyped record fields.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A decoded key violates a key invariant (zero namespace, empty primary key, ...).
    #[error("invalid key: {0}")]
    Core(#[from] CoreError),

    /// A discriminator carried a value this client does not know.
    #[error("unknown {what} tag {tag}")]
    UnknownTag {
        /// Which discriminator.
        what: &'static str,
        /// The offending value.
        tag: u64,
    },

    /// A native value cannot be sent.
    #[error("cannot encode {type_name} value")]
    UnsupportedValue {
        /// Variant name of the value.
        type_name: &'static str,
    },

    /// A placeholder reference reached the encoder.
    #[error("unresolved reference to {key} cannot be encoded")]
    UnresolvedReference {
        /// The unresolved key.
        key: EntityKey,
    },

    /// The peer speaks another protocol version.
    #[error("unsupported protocol version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version in the envelope.
        found: u32,
        /// Version this client speaks.
        expected: u32,
    },

    /// A frame header announced more bytes than allowed.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Announced payload length.
        len: u32,
        /// Configured limit.
        max: u32,
    },

    /// A frame carried an invalid kind byte.
    #[error("invalid frame kind {0}")]
    InvalidFrameKind(u8),
}

impl ProtocolError {
    /// Creates an unknown-tag error.
    pub fn unknown_tag(what: &'static str, tag: u64) -> Self {
        Self::UnknownTag { what, tag }
    }
}
