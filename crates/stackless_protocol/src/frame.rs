//! Connection framing.
//!
//! Outbound (client to server):
//!
//! ```text
//! | correlation id: u32 LE | payload length: u32 LE | payload |
//! ```
//!
//! Inbound (server to client):
//!
//! ```text
//! | correlation id: u32 LE | payload length: u32 LE | kind: u8 | payload |
//! ```
//!
//! The length never counts the kind byte. Push frames carry id 0.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};

/// Size of an outbound header.
pub const OUTBOUND_HEADER_LEN: usize = 8;

/// Size of an inbound header, kind byte included.
pub const INBOUND_HEADER_LEN: usize = 9;

/// Default cap on a single payload.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Correlation id used for frames that answer no request.
pub const UNCORRELATED_ID: u32 = 0;

/// Discriminator of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Answer to a pending request.
    Response = 1,
    /// Unsolicited push message.
    Push = 2,
}

impl FrameKind {
    /// Parses a kind byte.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidFrameKind`] for 0 and unknown bytes.
    pub fn from_byte(b: u8) -> ProtocolResult<Self> {
        match b {
            1 => Ok(Self::Response),
            2 => Ok(Self::Push),
            other => Err(ProtocolError::InvalidFrameKind(other)),
        }
    }

    /// The kind byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

fn checked_len(len: usize, max: u32) -> ProtocolResult<u32> {
    match u32::try_from(len) {
        Ok(len) if len <= max => Ok(len),
        _ => Err(ProtocolError::FrameTooLarge {
            len: u32::try_from(len).unwrap_or(u32::MAX),
            max,
        }),
    }
}

/// Header of a client-to-server frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundHeader {
    /// Correlation id.
    pub id: u32,
    /// Payload length.
    pub len: u32,
}

impl OutboundHeader {
    /// Parses a header, enforcing `max_len`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] when the length exceeds `max_len`.
    pub fn parse(bytes: [u8; OUTBOUND_HEADER_LEN], max_len: u32) -> ProtocolResult<Self> {
        let mut buf = &bytes[..];
        let id = buf.get_u32_le();
        let len = buf.get_u32_le();
        if len > max_len {
            return Err(ProtocolError::FrameTooLarge { len, max: max_len });
        }
        Ok(Self { id, len })
    }
}

/// Header of a server-to-client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundHeader {
    /// Correlation id, [`UNCORRELATED_ID`] for pushes.
    pub id: u32,
    /// Payload length.
    pub len: u32,
    /// Frame kind.
    pub kind: FrameKind,
}

impl InboundHeader {
    /// Parses a header, enforcing `max_len` before looking at the kind.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] or [`ProtocolError::InvalidFrameKind`].
    pub fn parse(bytes: [u8; INBOUND_HEADER_LEN], max_len: u32) -> ProtocolResult<Self> {
        let mut buf = &bytes[..];
        let id = buf.get_u32_le();
        let len = buf.get_u32_le();
        if len > max_len {
            return Err(ProtocolError::FrameTooLarge { len, max: max_len });
        }
        let kind = FrameKind::from_byte(buf.get_u8())?;
        Ok(Self { id, len, kind })
    }
}

/// Builds a client-to-server frame.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the payload exceeds `max_len`.
pub fn encode_outbound(id: u32, payload: &[u8], max_len: u32) -> ProtocolResult<Bytes> {
    let len = checked_len(payload.len(), max_len)?;
    let mut buf = BytesMut::with_capacity(OUTBOUND_HEADER_LEN + payload.len());
    buf.put_u32_le(id);
    buf.put_u32_le(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Builds a server-to-client frame. Used by test peers and tools.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the payload exceeds `max_len`.
pub fn encode_inbound(
    id: u32,
    kind: FrameKind,
    payload: &[u8],
    max_len: u32,
) -> ProtocolResult<Bytes> {
    let len = checked_len(payload.len(), max_len)?;
    let mut buf = BytesMut::with_capacity(INBOUND_HEADER_LEN + payload.len());
    buf.put_u32_le(id);
    buf.put_u32_le(len);
    buf.put_u8(kind.as_byte());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_layout_is_little_endian() {
        let frame = encode_outbound(7, b"abc", DEFAULT_MAX_FRAME_LEN).unwrap();
        assert_eq!(&frame[..], &[7, 0, 0, 0, 3, 0, 0, 0, b'a', b'b', b'c']);

        let mut header = [0u8; OUTBOUND_HEADER_LEN];
        header.copy_from_slice(&frame[..OUTBOUND_HEADER_LEN]);
        let header = OutboundHeader::parse(header, DEFAULT_MAX_FRAME_LEN).unwrap();
        assert_eq!(header, OutboundHeader { id: 7, len: 3 });
    }

    #[test]
    fn inbound_length_excludes_kind() {
        let frame = encode_inbound(9, FrameKind::Push, b"xy", DEFAULT_MAX_FRAME_LEN).unwrap();
        assert_eq!(frame.len(), INBOUND_HEADER_LEN + 2);

        let mut header = [0u8; INBOUND_HEADER_LEN];
        header.copy_from_slice(&frame[..INBOUND_HEADER_LEN]);
        let header = InboundHeader::parse(header, DEFAULT_MAX_FRAME_LEN).unwrap();
        assert_eq!(header.id, 9);
        assert_eq!(header.len, 2);
        assert_eq!(header.kind, FrameKind::Push);
    }

    #[test]
    fn invalid_kinds_are_rejected() {
        let mut header = [0u8; INBOUND_HEADER_LEN];
        assert_eq!(
            InboundHeader::parse(header, 16),
            Err(ProtocolError::InvalidFrameKind(0))
        );
        header[8] = 42;
        assert_eq!(
            InboundHeader::parse(header, 16),
            Err(ProtocolError::InvalidFrameKind(42))
        );
    }

    #[test]
    fn oversized_frames_are_rejected() {
        assert!(matches!(
            encode_outbound(1, &[0u8; 17], 16),
            Err(ProtocolError::FrameTooLarge { len: 17, max: 16 })
        ));

        let mut header = [0u8; INBOUND_HEADER_LEN];
        header[4..8].copy_from_slice(&100u32.to_le_bytes());
        header[8] = FrameKind::Response.as_byte();
        assert_eq!(
            InboundHeader::parse(header, 16),
            Err(ProtocolError::FrameTooLarge { len: 100, max: 16 })
        );
    }
}
