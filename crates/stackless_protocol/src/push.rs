//! Push messages: events and entity updates sent without a request.

use stackless_codec::{from_cbor, to_canonical_cbor, CodecError, Value};

use crate::delta::EntityDelta;
use crate::error::ProtocolResult;
use crate::fields::{Fields, Record};
use crate::request::WireSource;
use crate::wire::WireProperty;

/// An event as raised on the server.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEvent {
    /// Event class id.
    pub class_id: u32,
    /// Raising object.
    pub source: WireSource,
    /// Event payload.
    pub properties: Vec<WireProperty>,
}

/// An event together with the entity changes it was raised alongside.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    /// The event.
    pub event: WireEvent,
    /// Entity changes bundled with the event.
    pub deltas: Vec<EntityDelta>,
}

/// Body of a push frame, or a companion message of a response.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// Event delivery.
    Event(EventMessage),
    /// Entity-update delivery.
    EntityUpdate {
        /// One or more changes.
        deltas: Vec<EntityDelta>,
    },
}

impl PushMessage {
    /// Whether this is an event delivery.
    pub fn is_event(&self) -> bool {
        matches!(self, Self::Event(_))
    }

    pub(crate) fn to_cbor(&self) -> Value {
        match self {
            Self::Event(message) => Record::new()
                .field("kind", "event")
                .field("event_class_id", message.event.class_id)
                .field("source", message.event.source.to_cbor())
                .list("properties", &message.event.properties, WireProperty::to_cbor)
                .list("deltas", &message.deltas, EntityDelta::to_cbor)
                .build(),
            Self::EntityUpdate { deltas } => Record::new()
                .field("kind", "entity_update")
                .list("deltas", deltas, EntityDelta::to_cbor)
                .build(),
        }
    }

    pub(crate) fn from_cbor(value: &Value) -> ProtocolResult<Self> {
        let fields = Fields::of("PushMessage", value)?;
        let deltas = EntityDelta::list_from_cbor(fields.list("deltas")?)?;
        match fields.text("kind")?.as_str() {
            "event" => Ok(Self::Event(EventMessage {
                event: WireEvent {
                    class_id: fields.u32("event_class_id")?,
                    source: WireSource::from_cbor(fields.require("source")?)?,
                    properties: WireProperty::list_from_cbor(fields.list("properties")?)?,
                },
                deltas,
            })),
            "entity_update" => Ok(Self::EntityUpdate { deltas }),
            other => Err(CodecError::invalid_structure(format!(
                "PushMessage: unknown kind '{other}'"
            ))
            .into()),
        }
    }

    pub(crate) fn list_from_cbor(values: &[Value]) -> ProtocolResult<Vec<Self>> {
        values.iter().map(Self::from_cbor).collect()
    }
}

/// An unsolicited frame pushed by the server.
///
/// The namespace is kept as raw numbers: a mismatch must be classified by
/// the receiver, not rejected while decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct PushFrame {
    /// Server-side log context of the originating operation.
    pub log_context: String,
    /// Namespace id the frame targets.
    pub namespace_id: u64,
    /// Namespace version the frame targets.
    pub namespace_version: u64,
    /// Payload.
    pub message: PushMessage,
}

impl PushFrame {
    /// Encodes to CBOR.
    ///
    /// # Errors
    ///
    /// Fails only if the CBOR encoder rejects the record.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let record = Record::new()
            .field("log_context", self.log_context.as_str())
            .field("namespace_id", self.namespace_id)
            .field("namespace_version", self.namespace_version)
            .field("message", self.message.to_cbor())
            .build();
        Ok(to_canonical_cbor(&record)?)
    }

    /// Decodes from CBOR.
    ///
    /// # Errors
    ///
    /// Fails on malformed records or unknown message kinds.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let value = from_cbor(bytes)?;
        let fields = Fields::of("PushFrame", &value)?;
        Ok(Self {
            log_context: fields.opt_text("log_context").unwrap_or_default(),
            namespace_id: fields.u64("namespace_id")?,
            namespace_version: fields.u64("namespace_version")?,
            message: PushMessage::from_cbor(fields.require("message")?)?,
        })
    }
}
