//! Request envelopes.

use stackless_codec::{from_cbor, to_canonical_cbor, CodecError, Value};
use stackless_core::{EntityKey, EventSource, NamespaceKey, ServiceKey};

use crate::delta::InboundDelta;
use crate::error::{ProtocolError, ProtocolResult};
use crate::fields::{Fields, Record};
use crate::wire::{WireRef, WireValue};

/// Protocol version written into every request.
pub const PROTOCOL_VERSION: u32 = 1;

/// Operation kind of a request, echoed by its success payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Fetch one entity.
    GetEntity,
    /// Save entities.
    SaveEntities,
    /// Call a service or entity method.
    CallMethod,
    /// Subscribe to an event stream.
    SubscribeEvent,
    /// Unsubscribe from an event stream.
    UnsubscribeEvent,
    /// Subscribe to entity updates.
    SubscribeUpdates,
    /// Unsubscribe from entity updates.
    UnsubscribeUpdates,
}

impl RequestKind {
    /// Wire tag.
    pub fn tag(self) -> u64 {
        match self {
            Self::GetEntity => 1,
            Self::SaveEntities => 2,
            Self::CallMethod => 3,
            Self::SubscribeEvent => 4,
            Self::UnsubscribeEvent => 5,
            Self::SubscribeUpdates => 6,
            Self::UnsubscribeUpdates => 7,
        }
    }

    /// Parses a wire tag.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownTag`] for unknown values.
    pub fn from_tag(tag: u64) -> ProtocolResult<Self> {
        Ok(match tag {
            1 => Self::GetEntity,
            2 => Self::SaveEntities,
            3 => Self::CallMethod,
            4 => Self::SubscribeEvent,
            5 => Self::UnsubscribeEvent,
            6 => Self::SubscribeUpdates,
            7 => Self::UnsubscribeUpdates,
            other => return Err(ProtocolError::unknown_tag("request kind", other)),
        })
    }
}

/// Reference to the object an event stream belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WireSource {
    /// An entity.
    Entity(WireRef),
    /// A service.
    Service(WireRef),
}

impl WireSource {
    /// Builds the wire form of a source key.
    pub fn from_source(source: &EventSource) -> Self {
        let reference = WireRef::new(source.class().class_id, source.primary_key());
        match source {
            EventSource::Entity(_) => Self::Entity(reference),
            EventSource::Service(_) => Self::Service(reference),
        }
    }

    /// The referenced object.
    pub fn reference(&self) -> &WireRef {
        match self {
            Self::Entity(r) | Self::Service(r) => r,
        }
    }

    /// Rebuilds the source key inside `namespace`.
    ///
    /// # Errors
    ///
    /// Fails on an empty primary key.
    pub fn to_source(&self, namespace: NamespaceKey) -> ProtocolResult<EventSource> {
        let reference = self.reference();
        let class = namespace.class(reference.class_id);
        Ok(match self {
            Self::Entity(_) => {
                EventSource::Entity(EntityKey::new(class, reference.primary_key.as_str())?)
            }
            Self::Service(_) => {
                EventSource::Service(ServiceKey::new(class, reference.primary_key.as_str())?)
            }
        })
    }

    pub(crate) fn to_cbor(&self) -> Value {
        let kind = match self {
            Self::Entity(_) => "entity",
            Self::Service(_) => "service",
        };
        Record::new()
            .field("kind", kind)
            .field("class_id", self.reference().class_id)
            .field("primary_key", self.reference().primary_key.as_str())
            .build()
    }

    pub(crate) fn from_cbor(value: &Value) -> ProtocolResult<Self> {
        let fields = Fields::of("WireSource", value)?;
        let reference = WireRef::new(fields.u32("class_id")?, fields.text("primary_key")?);
        match fields.text("kind")?.as_str() {
            "entity" => Ok(Self::Entity(reference)),
            "service" => Ok(Self::Service(reference)),
            other => Err(CodecError::invalid_structure(format!(
                "WireSource: unknown kind '{other}'"
            ))
            .into()),
        }
    }
}

/// Operation-specific part of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Fetch the full state of one entity.
    GetEntity {
        /// Entity class id.
        class_id: u32,
        /// Entity primary key.
        primary_key: String,
    },
    /// Save entities; carries every transitively referenced entity once.
    SaveEntities {
        /// Local state of each entity.
        entities: Vec<InboundDelta>,
    },
    /// Call a method on a service or entity.
    CallMethod {
        /// Target class id.
        class_id: u32,
        /// Target primary key.
        primary_key: String,
        /// Method id.
        method_id: u32,
        /// Positional arguments.
        arguments: Vec<WireValue>,
        /// Entities referenced by the arguments.
        referenced: Vec<InboundDelta>,
    },
    /// Subscribe to an event stream.
    SubscribeEvent {
        /// Event class id.
        event_class_id: u32,
        /// Raising object.
        source: WireSource,
    },
    /// Unsubscribe from an event stream.
    UnsubscribeEvent {
        /// Event class id.
        event_class_id: u32,
        /// Raising object.
        source: WireSource,
    },
    /// Subscribe to updates of entities.
    SubscribeUpdates {
        /// Watched entities.
        references: Vec<WireRef>,
    },
    /// Unsubscribe from updates of entities.
    UnsubscribeUpdates {
        /// Entities no longer watched.
        references: Vec<WireRef>,
    },
}

impl RequestBody {
    /// Operation kind.
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::GetEntity { .. } => RequestKind::GetEntity,
            Self::SaveEntities { .. } => RequestKind::SaveEntities,
            Self::CallMethod { .. } => RequestKind::CallMethod,
            Self::SubscribeEvent { .. } => RequestKind::SubscribeEvent,
            Self::UnsubscribeEvent { .. } => RequestKind::UnsubscribeEvent,
            Self::SubscribeUpdates { .. } => RequestKind::SubscribeUpdates,
            Self::UnsubscribeUpdates { .. } => RequestKind::UnsubscribeUpdates,
        }
    }

    fn to_cbor(&self) -> Value {
        let record = Record::new().field("kind", self.kind().tag());
        let record = match self {
            Self::GetEntity {
                class_id,
                primary_key,
            } => record
                .field("class_id", *class_id)
                .field("primary_key", primary_key.as_str()),
            Self::SaveEntities { entities } => {
                record.list("entities", entities, InboundDelta::to_cbor)
            }
            Self::CallMethod {
                class_id,
                primary_key,
                method_id,
                arguments,
                referenced,
            } => record
                .field("class_id", *class_id)
                .field("primary_key", primary_key.as_str())
                .field("method_id", *method_id)
                .list("arguments", arguments, WireValue::to_cbor)
                .list("referenced", referenced, InboundDelta::to_cbor),
            Self::SubscribeEvent {
                event_class_id,
                source,
            }
            | Self::UnsubscribeEvent {
                event_class_id,
                source,
            } => record
                .field("event_class_id", *event_class_id)
                .field("source", source.to_cbor()),
            Self::SubscribeUpdates { references } | Self::UnsubscribeUpdates { references } => {
                record.list("references", references, WireRef::to_cbor)
            }
        };
        record.build()
    }

    fn from_cbor(value: &Value) -> ProtocolResult<Self> {
        let fields = Fields::of("RequestBody", value)?;
        let references = || -> ProtocolResult<Vec<WireRef>> {
            fields.list("references")?.iter().map(WireRef::from_cbor).collect()
        };
        Ok(match RequestKind::from_tag(fields.u64("kind")?)? {
            RequestKind::GetEntity => Self::GetEntity {
                class_id: fields.u32("class_id")?,
                primary_key: fields.text("primary_key")?,
            },
            RequestKind::SaveEntities => Self::SaveEntities {
                entities: InboundDelta::list_from_cbor(fields.list("entities")?)?,
            },
            RequestKind::CallMethod => Self::CallMethod {
                class_id: fields.u32("class_id")?,
                primary_key: fields.text("primary_key")?,
                method_id: fields.u32("method_id")?,
                arguments: WireValue::list_from_cbor(fields.list("arguments")?)?,
                referenced: InboundDelta::list_from_cbor(fields.list("referenced")?)?,
            },
            RequestKind::SubscribeEvent => Self::SubscribeEvent {
                event_class_id: fields.u32("event_class_id")?,
                source: WireSource::from_cbor(fields.require("source")?)?,
            },
            RequestKind::UnsubscribeEvent => Self::UnsubscribeEvent {
                event_class_id: fields.u32("event_class_id")?,
                source: WireSource::from_cbor(fields.require("source")?)?,
            },
            RequestKind::SubscribeUpdates => Self::SubscribeUpdates {
                references: references()?,
            },
            RequestKind::UnsubscribeUpdates => Self::UnsubscribeUpdates {
                references: references()?,
            },
        })
    }
}

/// A complete request as written to the connection.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    /// Protocol version of the sender.
    pub protocol_version: u32,
    /// Correlation string echoed in server logs.
    pub log_context: String,
    /// Target namespace; the server validates routing against it.
    pub namespace: NamespaceKey,
    /// Operation payload.
    pub body: RequestBody,
}

impl RequestEnvelope {
    /// Creates a request at the current protocol version.
    pub fn new(log_context: impl Into<String>, namespace: NamespaceKey, body: RequestBody) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            log_context: log_context.into(),
            namespace,
            body,
        }
    }

    /// Encodes to CBOR.
    ///
    /// # Errors
    ///
    /// Fails only if the CBOR encoder rejects the record.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let record = Record::new()
            .field("protocol_version", self.protocol_version)
            .field("log_context", self.log_context.as_str())
            .field("namespace_id", self.namespace.id())
            .field("namespace_version", self.namespace.version())
            .field("body", self.body.to_cbor())
            .build();
        Ok(to_canonical_cbor(&record)?)
    }

    /// Decodes from CBOR.
    ///
    /// # Errors
    ///
    /// Fails on malformed records, unknown tags, a zero namespace key or
    /// another protocol version.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let value = from_cbor(bytes)?;
        let fields = Fields::of("RequestEnvelope", &value)?;
        let protocol_version = fields.u32("protocol_version")?;
        if protocol_version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                found: protocol_version,
                expected: PROTOCOL_VERSION,
            });
        }
        Ok(Self {
            protocol_version,
            log_context: fields.text("log_context")?,
            namespace: NamespaceKey::new(
                fields.u64("namespace_id")?,
                fields.u64("namespace_version")?,
            )?,
            body: RequestBody::from_cbor(fields.require("body")?)?,
        })
    }

    /// Operation kind.
    pub fn kind(&self) -> RequestKind {
        self.body.kind()
    }
}
