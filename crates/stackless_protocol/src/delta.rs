//! Entity state records: server deltas, full snapshots and outbound state.

use stackless_codec::Value;

use crate::error::ProtocolResult;
use crate::fields::{Fields, Record};
use crate::wire::{WireProperty, WireRef};

/// One incremental, version-stamped change to an entity, sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDelta {
    /// Entity class id.
    pub class_id: u32,
    /// Entity primary key.
    pub primary_key: String,
    /// Version after the change.
    pub version: u64,
    /// Properties set by the change.
    pub properties: Vec<WireProperty>,
    /// Properties removed by the change.
    pub deleted_properties: Vec<String>,
    /// Whether the entity was deleted.
    pub deleted: bool,
}

impl EntityDelta {
    /// Reference to the changed entity.
    pub fn reference(&self) -> WireRef {
        WireRef::new(self.class_id, self.primary_key.as_str())
    }

    pub(crate) fn to_cbor(&self) -> Value {
        Record::new()
            .field("class_id", self.class_id)
            .field("primary_key", self.primary_key.as_str())
            .field("version", self.version)
            .list("properties", &self.properties, WireProperty::to_cbor)
            .list("deleted_properties", &self.deleted_properties, |n| {
                Value::from(n.as_str())
            })
            .field("deleted", self.deleted)
            .build()
    }

    pub(crate) fn from_cbor(value: &Value) -> ProtocolResult<Self> {
        let fields = Fields::of("EntityDelta", value)?;
        Ok(Self {
            class_id: fields.u32("class_id")?,
            primary_key: fields.text("primary_key")?,
            version: fields.u64("version")?,
            properties: WireProperty::list_from_cbor(fields.list("properties")?)?,
            deleted_properties: fields.text_list("deleted_properties")?,
            deleted: fields.bool("deleted")?,
        })
    }

    pub(crate) fn list_from_cbor(values: &[Value]) -> ProtocolResult<Vec<Self>> {
        values.iter().map(Self::from_cbor).collect()
    }
}

/// Full state of an entity, returned by a fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    /// Entity class id.
    pub class_id: u32,
    /// Entity primary key.
    pub primary_key: String,
    /// Current version.
    pub version: u64,
    /// All properties.
    pub properties: Vec<WireProperty>,
    /// Whether the entity has been deleted.
    pub deleted: bool,
}

impl EntitySnapshot {
    pub(crate) fn to_cbor(&self) -> Value {
        Record::new()
            .field("class_id", self.class_id)
            .field("primary_key", self.primary_key.as_str())
            .field("version", self.version)
            .list("properties", &self.properties, WireProperty::to_cbor)
            .field("deleted", self.deleted)
            .build()
    }

    pub(crate) fn from_cbor(value: &Value) -> ProtocolResult<Self> {
        let fields = Fields::of("EntitySnapshot", value)?;
        Ok(Self {
            class_id: fields.u32("class_id")?,
            primary_key: fields.text("primary_key")?,
            version: fields.u64("version")?,
            properties: WireProperty::list_from_cbor(fields.list("properties")?)?,
            deleted: fields.bool("deleted")?,
        })
    }
}

/// Local state of an entity attached to a request.
///
/// `version` is the last server version the client saw, 0 when the entity
/// was created locally and never saved.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundDelta {
    /// Entity class id.
    pub class_id: u32,
    /// Entity primary key.
    pub primary_key: String,
    /// Base version, 0 if unknown.
    pub version: u64,
    /// Current properties.
    pub properties: Vec<WireProperty>,
    /// Properties removed locally since the last server state.
    pub deleted_properties: Vec<String>,
}

impl InboundDelta {
    pub(crate) fn to_cbor(&self) -> Value {
        Record::new()
            .field("class_id", self.class_id)
            .field("primary_key", self.primary_key.as_str())
            .field("version", self.version)
            .list("properties", &self.properties, WireProperty::to_cbor)
            .list("deleted_properties", &self.deleted_properties, |n| {
                Value::from(n.as_str())
            })
            .build()
    }

    pub(crate) fn from_cbor(value: &Value) -> ProtocolResult<Self> {
        let fields = Fields::of("InboundDelta", value)?;
        Ok(Self {
            class_id: fields.u32("class_id")?,
            primary_key: fields.text("primary_key")?,
            version: fields.u64("version")?,
            properties: WireProperty::list_from_cbor(fields.list("properties")?)?,
            deleted_properties: fields.text_list("deleted_properties")?,
        })
    }

    pub(crate) fn list_from_cbor(values: &[Value]) -> ProtocolResult<Vec<Self>> {
        values.iter().map(Self::from_cbor).collect()
    }
}
