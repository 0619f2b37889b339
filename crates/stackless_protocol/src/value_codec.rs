//! Conversion between native [`Value`]s and [`WireValue`] records.
//!
//! Encoding an entity reference sends only its class id and primary key,
//! and queues the entity on a [`TransferQueue`] so that its full state rides
//! along with the same request, once. Decoding never blocks: an entity
//! reference comes back as [`Value::Unresolved`] and is resolved later by
//! the caller.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use stackless_codec::CodecError;
use stackless_core::{CoreError, Entity, EntityKey, NamespaceKey, Service, ServiceKey, Value};
use tracing::debug;

use crate::delta::InboundDelta;
use crate::error::{ProtocolError, ProtocolResult};
use crate::wire::{ValueTag, WireElement, WireProperty, WireRef, WireValue};

/// Largest array a decoded value may expand to, holes included.
pub const MAX_ARRAY_LEN: usize = 16 * 1024 * 1024;

/// Most holes a decoded array may have beyond its transmitted elements.
pub const MAX_ARRAY_HOLES: usize = 64 * 1024;

/// Entities whose state must accompany an outgoing request.
///
/// Entries are de-duplicated by [`EntityKey`] and must all live in the
/// request's namespace.
#[derive(Debug)]
pub struct TransferQueue {
    namespace: NamespaceKey,
    seen: HashSet<EntityKey>,
    queued: Vec<Entity>,
}

impl TransferQueue {
    /// Creates an empty queue for a request in `namespace`.
    pub fn new(namespace: NamespaceKey) -> Self {
        Self {
            namespace,
            seen: HashSet::new(),
            queued: Vec::new(),
        }
    }

    /// Namespace of the request.
    pub fn namespace(&self) -> NamespaceKey {
        self.namespace
    }

    fn check_namespace(&self, found: NamespaceKey) -> ProtocolResult<()> {
        if found == self.namespace {
            Ok(())
        } else {
            Err(CoreError::MixedNamespaces {
                expected: self.namespace,
                found,
            }
            .into())
        }
    }

    /// Queues `entity`. Returns `false` if it was already queued.
    ///
    /// # Errors
    ///
    /// Fails if the entity lives in another namespace.
    pub fn enqueue(&mut self, entity: &Entity) -> ProtocolResult<bool> {
        self.check_namespace(entity.namespace())?;
        if !self.seen.insert(entity.key().clone()) {
            return Ok(false);
        }
        self.queued.push(entity.clone());
        Ok(true)
    }

    /// Number of queued entities.
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Encodes every queued entity, following references transitively.
    ///
    /// # Errors
    ///
    /// Fails if any property cannot be encoded.
    pub fn into_deltas(mut self) -> ProtocolResult<Vec<InboundDelta>> {
        let mut deltas = Vec::with_capacity(self.queued.len());
        let mut next = 0;
        while next < self.queued.len() {
            let entity = self.queued[next].clone();
            next += 1;
            deltas.push(inbound_delta(&entity, &mut self)?);
        }
        Ok(deltas)
    }
}

/// Encodes a native value.
///
/// # Errors
///
/// Returns [`ProtocolError::UnresolvedReference`] for placeholders, and a
/// namespace error for references outside the queue's namespace.
pub fn encode_value(value: &Value, queue: &mut TransferQueue) -> ProtocolResult<WireValue> {
    Ok(match value {
        Value::Undefined => WireValue::Undefined,
        Value::Null => WireValue::Null,
        Value::Bool(b) => WireValue::Bool(*b),
        Value::Number(n) => WireValue::Number(*n),
        Value::String(s) => WireValue::String(s.clone()),
        Value::Date(date) => WireValue::Date(date.timestamp_millis() as f64),
        Value::Object(fields) => WireValue::Object(
            fields
                .iter()
                .map(|(name, v)| -> ProtocolResult<WireProperty> {
                    Ok(WireProperty::new(name.as_str(), encode_value(v, queue)?))
                })
                .collect::<ProtocolResult<_>>()?,
        ),
        Value::Array(items) => WireValue::Array(
            items
                .iter()
                .enumerate()
                .map(|(index, v)| -> ProtocolResult<WireElement> {
                    let index = u32::try_from(index).map_err(|_| {
                        CodecError::encoding_failed("array longer than u32::MAX")
                    })?;
                    Ok(WireElement {
                        index,
                        value: encode_value(v, queue)?,
                    })
                })
                .collect::<ProtocolResult<_>>()?,
        ),
        Value::Map(pairs) => WireValue::Map(
            pairs
                .iter()
                .map(|(k, v)| -> ProtocolResult<(WireValue, WireValue)> {
                    Ok((encode_value(k, queue)?, encode_value(v, queue)?))
                })
                .collect::<ProtocolResult<_>>()?,
        ),
        Value::Set(items) => WireValue::Set(
            items
                .iter()
                .map(|v| encode_value(v, queue))
                .collect::<ProtocolResult<_>>()?,
        ),
        Value::Entity(entity) => {
            queue.enqueue(entity)?;
            WireValue::EntityRef(WireRef::new(entity.class().class_id, entity.primary_key()))
        }
        Value::Service(service) => {
            let key = service.key();
            queue.check_namespace(key.class.namespace)?;
            WireValue::ServiceRef(WireRef::new(key.class.class_id, key.primary_key.as_str()))
        }
        Value::Unresolved(key) => {
            return Err(ProtocolError::UnresolvedReference { key: key.clone() })
        }
    })
}

/// Encodes the local state of an entity for a save or call request.
///
/// Locally removed properties travel as `deleted_properties`.
///
/// # Errors
///
/// Fails if any property cannot be encoded.
pub fn inbound_delta(entity: &Entity, queue: &mut TransferQueue) -> ProtocolResult<InboundDelta> {
    let properties = entity
        .properties()
        .iter()
        .map(|(name, v)| -> ProtocolResult<WireProperty> {
            Ok(WireProperty::new(name.as_str(), encode_value(v, queue)?))
        })
        .collect::<ProtocolResult<_>>()?;
    Ok(InboundDelta {
        class_id: entity.class().class_id,
        primary_key: entity.primary_key().to_string(),
        version: entity.version().unwrap_or(0),
        properties,
        deleted_properties: entity.tombstones(),
    })
}

/// Decodes a wire value whose references live in `namespace`.
///
/// Entity references decode to [`Value::Unresolved`].
///
/// # Errors
///
/// Fails on invalid keys, invalid dates or oversized sparse arrays.
pub fn decode_value(wire: &WireValue, namespace: NamespaceKey) -> ProtocolResult<(ValueTag, Value)> {
    let value = match wire {
        WireValue::Undefined => Value::Undefined,
        WireValue::Null => Value::Null,
        WireValue::Bool(b) => Value::Bool(*b),
        WireValue::Number(n) => Value::Number(*n),
        WireValue::String(s) => Value::String(s.clone()),
        WireValue::Date(ms) => Value::Date(date_from_millis(*ms)?),
        WireValue::Object(props) => Value::Object(
            props
                .iter()
                .map(|p| -> ProtocolResult<(String, Value)> {
                    Ok((p.name.clone(), decode(&p.value, namespace)?))
                })
                .collect::<ProtocolResult<BTreeMap<_, _>>>()?,
        ),
        WireValue::Array(elements) => Value::Array(decode_array(elements, namespace)?),
        WireValue::Map(pairs) => Value::Map(
            pairs
                .iter()
                .map(|(k, v)| -> ProtocolResult<(Value, Value)> {
                    Ok((decode(k, namespace)?, decode(v, namespace)?))
                })
                .collect::<ProtocolResult<_>>()?,
        ),
        WireValue::Set(items) => Value::Set(
            items
                .iter()
                .map(|v| decode(v, namespace))
                .collect::<ProtocolResult<_>>()?,
        ),
        WireValue::EntityRef(r) => Value::Unresolved(EntityKey::new(
            namespace.class(r.class_id),
            r.primary_key.as_str(),
        )?),
        WireValue::ServiceRef(r) => Value::Service(Service::new(ServiceKey::new(
            namespace.class(r.class_id),
            r.primary_key.as_str(),
        )?)),
    };
    Ok((wire.tag(), value))
}

fn decode(wire: &WireValue, namespace: NamespaceKey) -> ProtocolResult<Value> {
    decode_value(wire, namespace).map(|(_, v)| v)
}

/// Decodes a property list, keeping wire order.
///
/// # Errors
///
/// Fails if any value fails to decode.
pub fn decode_properties(
    props: &[WireProperty],
    namespace: NamespaceKey,
) -> ProtocolResult<Vec<(String, Value)>> {
    props
        .iter()
        .map(|p| -> ProtocolResult<(String, Value)> {
            Ok((p.name.clone(), decode(&p.value, namespace)?))
        })
        .collect()
}

fn decode_array(elements: &[WireElement], namespace: NamespaceKey) -> ProtocolResult<Vec<Value>> {
    let len = elements.iter().map(|e| e.index as usize + 1).max().unwrap_or(0);
    let holes = len.saturating_sub(elements.len());
    if len > MAX_ARRAY_LEN || holes > MAX_ARRAY_HOLES {
        debug!(len, elements = elements.len(), "rejecting sparse array");
        return Err(CodecError::invalid_structure(format!(
            "array of {len} slots with {} elements exceeds limits ({MAX_ARRAY_LEN} slots, {MAX_ARRAY_HOLES} holes)",
            elements.len()
        ))
        .into());
    }
    let mut items = vec![Value::Undefined; len];
    for element in elements {
        items[element.index as usize] = decode(&element.value, namespace)?;
    }
    Ok(items)
}

fn date_from_millis(ms: f64) -> ProtocolResult<DateTime<Utc>> {
    let invalid = || {
        debug!(millis = ms, "rejecting date");
        CodecError::invalid_structure(format!("invalid date {ms}"))
    };
    if !ms.is_finite() {
        return Err(invalid().into());
    }
    DateTime::<Utc>::from_timestamp_millis(ms.trunc() as i64).ok_or_else(|| invalid().into())
}
