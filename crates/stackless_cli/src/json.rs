//! Conversion between native values and JSON.
//!
//! Output never descends into referenced entities, so cyclic graphs print
//! as references.

use serde_json::{json, Map, Number};
use stackless_client::{Entity, Value};

/// Renders a value. Nested entities and services become reference objects.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Undefined | Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => Number::from_f64(*n).map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Date(date) => serde_json::Value::String(date.to_rfc3339()),
        Value::Object(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(name, v)| (name.clone(), to_json(v)))
                .collect(),
        ),
        Value::Array(items) | Value::Set(items) => {
            serde_json::Value::Array(items.iter().map(to_json).collect())
        }
        Value::Map(pairs) => serde_json::Value::Array(
            pairs
                .iter()
                .map(|(k, v)| json!([to_json(k), to_json(v)]))
                .collect(),
        ),
        Value::Entity(entity) => json!({
            "$entity": {
                "class_id": entity.class().class_id,
                "primary_key": entity.primary_key(),
            }
        }),
        Value::Service(service) => json!({
            "$service": {
                "class_id": service.key().class.class_id,
                "primary_key": service.primary_key(),
            }
        }),
        Value::Unresolved(key) => json!({ "$unresolved": key.to_string() }),
    }
}

/// Renders an entity with its properties.
pub fn entity_to_json(entity: &Entity) -> serde_json::Value {
    let properties: Map<String, serde_json::Value> = entity
        .properties()
        .iter()
        .map(|(name, v)| (name.clone(), to_json(v)))
        .collect();
    json!({
        "class_id": entity.class().class_id,
        "primary_key": entity.primary_key(),
        "version": entity.version(),
        "properties": properties,
    })
}

/// Parses a JSON document into a value. Objects become plain objects.
pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => n.as_f64().map_or(Value::Null, Value::Number),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(from_json).collect()),
        serde_json::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, v)| (name.clone(), from_json(v)))
                .collect(),
        ),
    }
}
