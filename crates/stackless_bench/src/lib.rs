//! Benchmark utilities.

use rand::distributions::Alphanumeric;
use rand::Rng;
use stackless_core::{NamespaceKey, Value};
use stackless_protocol::{EntityDelta, EntitySnapshot, WireProperty, WireRef, WireValue};

/// Namespace used by every benchmark.
pub fn bench_namespace() -> NamespaceKey {
    NamespaceKey::new(7, 1).expect("Benchmark namespace is valid")
}

/// Random alphanumeric text of `len` characters.
pub fn random_text(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A flat record with `width` string and number properties.
pub fn flat_object(width: usize) -> Value {
    let mut rng = rand::thread_rng();
    Value::Object(
        (0..width)
            .map(|i| {
                let value = if i % 2 == 0 {
                    Value::String(random_text(16))
                } else {
                    Value::Number(rng.gen_range(0.0..1.0e6))
                };
                (format!("field_{i}"), value)
            })
            .collect(),
    )
}

/// A tree of objects `depth` levels deep with `width` children per level.
pub fn nested_object(depth: usize, width: usize) -> Value {
    if depth == 0 {
        return Value::String("leaf".into());
    }
    Value::Object(
        (0..width)
            .map(|i| (format!("key_{i}"), nested_object(depth - 1, width)))
            .collect(),
    )
}

/// Wire properties with a mix of scalars and entity references.
pub fn wire_properties(width: usize) -> Vec<WireProperty> {
    (0..width)
        .map(|i| {
            let value = match i % 3 {
                0 => WireValue::String(random_text(12)),
                1 => WireValue::Number(i as f64),
                _ => WireValue::EntityRef(WireRef::new(2, format!("ref-{i}"))),
            };
            WireProperty::new(format!("p{i}"), value)
        })
        .collect()
}

/// `count` deltas creating distinct entities at version 1.
pub fn creating_deltas(count: usize, width: usize) -> Vec<EntityDelta> {
    (0..count)
        .map(|i| EntityDelta {
            class_id: 1,
            primary_key: format!("e{i}"),
            version: 1,
            properties: (0..width)
                .map(|p| WireProperty::new(format!("p{p}"), WireValue::Number(p as f64)))
                .collect(),
            deleted_properties: Vec::new(),
            deleted: false,
        })
        .collect()
}

/// `count` full snapshots of distinct entities.
pub fn snapshots(count: usize, width: usize) -> Vec<EntitySnapshot> {
    creating_deltas(count, width)
        .into_iter()
        .map(|delta| EntitySnapshot {
            class_id: delta.class_id,
            primary_key: delta.primary_key,
            version: 3,
            properties: delta.properties,
            deleted: false,
        })
        .collect()
}
