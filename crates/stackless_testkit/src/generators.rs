//! Property-based test generators using proptest.
//!
//! Strategies produce values that satisfy the codec's invariants: finite
//! dates in range, non-empty primary keys, unique object property names.

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use stackless_core::{NamespaceKey, Service, ServiceKey, Value};
use stackless_protocol::{WireElement, WireProperty, WireRef, WireValue};

/// Latest epoch millisecond the generators produce (year 2100).
pub const MAX_DATE_MILLIS: i64 = 4_102_444_800_000;

/// Strategy for generating primary keys.
pub fn primary_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_-]{1,24}").expect("Invalid regex")
}

/// Strategy for generating property names.
pub fn property_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating dates with millisecond precision.
pub fn date_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0..MAX_DATE_MILLIS).prop_map(|ms| {
        DateTime::<Utc>::from_timestamp_millis(ms).expect("Millis within range")
    })
}

/// Strategy for generating finite numbers.
pub fn number_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        any::<i32>().prop_map(f64::from),
        (-1.0e12..1.0e12f64),
    ]
}

fn leaf_value_strategy(namespace: NamespaceKey) -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Undefined),
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        number_strategy().prop_map(Value::Number),
        ".{0,32}".prop_map(Value::String),
        date_strategy().prop_map(Value::Date),
        (1..50u32, primary_key_strategy()).prop_map(move |(class_id, pk)| {
            let key = ServiceKey::new(namespace.class(class_id), pk).expect("Key is non-empty");
            Value::Service(Service::new(key))
        }),
    ]
}

/// Strategy for generating native values without entity references.
///
/// Entities carry identity and are left to fixtures; everything else,
/// including services, nests up to `depth` levels.
pub fn value_strategy(namespace: NamespaceKey, depth: u32) -> impl Strategy<Value = Value> {
    leaf_value_strategy(namespace).prop_recursive(depth, 64, 6, |inner| {
        prop_oneof![
            prop::collection::btree_map(property_name_strategy(), inner.clone(), 0..6)
                .prop_map(Value::Object),
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::vec((inner.clone(), inner.clone()), 0..4).prop_map(Value::Map),
            prop::collection::vec(inner, 0..4).prop_map(Value::Set),
        ]
    })
}

fn wire_ref_strategy() -> impl Strategy<Value = WireRef> {
    (1..50u32, primary_key_strategy()).prop_map(|(class_id, pk)| WireRef::new(class_id, pk))
}

fn leaf_wire_strategy() -> impl Strategy<Value = WireValue> {
    prop_oneof![
        Just(WireValue::Undefined),
        Just(WireValue::Null),
        any::<bool>().prop_map(WireValue::Bool),
        number_strategy().prop_map(WireValue::Number),
        ".{0,32}".prop_map(WireValue::String),
        (0..MAX_DATE_MILLIS).prop_map(|ms| WireValue::Date(ms as f64)),
        wire_ref_strategy().prop_map(WireValue::EntityRef),
        wire_ref_strategy().prop_map(WireValue::ServiceRef),
    ]
}

/// Strategy for generating wire values as a server would send them.
///
/// Arrays are sparse: element indices are strictly increasing with gaps.
pub fn wire_value_strategy(depth: u32) -> impl Strategy<Value = WireValue> {
    leaf_wire_strategy().prop_recursive(depth, 64, 6, |inner| {
        prop_oneof![
            prop::collection::btree_map(property_name_strategy(), inner.clone(), 0..6).prop_map(
                |fields| {
                    WireValue::Object(
                        fields
                            .into_iter()
                            .map(|(name, value)| WireProperty::new(name, value))
                            .collect(),
                    )
                }
            ),
            prop::collection::vec((1..4u32, inner.clone()), 0..6).prop_map(|items| {
                let mut index = 0;
                WireValue::Array(
                    items
                        .into_iter()
                        .map(|(gap, value)| {
                            index += gap;
                            WireElement {
                                index: index - 1,
                                value,
                            }
                        })
                        .collect(),
                )
            }),
            prop::collection::vec((inner.clone(), inner.clone()), 0..4).prop_map(WireValue::Map),
            prop::collection::vec(inner, 0..4).prop_map(WireValue::Set),
        ]
    })
}

/// Counts the entity references in a wire value.
pub fn count_entity_refs(wire: &WireValue) -> usize {
    match wire {
        WireValue::EntityRef(_) => 1,
        WireValue::Object(props) => props.iter().map(|p| count_entity_refs(&p.value)).sum(),
        WireValue::Array(elements) => elements.iter().map(|e| count_entity_refs(&e.value)).sum(),
        WireValue::Map(pairs) => pairs
            .iter()
            .map(|(k, v)| count_entity_refs(k) + count_entity_refs(v))
            .sum(),
        WireValue::Set(items) => items.iter().map(count_entity_refs).sum(),
        _ => 0,
    }
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
