//! Native values carried in entity properties, method arguments and events.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::entity::Entity;
use crate::keys::{EntityKey, ServiceKey};

/// A dynamically typed property value.
///
/// `Unresolved` only appears transiently: decoding yields it for entity
/// references, and the tracker swaps it for `Entity` (or `Null`) before any
/// application code sees the value.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absent value, distinct from null.
    Undefined,
    /// Null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Double-precision number.
    Number(f64),
    /// UTF-8 string.
    String(String),
    /// Point in time, millisecond precision on the wire.
    Date(DateTime<Utc>),
    /// Plain object keyed by property name.
    Object(BTreeMap<String, Value>),
    /// Ordered array; holes are `Undefined`.
    Array(Vec<Value>),
    /// Ordered key/value pairs; either side may be a reference.
    Map(Vec<(Value, Value)>),
    /// Ordered set of values.
    Set(Vec<Value>),
    /// Reference to a local entity instance.
    Entity(Entity),
    /// Reference to a service proxy.
    Service(Service),
    /// Entity reference awaiting resolution.
    Unresolved(EntityKey),
}

impl Value {
    /// Short name of the variant, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Set(_) => "set",
            Self::Entity(_) => "entity",
            Self::Service(_) => "service",
            Self::Unresolved(_) => "unresolved reference",
        }
    }

    /// Whether this is `Undefined`.
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Whether this is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Boolean content.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric content.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String content.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Date content.
    #[must_use]
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Referenced entity.
    #[must_use]
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Self::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Referenced service.
    #[must_use]
    pub fn as_service(&self) -> Option<&Service> {
        match self {
            Self::Service(s) => Some(s),
            _ => None,
        }
    }

    /// Array elements.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Object fields.
    #[must_use]
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Looks up an object field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.as_object().and_then(|o| o.get(name))
    }

    /// Distinct unresolved references, in first-encounter order.
    #[must_use]
    pub fn unresolved_keys(&self) -> Vec<EntityKey> {
        let mut keys = Vec::new();
        self.visit(&mut |value| {
            if let Self::Unresolved(key) = value {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        });
        keys
    }

    /// Whether any unresolved reference remains.
    #[must_use]
    pub fn has_unresolved(&self) -> bool {
        let mut found = false;
        self.visit(&mut |value| found |= matches!(value, Self::Unresolved(_)));
        found
    }

    /// Calls `f` for every entity referenced anywhere inside this value.
    pub fn for_each_entity(&self, f: &mut impl FnMut(&Entity)) {
        self.visit(&mut |value| {
            if let Self::Entity(entity) = value {
                f(entity);
            }
        });
    }

    /// Replaces every unresolved reference with the looked-up entity, or
    /// `Null` when the lookup has nothing.
    pub fn resolve_with(&mut self, lookup: &impl Fn(&EntityKey) -> Option<Entity>) {
        match self {
            Self::Unresolved(key) => {
                *self = lookup(key).map_or(Self::Null, Self::Entity);
            }
            Self::Object(fields) => fields.values_mut().for_each(|v| v.resolve_with(lookup)),
            Self::Array(items) | Self::Set(items) => {
                items.iter_mut().for_each(|v| v.resolve_with(lookup));
            }
            Self::Map(pairs) => {
                for (k, v) in pairs {
                    k.resolve_with(lookup);
                    v.resolve_with(lookup);
                }
            }
            _ => {}
        }
    }

    /// Pre-order walk. Does not descend into entity properties.
    fn visit(&self, f: &mut impl FnMut(&Value)) {
        f(self);
        match self {
            Self::Object(fields) => fields.values().for_each(|v| v.visit(f)),
            Self::Array(items) | Self::Set(items) => items.iter().for_each(|v| v.visit(f)),
            Self::Map(pairs) => {
                for (k, v) in pairs {
                    k.visit(f);
                    v.visit(f);
                }
            }
            _ => {}
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Array(a), Self::Array(b)) | (Self::Set(a), Self::Set(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Entity(a), Self::Entity(b)) => a.ptr_eq(b),
            (Self::Service(a), Self::Service(b)) => a == b,
            (Self::Unresolved(a), Self::Unresolved(b)) => a == b,
            _ => false,
        }
    }
}

/// Stateless proxy for a remote service object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Service {
    key: ServiceKey,
}

impl Service {
    /// Creates a proxy. No network traffic is involved.
    #[must_use]
    pub fn new(key: ServiceKey) -> Self {
        Self { key }
    }

    /// Returns the service address.
    #[must_use]
    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    /// Returns the primary key.
    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.key.primary_key
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Date(d)
    }
}

impl From<Entity> for Value {
    fn from(e: Entity) -> Self {
        Self::Entity(e)
    }
}

impl From<Service> for Value {
    fn from(s: Service) -> Self {
        Self::Service(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self::Object(fields)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
