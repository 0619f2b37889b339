//! Tagged value records.
//!
//! A [`WireValue`] is the self-describing form of a native value: a map with
//! a numeric type tag `t` and, depending on the tag, a payload `v` or
//! reference fields. Entity and service references travel as class id plus
//! primary key, never as state.

use stackless_codec::Value;

use crate::error::{ProtocolError, ProtocolResult};
use crate::fields::{Fields, Record};

/// Type tag of a wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueTag {
    /// Absent value.
    Undefined = 1,
    /// Null.
    Null = 2,
    /// Boolean.
    Bool = 3,
    /// Double.
    Number = 4,
    /// UTF-8 string.
    String = 5,
    /// Plain object.
    Object = 6,
    /// Index-tagged array.
    Array = 7,
    /// Entity reference.
    EntityRef = 8,
    /// Service reference.
    ServiceRef = 9,
    /// Key/value pairs.
    Map = 10,
    /// Set.
    Set = 11,
    /// Date as epoch milliseconds.
    Date = 12,
}

impl ValueTag {
    /// Parses a tag.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownTag`] for unknown values.
    pub fn from_u64(tag: u64) -> ProtocolResult<Self> {
        Ok(match tag {
            1 => Self::Undefined,
            2 => Self::Null,
            3 => Self::Bool,
            4 => Self::Number,
            5 => Self::String,
            6 => Self::Object,
            7 => Self::Array,
            8 => Self::EntityRef,
            9 => Self::ServiceRef,
            10 => Self::Map,
            11 => Self::Set,
            12 => Self::Date,
            other => return Err(ProtocolError::unknown_tag("value", other)),
        })
    }
}

/// Class id and primary key of a referenced object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WireRef {
    /// Class id within the request's namespace.
    pub class_id: u32,
    /// Primary key.
    pub primary_key: String,
}

impl WireRef {
    /// Creates a reference.
    pub fn new(class_id: u32, primary_key: impl Into<String>) -> Self {
        Self {
            class_id,
            primary_key: primary_key.into(),
        }
    }

    pub(crate) fn to_cbor(&self) -> Value {
        Record::new()
            .field("class_id", self.class_id)
            .field("primary_key", self.primary_key.as_str())
            .build()
    }

    pub(crate) fn from_cbor(value: &Value) -> ProtocolResult<Self> {
        Self::from_fields(Fields::of("WireRef", value)?)
    }

    fn from_fields(fields: Fields<'_>) -> ProtocolResult<Self> {
        Ok(Self {
            class_id: fields.u32("class_id")?,
            primary_key: fields.text("primary_key")?,
        })
    }
}

/// Named property of an object, entity state or event.
#[derive(Debug, Clone, PartialEq)]
pub struct WireProperty {
    /// Property name.
    pub name: String,
    /// Property value.
    pub value: WireValue,
}

impl WireProperty {
    /// Creates a property.
    pub fn new(name: impl Into<String>, value: WireValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub(crate) fn to_cbor(&self) -> Value {
        Record::new()
            .field("name", self.name.as_str())
            .field("value", self.value.to_cbor())
            .build()
    }

    pub(crate) fn from_cbor(value: &Value) -> ProtocolResult<Self> {
        let fields = Fields::of("WireProperty", value)?;
        Ok(Self {
            name: fields.text("name")?,
            value: WireValue::from_cbor(fields.require("value")?)?,
        })
    }

    pub(crate) fn list_from_cbor(values: &[Value]) -> ProtocolResult<Vec<Self>> {
        values.iter().map(Self::from_cbor).collect()
    }
}

/// Array element with its index. Arrays may be sparse.
#[derive(Debug, Clone, PartialEq)]
pub struct WireElement {
    /// Position in the array.
    pub index: u32,
    /// Element value.
    pub value: WireValue,
}

/// Self-describing value record.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// Absent value.
    Undefined,
    /// Null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Double.
    Number(f64),
    /// UTF-8 string.
    String(String),
    /// Plain object.
    Object(Vec<WireProperty>),
    /// Index-tagged elements.
    Array(Vec<WireElement>),
    /// Entity reference.
    EntityRef(WireRef),
    /// Service reference.
    ServiceRef(WireRef),
    /// Key/value pairs.
    Map(Vec<(WireValue, WireValue)>),
    /// Set members.
    Set(Vec<WireValue>),
    /// Epoch milliseconds.
    Date(f64),
}

impl WireValue {
    /// Returns the type tag.
    pub fn tag(&self) -> ValueTag {
        match self {
            Self::Undefined => ValueTag::Undefined,
            Self::Null => ValueTag::Null,
            Self::Bool(_) => ValueTag::Bool,
            Self::Number(_) => ValueTag::Number,
            Self::String(_) => ValueTag::String,
            Self::Object(_) => ValueTag::Object,
            Self::Array(_) => ValueTag::Array,
            Self::EntityRef(_) => ValueTag::EntityRef,
            Self::ServiceRef(_) => ValueTag::ServiceRef,
            Self::Map(_) => ValueTag::Map,
            Self::Set(_) => ValueTag::Set,
            Self::Date(_) => ValueTag::Date,
        }
    }

    /// Converts to the CBOR record form.
    pub fn to_cbor(&self) -> Value {
        let record = Record::new().field("t", u64::from(self.tag() as u8));
        let record = match self {
            Self::Undefined | Self::Null => record,
            Self::Bool(b) => record.field("v", *b),
            Self::Number(n) | Self::Date(n) => record.field("v", *n),
            Self::String(s) => record.field("v", s.as_str()),
            Self::Object(props) => record.list("v", props, WireProperty::to_cbor),
            Self::Array(elements) => record.list("v", elements, |e| {
                Record::new()
                    .field("index", e.index)
                    .field("value", e.value.to_cbor())
                    .build()
            }),
            Self::EntityRef(r) | Self::ServiceRef(r) => record
                .field("class_id", r.class_id)
                .field("primary_key", r.primary_key.as_str()),
            Self::Map(pairs) => record.list("v", pairs, |(k, v)| {
                Record::new()
                    .field("key", k.to_cbor())
                    .field("value", v.to_cbor())
                    .build()
            }),
            Self::Set(items) => record.list("v", items, Self::to_cbor),
        };
        record.build()
    }

    /// Reads the CBOR record form.
    ///
    /// # Errors
    ///
    /// Fails on an unknown tag or a missing or mistyped payload.
    pub fn from_cbor(value: &Value) -> ProtocolResult<Self> {
        let fields = Fields::of("WireValue", value)?;
        let tag = ValueTag::from_u64(fields.u64("t")?)?;
        Ok(match tag {
            ValueTag::Undefined => Self::Undefined,
            ValueTag::Null => Self::Null,
            ValueTag::Bool => Self::Bool(fields.bool("v")?),
            ValueTag::Number => Self::Number(fields.float("v")?),
            ValueTag::Date => Self::Date(fields.float("v")?),
            ValueTag::String => Self::String(fields.text("v")?),
            ValueTag::Object => Self::Object(WireProperty::list_from_cbor(fields.list("v")?)?),
            ValueTag::Array => Self::Array(
                fields
                    .list("v")?
                    .iter()
                    .map(|item| -> ProtocolResult<WireElement> {
                        let element = Fields::of("WireElement", item)?;
                        Ok(WireElement {
                            index: element.u32("index")?,
                            value: Self::from_cbor(element.require("value")?)?,
                        })
                    })
                    .collect::<ProtocolResult<_>>()?,
            ),
            ValueTag::EntityRef => Self::EntityRef(WireRef::from_fields(fields)?),
            ValueTag::ServiceRef => Self::ServiceRef(WireRef::from_fields(fields)?),
            ValueTag::Map => Self::Map(
                fields
                    .list("v")?
                    .iter()
                    .map(|item| -> ProtocolResult<(Self, Self)> {
                        let pair = Fields::of("WireMapEntry", item)?;
                        Ok((
                            Self::from_cbor(pair.require("key")?)?,
                            Self::from_cbor(pair.require("value")?)?,
                        ))
                    })
                    .collect::<ProtocolResult<_>>()?,
            ),
            ValueTag::Set => Self::Set(
                fields
                    .list("v")?
                    .iter()
                    .map(Self::from_cbor)
                    .collect::<ProtocolResult<_>>()?,
            ),
        })
    }

    pub(crate) fn list_from_cbor(values: &[Value]) -> ProtocolResult<Vec<Self>> {
        values.iter().map(Self::from_cbor).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackless_codec::CodecError;
    use stackless_codec::{from_cbor, to_canonical_cbor};

    fn through_bytes(value: &WireValue) -> WireValue {
        let bytes = to_canonical_cbor(&value.to_cbor()).unwrap();
        WireValue::from_cbor(&from_cbor(&bytes).unwrap()).unwrap()
    }

    #[test]
    fn nested_value_survives_bytes() {
        let value = WireValue::Object(vec![
            WireProperty::new("when", WireValue::Date(1_700_000_000_000.0)),
            WireProperty::new(
                "sparse",
                WireValue::Array(vec![WireElement {
                    index: 4,
                    value: WireValue::String("x".into()),
                }]),
            ),
            WireProperty::new(
                "lookup",
                WireValue::Map(vec![(
                    WireValue::EntityRef(WireRef::new(3, "k")),
                    WireValue::ServiceRef(WireRef::new(4, "s")),
                )]),
            ),
            WireProperty::new("tags", WireValue::Set(vec![WireValue::Null, WireValue::Undefined])),
        ]);
        assert_eq!(through_bytes(&value), value);
    }

    #[test]
    fn unknown_tag_fails() {
        let record = Record::new().field("t", 99u64).build();
        assert_eq!(
            WireValue::from_cbor(&record),
            Err(ProtocolError::unknown_tag("value", 99))
        );
    }

    #[test]
    fn missing_payload_fails() {
        let record = Record::new().field("t", ValueTag::String as u64).build();
        assert!(matches!(
            WireValue::from_cbor(&record),
            Err(ProtocolError::Codec(CodecError::InvalidStructure { .. }))
        ));
    }

    #[test]
    fn integral_numbers_from_other_encoders_read_as_numbers() {
        let record = Record::new()
            .field("t", ValueTag::Number as u64)
            .field("v", 42u64)
            .build();
        assert_eq!(WireValue::from_cbor(&record).unwrap(), WireValue::Number(42.0));
    }
}
