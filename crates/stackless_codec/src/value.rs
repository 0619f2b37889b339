//! Dynamic CBOR value type.

use std::cmp::Ordering;

/// Smallest integer representable by CBOR major type 1.
pub const CBOR_INT_MIN: i128 = -(1i128 << 64);

/// Largest integer representable by CBOR major type 0.
pub const CBOR_INT_MAX: i128 = u64::MAX as i128;

/// A dynamic CBOR value.
///
/// Integers cover the whole CBOR range (`-2^64 ..= 2^64 - 1`) so that
/// unsigned 64-bit counters survive a round trip without precision loss.
/// Floats are always carried as IEEE 754 double precision.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer in the CBOR range.
    Integer(i128),
    /// Double-precision float.
    Float(f64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Text string (UTF-8).
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Map of key-value pairs (keys are sorted for canonical encoding).
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Create a map value with sorted keys.
    ///
    /// Keys are sorted by their canonical CBOR encoding (length-first, then bytewise).
    pub fn map(mut pairs: Vec<(Value, Value)>) -> Self {
        pairs.sort_by(|a, b| a.0.cmp_canonical(&b.0));
        Value::Map(pairs)
    }

    /// Create a map value from text keys.
    pub fn text_map<'a>(pairs: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        Self::map(
            pairs
                .into_iter()
                .map(|(k, v)| (Value::Text(k.to_string()), v))
                .collect(),
        )
    }

    /// Compare two values for canonical ordering.
    ///
    /// Mirrors the bytewise comparison of canonical CBOR encodings, which is
    /// what map key sorting requires.
    pub fn cmp_canonical(&self, other: &Self) -> Ordering {
        let self_type = self.major_type();
        let other_type = other.major_type();

        if self_type != other_type {
            return self_type.cmp(&other_type);
        }

        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => {
                Self::cmp_unsigned_canonical(Self::integer_argument(*a), Self::integer_argument(*b))
            }
            (Value::Bytes(a), Value::Bytes(b)) => cmp_length_first(a, b),
            (Value::Text(a), Value::Text(b)) => cmp_length_first(a.as_bytes(), b.as_bytes()),
            (Value::Array(a), Value::Array(b)) => match a.len().cmp(&b.len()) {
                Ordering::Equal => a
                    .iter()
                    .zip(b.iter())
                    .map(|(av, bv)| av.cmp_canonical(bv))
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal),
                ord => ord,
            },
            (Value::Map(a), Value::Map(b)) => match a.len().cmp(&b.len()) {
                Ordering::Equal => a
                    .iter()
                    .zip(b.iter())
                    .map(|((ak, av), (bk, bv))| ak.cmp_canonical(bk).then_with(|| av.cmp_canonical(bv)))
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal),
                ord => ord,
            },
            // Major type 7: the initial byte decides, then the float payload.
            _ => self
                .simple_initial_byte()
                .cmp(&other.simple_initial_byte())
                .then_with(|| match (self, other) {
                    (Value::Float(a), Value::Float(b)) => a.to_bits().cmp(&b.to_bits()),
                    _ => Ordering::Equal,
                }),
        }
    }

    /// The argument CBOR writes for an integer (the value itself, or `-1 - n`).
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn integer_argument(n: i128) -> u64 {
        if n >= 0 {
            n.min(CBOR_INT_MAX) as u64
        } else {
            (-1 - n.max(CBOR_INT_MIN)) as u64
        }
    }

    /// Compare two unsigned integers by their canonical CBOR encoding.
    fn cmp_unsigned_canonical(a: u64, b: u64) -> Ordering {
        let len_a = Self::cbor_uint_encoded_len(a);
        let len_b = Self::cbor_uint_encoded_len(b);

        match len_a.cmp(&len_b) {
            Ordering::Equal => a.cmp(&b),
            ord => ord,
        }
    }

    /// Returns the encoded length (in bytes) of an unsigned integer in CBOR.
    fn cbor_uint_encoded_len(n: u64) -> usize {
        if n <= 23 {
            1
        } else if n <= 0xFF {
            2
        } else if n <= 0xFFFF {
            3
        } else if n <= 0xFFFF_FFFF {
            5
        } else {
            9
        }
    }

    fn simple_initial_byte(&self) -> u8 {
        match self {
            Value::Bool(false) => 0xf4,
            Value::Bool(true) => 0xf5,
            Value::Null => 0xf6,
            _ => 0xfb,
        }
    }

    /// Get the CBOR major type for this value.
    fn major_type(&self) -> u8 {
        match self {
            Value::Integer(n) if *n >= 0 => 0,
            Value::Integer(_) => 1,
            Value::Bytes(_) => 2,
            Value::Text(_) => 3,
            Value::Array(_) => 4,
            Value::Map(_) => 5,
            Value::Bool(_) | Value::Null | Value::Float(_) => 7,
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as an unsigned 64-bit integer, if it is one and fits.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_integer().and_then(|n| u64::try_from(n).ok())
    }

    /// Get this value as an unsigned 32-bit integer, if it is one and fits.
    pub fn as_u32(&self) -> Option<u32> {
        self.as_integer().and_then(|n| u32::try_from(n).ok())
    }

    /// Get this value as a float.
    ///
    /// Integers are widened so that peers which shorten integral doubles
    /// still decode.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a text key in this map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_text() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

fn cmp_length_first(a: &[u8], b: &[u8]) -> Ordering {
    match a.len().cmp(&b.len()) {
        Ordering::Equal => a.cmp(b),
        ord => ord,
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(i128::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Integer(i128::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i128::from(n))
    }
}

impl From<u16> for Value {
    fn from(n: u16) -> Self {
        Value::Integer(i128::from(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_keys_are_sorted_length_first() {
        let map = Value::map(vec![
            (Value::Text("abc".to_string()), Value::Integer(1)),
            (Value::Text("z".to_string()), Value::Integer(2)),
            (Value::Text("ab".to_string()), Value::Integer(3)),
        ]);

        let pairs = map.as_map().unwrap();
        assert_eq!(pairs[0].0, Value::Text("z".to_string()));
        assert_eq!(pairs[1].0, Value::Text("ab".to_string()));
        assert_eq!(pairs[2].0, Value::Text("abc".to_string()));
    }

    #[test]
    fn integer_ordering_covers_u64_range() {
        let mut values = vec![
            Value::Integer(-1),
            Value::from(u64::MAX),
            Value::Integer(0),
            Value::Integer(24),
            Value::Integer(CBOR_INT_MIN),
        ];
        values.sort_by(Value::cmp_canonical);

        assert_eq!(values[0], Value::Integer(0));
        assert_eq!(values[1], Value::Integer(24));
        assert_eq!(values[2], Value::from(u64::MAX));
        assert_eq!(values[3], Value::Integer(-1));
        assert_eq!(values[4], Value::Integer(CBOR_INT_MIN));
    }

    #[test]
    fn simple_values_sort_after_containers() {
        let mut values = vec![Value::Float(1.0), Value::Null, Value::Text("a".into()), Value::Bool(true)];
        values.sort_by(Value::cmp_canonical);
        assert_eq!(values[0], Value::Text("a".into()));
        assert_eq!(values[1], Value::Bool(true));
        assert_eq!(values[2], Value::Null);
        assert_eq!(values[3], Value::Float(1.0));
    }

    #[test]
    fn numeric_accessors() {
        assert_eq!(Value::from(u64::MAX).as_u64(), Some(u64::MAX));
        assert_eq!(Value::Integer(-1).as_u64(), None);
        assert_eq!(Value::from(u64::MAX).as_u32(), None);
        assert_eq!(Value::Integer(7).as_float(), Some(7.0));
        assert_eq!(Value::Float(0.5).as_float(), Some(0.5));
        assert_eq!(Value::Text("7".into()).as_float(), None);
    }

    #[test]
    fn text_map_get() {
        let map = Value::text_map([("name", Value::from("Alice")), ("age", Value::from(30u32))]);

        assert_eq!(map.get("name"), Some(&Value::Text("Alice".to_string())));
        assert_eq!(map.get("age").and_then(Value::as_u32), Some(30));
        assert_eq!(map.get("missing"), None);
        assert_eq!(Value::Null.get("name"), None);
    }
}
