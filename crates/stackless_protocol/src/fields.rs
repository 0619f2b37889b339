//! Field access for CBOR map records.
//!
//! Every wire record is a CBOR map keyed by text. [`Fields`] reads one,
//! naming the record and field in errors; [`Record`] builds one.

use stackless_codec::{CodecError, CodecResult, Value};

/// Read view over a decoded record.
#[derive(Clone, Copy)]
pub(crate) struct Fields<'a> {
    record: &'static str,
    pairs: &'a [(Value, Value)],
}

impl<'a> Fields<'a> {
    pub(crate) fn of(record: &'static str, value: &'a Value) -> CodecResult<Self> {
        let pairs = value
            .as_map()
            .ok_or_else(|| CodecError::invalid_structure(format!("{record}: expected map")))?;
        Ok(Self { record, pairs })
    }

    pub(crate) fn get(&self, name: &str) -> Option<&'a Value> {
        self.pairs
            .iter()
            .find(|(k, _)| k.as_text() == Some(name))
            .map(|(_, v)| v)
    }

    fn missing(&self, name: &str) -> CodecError {
        CodecError::missing_field(self.record, name)
    }

    pub(crate) fn require(&self, name: &str) -> CodecResult<&'a Value> {
        self.get(name).ok_or_else(|| self.missing(name))
    }

    pub(crate) fn u64(&self, name: &str) -> CodecResult<u64> {
        self.get(name)
            .and_then(Value::as_u64)
            .ok_or_else(|| self.missing(name))
    }

    pub(crate) fn u32(&self, name: &str) -> CodecResult<u32> {
        self.get(name)
            .and_then(Value::as_u32)
            .ok_or_else(|| self.missing(name))
    }

    pub(crate) fn float(&self, name: &str) -> CodecResult<f64> {
        self.get(name)
            .and_then(Value::as_float)
            .ok_or_else(|| self.missing(name))
    }

    pub(crate) fn text(&self, name: &str) -> CodecResult<String> {
        self.get(name)
            .and_then(Value::as_text)
            .map(str::to_string)
            .ok_or_else(|| self.missing(name))
    }

    pub(crate) fn bool(&self, name: &str) -> CodecResult<bool> {
        self.get(name)
            .and_then(Value::as_bool)
            .ok_or_else(|| self.missing(name))
    }

    pub(crate) fn opt_text(&self, name: &str) -> Option<String> {
        self.get(name).and_then(Value::as_text).map(str::to_string)
    }

    /// Absent lists read as empty; a present field must be an array.
    pub(crate) fn list(&self, name: &str) -> CodecResult<&'a [Value]> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(&[]),
            Some(value) => value.as_array().ok_or_else(|| self.missing(name)),
        }
    }

    pub(crate) fn text_list(&self, name: &str) -> CodecResult<Vec<String>> {
        self.list(name)?
            .iter()
            .map(|v| v.as_text().map(str::to_string).ok_or_else(|| self.missing(name)))
            .collect()
    }
}

/// Builder for an outgoing record.
#[derive(Default)]
pub(crate) struct Record(Vec<(Value, Value)>);

impl Record {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.push((Value::Text(name.to_string()), value.into()));
        self
    }

    pub(crate) fn opt(self, name: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.field(name, value),
            None => self,
        }
    }

    pub(crate) fn list<T>(self, name: &str, items: &[T], f: impl Fn(&T) -> Value) -> Self {
        let items = items.iter().map(f).collect::<Vec<_>>();
        self.field(name, Value::Array(items))
    }

    pub(crate) fn build(self) -> Value {
        Value::map(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_names_record_and_field() {
        let value = Record::new().field("a", 1u64).build();
        let fields = Fields::of("Thing", &value).unwrap();
        assert_eq!(fields.u64("a").unwrap(), 1);
        let err = fields.text("b").unwrap_err();
        assert!(err.to_string().contains("Thing"));
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn absent_list_is_empty() {
        let value = Record::new().build();
        let fields = Fields::of("Thing", &value).unwrap();
        assert!(fields.list("items").unwrap().is_empty());
    }

    #[test]
    fn mistyped_list_is_an_error() {
        let value = Record::new().field("items", "nope").build();
        let fields = Fields::of("Thing", &value).unwrap();
        assert!(fields.list("items").is_err());
    }

    #[test]
    fn non_map_is_rejected() {
        assert!(Fields::of("Thing", &Value::Null).is_err());
    }
}
