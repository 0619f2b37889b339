//! Response envelopes.

use stackless_codec::{from_cbor, to_canonical_cbor, CodecError, Value};

use crate::code::ErrorCode;
use crate::delta::EntitySnapshot;
use crate::error::ProtocolResult;
use crate::fields::{Fields, Record};
use crate::push::PushMessage;
use crate::request::RequestKind;
use crate::wire::WireValue;

/// One line of server-side console output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Logged text.
    pub message: String,
    /// Whether it was logged as an error.
    pub error: bool,
}

/// Console output captured while the server ran user code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleLog {
    /// Entries in logging order.
    pub entries: Vec<LogEntry>,
}

impl ConsoleLog {
    fn to_cbor(&self) -> Value {
        Record::new()
            .list("entries", &self.entries, |e| {
                Record::new()
                    .field("message", e.message.as_str())
                    .field("error", e.error)
                    .build()
            })
            .build()
    }

    fn from_cbor(value: &Value) -> ProtocolResult<Self> {
        let fields = Fields::of("ConsoleLog", value)?;
        let entries = fields
            .list("entries")?
            .iter()
            .map(|item| -> ProtocolResult<LogEntry> {
                let entry = Fields::of("LogEntry", item)?;
                Ok(LogEntry {
                    message: entry.text("message")?,
                    error: entry.bool("error")?,
                })
            })
            .collect::<ProtocolResult<_>>()?;
        Ok(Self { entries })
    }
}

/// Typed success payload, one shape per request kind.
#[derive(Debug, Clone, PartialEq)]
pub enum OkPayload {
    /// Fetched entity state.
    GetEntity {
        /// Full state of the requested entity and of entities nested in it.
        entities: Vec<EntitySnapshot>,
    },
    /// Save acknowledged.
    SaveEntities,
    /// Method returned.
    CallMethod {
        /// Return value.
        return_value: WireValue,
    },
    /// Event subscription acknowledged.
    SubscribeEvent,
    /// Event unsubscription acknowledged.
    UnsubscribeEvent,
    /// Update subscription acknowledged.
    SubscribeUpdates,
    /// Update unsubscription acknowledged.
    UnsubscribeUpdates,
}

impl OkPayload {
    /// Request kind this payload answers.
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::GetEntity { .. } => RequestKind::GetEntity,
            Self::SaveEntities => RequestKind::SaveEntities,
            Self::CallMethod { .. } => RequestKind::CallMethod,
            Self::SubscribeEvent => RequestKind::SubscribeEvent,
            Self::UnsubscribeEvent => RequestKind::UnsubscribeEvent,
            Self::SubscribeUpdates => RequestKind::SubscribeUpdates,
            Self::UnsubscribeUpdates => RequestKind::UnsubscribeUpdates,
        }
    }
}

/// Primary outcome of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Platform failure.
    ErrorCode(ErrorCode),
    /// Server-executed user code threw.
    Exception {
        /// Exception message.
        message: String,
        /// Stack trace, when available.
        stack: Option<String>,
    },
    /// Success.
    Ok(OkPayload),
}

/// A complete response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    /// Optional diagnostic log.
    pub console_log: Option<ConsoleLog>,
    /// Outcome.
    pub body: ResponseBody,
    /// Companion push-style messages bundled with a success.
    pub messages: Vec<PushMessage>,
}

impl ResponseEnvelope {
    /// Success response without companions.
    pub fn ok(payload: OkPayload) -> Self {
        Self {
            console_log: None,
            body: ResponseBody::Ok(payload),
            messages: Vec::new(),
        }
    }

    /// Platform failure response.
    pub fn error(code: ErrorCode) -> Self {
        Self {
            console_log: None,
            body: ResponseBody::ErrorCode(code),
            messages: Vec::new(),
        }
    }

    /// User-code exception response.
    pub fn exception(message: impl Into<String>, stack: Option<String>) -> Self {
        Self {
            console_log: None,
            body: ResponseBody::Exception {
                message: message.into(),
                stack,
            },
            messages: Vec::new(),
        }
    }

    /// Attaches companion messages.
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<PushMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Attaches a console log.
    #[must_use]
    pub fn with_console_log(mut self, log: ConsoleLog) -> Self {
        self.console_log = Some(log);
        self
    }

    /// Encodes to CBOR.
    ///
    /// # Errors
    ///
    /// Fails only if the CBOR encoder rejects the record.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let body = match &self.body {
            ResponseBody::ErrorCode(code) => Record::new()
                .field("status", "error_code")
                .field("code", code.as_u32()),
            ResponseBody::Exception { message, stack } => Record::new()
                .field("status", "exception")
                .field("message", message.as_str())
                .opt("stack", stack.as_deref()),
            ResponseBody::Ok(payload) => {
                let record = Record::new()
                    .field("status", "ok")
                    .field("kind", payload.kind().tag());
                match payload {
                    OkPayload::GetEntity { entities } => {
                        record.list("entities", entities, EntitySnapshot::to_cbor)
                    }
                    OkPayload::CallMethod { return_value } => {
                        record.field("return_value", return_value.to_cbor())
                    }
                    _ => record,
                }
            }
        };
        let record = Record::new()
            .opt("console_log", self.console_log.as_ref().map(ConsoleLog::to_cbor))
            .field("body", body.build())
            .list("messages", &self.messages, PushMessage::to_cbor)
            .build();
        Ok(to_canonical_cbor(&record)?)
    }

    /// Decodes from CBOR.
    ///
    /// # Errors
    ///
    /// Fails on malformed records or unknown tags.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let value = from_cbor(bytes)?;
        let fields = Fields::of("ResponseEnvelope", &value)?;

        let console_log = match fields.get("console_log") {
            None | Some(Value::Null) => None,
            Some(log) => Some(ConsoleLog::from_cbor(log)?),
        };

        let body = Fields::of("ResponseBody", fields.require("body")?)?;
        let body = match body.text("status")?.as_str() {
            "error_code" => ResponseBody::ErrorCode(ErrorCode::from_u32(body.u32("code")?)),
            "exception" => ResponseBody::Exception {
                message: body.text("message")?,
                stack: body.opt_text("stack"),
            },
            "ok" => ResponseBody::Ok(match RequestKind::from_tag(body.u64("kind")?)? {
                RequestKind::GetEntity => OkPayload::GetEntity {
                    entities: body
                        .list("entities")?
                        .iter()
                        .map(EntitySnapshot::from_cbor)
                        .collect::<ProtocolResult<_>>()?,
                },
                RequestKind::SaveEntities => OkPayload::SaveEntities,
                RequestKind::CallMethod => OkPayload::CallMethod {
                    return_value: WireValue::from_cbor(body.require("return_value")?)?,
                },
                RequestKind::SubscribeEvent => OkPayload::SubscribeEvent,
                RequestKind::UnsubscribeEvent => OkPayload::UnsubscribeEvent,
                RequestKind::SubscribeUpdates => OkPayload::SubscribeUpdates,
                RequestKind::UnsubscribeUpdates => OkPayload::UnsubscribeUpdates,
            }),
            other => {
                return Err(CodecError::invalid_structure(format!(
                    "ResponseBody: unknown status '{other}'"
                ))
                .into())
            }
        };

        Ok(Self {
            console_log,
            body,
            messages: PushMessage::list_from_cbor(fields.list("messages")?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::EntityDelta;

    #[test]
    fn error_code_response() {
        let response = ResponseEnvelope::error(ErrorCode::DatastoreObjectNotFound);
        let decoded = ResponseEnvelope::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded.body, ResponseBody::ErrorCode(ErrorCode::DatastoreObjectNotFound));
        assert!(decoded.console_log.is_none());
    }

    #[test]
    fn exception_response_keeps_stack() {
        let response = ResponseEnvelope::exception("boom", Some("at line 1".into()));
        assert_eq!(ResponseEnvelope::decode(&response.encode().unwrap()).unwrap(), response);

        let bare = ResponseEnvelope::exception("boom", None);
        assert_eq!(ResponseEnvelope::decode(&bare.encode().unwrap()).unwrap(), bare);
    }

    #[test]
    fn call_response_with_log_and_companions() {
        let response = ResponseEnvelope::ok(OkPayload::CallMethod {
            return_value: WireValue::String("done".into()),
        })
        .with_console_log(ConsoleLog {
            entries: vec![
                LogEntry {
                    message: "hello".into(),
                    error: false,
                },
                LogEntry {
                    message: "bad".into(),
                    error: true,
                },
            ],
        })
        .with_messages(vec![PushMessage::EntityUpdate {
            deltas: vec![EntityDelta {
                class_id: 1,
                primary_key: "a".into(),
                version: 2,
                properties: Vec::new(),
                deleted_properties: Vec::new(),
                deleted: true,
            }],
        }]);
        assert_eq!(ResponseEnvelope::decode(&response.encode().unwrap()).unwrap(), response);
    }

    #[test]
    fn fetch_response_carries_nested_snapshots() {
        let snapshot = |pk: &str| EntitySnapshot {
            class_id: 1,
            primary_key: pk.into(),
            version: 3,
            properties: Vec::new(),
            deleted: false,
        };
        let response = ResponseEnvelope::ok(OkPayload::GetEntity {
            entities: vec![snapshot("a"), snapshot("b")],
        });
        assert_eq!(ResponseEnvelope::decode(&response.encode().unwrap()).unwrap(), response);
    }

    #[test]
    fn unknown_codes_survive() {
        let response = ResponseEnvelope::error(ErrorCode::Unknown(999));
        let decoded = ResponseEnvelope::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded.body, ResponseBody::ErrorCode(ErrorCode::Unknown(999)));
    }
}
