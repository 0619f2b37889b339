//! Protocol client: typed requests over the connection pool.
//!
//! Every request carries the target namespace key. A response is classified
//! as a platform error, a user-code exception or a typed success; a success
//! of the wrong kind, or one carrying companion messages where the request
//! kind allows none, is a protocol error.

use std::sync::Arc;

use stackless_core::{Catalog, NamespaceKey};
use stackless_protocol::{
    ConsoleLog, OkPayload, PushFrame, PushMessage, RequestBody, RequestEnvelope, RequestKind,
    ResponseBody, ResponseEnvelope,
};
use tracing::{debug, error, info};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::pool::ConnectionPool;

/// Placeholder for an exception without a message.
const EMPTY: &str = "<empty>";

/// Typed success of one request.
#[derive(Debug)]
pub struct Reply {
    /// Success payload, matching the request kind.
    pub payload: OkPayload,
    /// Companion messages, in server order.
    pub messages: Vec<PushMessage>,
}

/// Whether a request kind may carry companion messages in its response.
pub fn accepts_messages(kind: RequestKind) -> bool {
    matches!(kind, RequestKind::SaveEntities | RequestKind::CallMethod)
}

/// Builds, sends and classifies requests.
pub struct ProtocolClient {
    catalog: Arc<Catalog>,
    pool: ConnectionPool,
    config: ClientConfig,
}

impl ProtocolClient {
    /// Creates a protocol client over `pool`.
    pub fn new(catalog: Arc<Catalog>, pool: ConnectionPool, config: ClientConfig) -> Self {
        Self {
            catalog,
            pool,
            config,
        }
    }

    /// Connection pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Sends one request and waits for its typed success.
    ///
    /// # Errors
    ///
    /// Transport failures, undecodable responses, platform error codes,
    /// user-code exceptions and protocol violations.
    pub async fn request(
        &self,
        log_context: &str,
        namespace: NamespaceKey,
        body: RequestBody,
    ) -> ClientResult<Reply> {
        let info = self.catalog.require_namespace(namespace)?;
        let envelope = RequestEnvelope::new(log_context, namespace, body);
        let kind = envelope.kind();
        let bytes = envelope.encode()?;

        if self.config.message_tracing {
            debug!(log_context = %log_context, namespace = %info.name, kind = ?kind, "sending request");
        }
        let connection = self.pool.connection(&info).await?;
        let raw = connection.send(&bytes).await?;
        let response = ResponseEnvelope::decode(&raw)?;

        if let Some(log) = &response.console_log {
            self.emit_console_log(&info.name, log);
        }
        if self.config.message_tracing {
            trace_response(log_context, kind, &response);
        }
        classify(kind, response)
    }

    /// Re-emits server console output locally.
    fn emit_console_log(&self, namespace: &str, log: &ConsoleLog) {
        let header = &self.config.debug_log_header;
        for entry in &log.entries {
            if entry.error {
                error!("{header}<<warp://{namespace}>> {}", entry.message);
            } else {
                info!("{header}<<warp://{namespace}>> {}", entry.message);
            }
        }
    }

    /// Checks that a push frame targets `expected`.
    ///
    /// # Errors
    ///
    /// [`ClientError::StaleClient`] when only the version differs,
    /// [`ClientError::Misrouted`] when the frame targets another known
    /// namespace, [`ClientError::UnexpectedMessage`] when the id is unknown.
    pub fn validate_push_target(&self, expected: NamespaceKey, frame: &PushFrame) -> ClientResult<()> {
        let what = if frame.message.is_event() {
            "an event"
        } else {
            "an entity update"
        };
        validate_namespace_target(
            &self.catalog,
            expected,
            frame.namespace_id,
            frame.namespace_version,
            what,
        )
    }
}

fn trace_response(log_context: &str, kind: RequestKind, response: &ResponseEnvelope) {
    match &response.body {
        ResponseBody::Ok(_) => debug!(
            log_context = %log_context,
            kind = ?kind,
            messages = response.messages.len(),
            "received ok"
        ),
        ResponseBody::ErrorCode(code) => {
            error!(log_context = %log_context, kind = ?kind, code = %code, "received platform error");
        }
        ResponseBody::Exception { message, stack } => error!(
            log_context = %log_context,
            kind = ?kind,
            message = %message,
            stack = stack.as_deref().unwrap_or(EMPTY),
            "received user code exception"
        ),
    }
}

fn classify(kind: RequestKind, response: ResponseEnvelope) -> ClientResult<Reply> {
    match response.body {
        ResponseBody::ErrorCode(code) => Err(ClientError::Platform { code }),
        ResponseBody::Exception { message, stack } => Err(ClientError::UserCode {
            message: if message.is_empty() {
                EMPTY.to_string()
            } else {
                message
            },
            stack,
        }),
        ResponseBody::Ok(payload) => {
            if payload.kind() != kind {
                return Err(ClientError::protocol(format!(
                    "expected a {kind:?} response but received {:?}",
                    payload.kind()
                )));
            }
            if !response.messages.is_empty() && !accepts_messages(kind) {
                return Err(ClientError::protocol(format!(
                    "{kind:?} response unexpectedly carried {} messages",
                    response.messages.len()
                )));
            }
            Ok(Reply {
                payload,
                messages: response.messages,
            })
        }
    }
}

/// Classifies where a message targeting namespace `(id, version)` belongs,
/// relative to `expected`.
///
/// # Errors
///
/// See [`ProtocolClient::validate_push_target`].
pub fn validate_namespace_target(
    catalog: &Catalog,
    expected: NamespaceKey,
    id: u64,
    version: u64,
    what: &'static str,
) -> ClientResult<()> {
    if expected.id() == id {
        if expected.version() == version {
            return Ok(());
        }
        return Err(ClientError::StaleClient {
            namespace: catalog.name_of(expected),
        });
    }
    match catalog.namespace_by_id(id) {
        None => Err(ClientError::UnexpectedMessage {
            what,
            target: format!("{id}:{version}"),
        }),
        Some(other) if other.key.version() == version => Err(ClientError::Misrouted {
            what,
            expected: catalog.name_of(expected),
            target: other.name,
        }),
        Some(other) => Err(ClientError::Misrouted {
            what,
            expected: catalog.name_of(expected),
            target: format!("{} (version {version})", other.name),
        }),
    }
}
