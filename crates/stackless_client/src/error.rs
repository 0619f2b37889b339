//! Error types for the client runtime.

use stackless_codec::CodecError;
use stackless_core::CoreError;
use stackless_protocol::{ErrorCode, ProtocolError};
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network or socket failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection is not open; nothing was sent.
    #[error("not connected to server")]
    NotConnected,

    /// The connection closed while the request was pending.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Close reason.
        reason: String,
    },

    /// No response arrived within the configured request timeout.
    #[error("request timed out")]
    Timeout,

    /// The server broke the protocol (unexpected payload, companion messages
    /// where none are allowed, and so on).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A wire record failed to build or parse.
    #[error("wire error: {0}")]
    Wire(#[from] ProtocolError),

    /// The CBOR layer failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The namespace version changed on the server; the client must be regenerated.
    #[error("the client for {namespace} is out of date and must be regenerated")]
    StaleClient {
        /// Name of the expected namespace.
        namespace: String,
    },

    /// A message arrived for another known namespace.
    #[error("received {what} destined for {target} while {expected} was expected")]
    Misrouted {
        /// Kind of message.
        what: &'static str,
        /// Expected namespace name.
        expected: String,
        /// Namespace the message targets.
        target: String,
    },

    /// A message arrived for a namespace this client never registered.
    #[error("received {what} destined for unknown namespace {target}")]
    UnexpectedMessage {
        /// Kind of message.
        what: &'static str,
        /// Raw namespace of the message.
        target: String,
    },

    /// The platform reported an error code.
    #[error("platform error {code}")]
    Platform {
        /// Reported code.
        code: ErrorCode,
    },

    /// Server-executed user code threw.
    #[error("user code exception: {message}")]
    UserCode {
        /// Exception message.
        message: String,
        /// Stack trace, when the server sent one.
        stack: Option<String>,
    },

    /// Local model error (unknown class, duplicate entity, ...).
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ClientError {
    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Returns true for failures of the connection itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::NotConnected | Self::ConnectionClosed { .. } | Self::Timeout
        )
    }

    /// Returns true if the connection that produced this error cannot be reused.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::NotConnected
                | Self::ConnectionClosed { .. }
                | Self::StaleClient { .. }
                | Self::Misrouted { .. }
                | Self::UnexpectedMessage { .. }
        )
    }

    /// The platform code, if this is a platform error.
    pub fn platform_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Platform { code } => Some(*code),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
