//! Client error types for the Feedlink client.
//!
//! This module provides the [`ClientError`] enum which represents all
//! errors surfaced by the client, from bad arguments to server protocol
//! violations.
//!
//! Errors are cheaply cloneable: the same error instance is frequently
//! delivered to several pending callers when a connection is torn down, and
//! cloned again into the client event stream.

use feedlink_core::delta::DeltaError;
use feedlink_core::validation::SchemaViolation;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A fault reported by the transport, shared across error clones.
pub type SharedTransportFault = Arc<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the Feedlink client.
///
/// # Example
///
/// ```rust
/// use feedlink_client::ClientError;
///
/// fn handle_error(err: ClientError) {
///     match err {
///         ClientError::Connection { message, .. } => {
///             eprintln!("connection problem: {}", message);
///         }
///         ClientError::Rejection { code, .. } => {
///             eprintln!("server said no: {}", code);
///         }
///         _ => eprintln!("error: {}", err),
///     }
/// }
/// ```
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// A library method received invalid input.
    #[error("invalid argument: {message}")]
    Argument {
        /// What was wrong with the input.
        message: String,
    },

    /// A library method was called in the wrong state.
    #[error("invalid state: {message}")]
    State {
        /// Which state requirement was violated.
        message: String,
    },

    // =========================================================================
    // Transport and Connection Errors
    // =========================================================================
    /// The transport violated its contract; the client instance is dead.
    #[error("transport violated its contract: {message}")]
    Transport {
        /// Description of the violation.
        message: String,
        /// The value the transport failed with, if it failed with one.
        fault: Option<SharedTransportFault>,
    },

    /// The connection was lost or could not be established.
    #[error("{message}")]
    Connection {
        /// Description of the failure.
        message: String,
        /// The underlying transport fault, when one caused this.
        fault: Option<SharedTransportFault>,
    },

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// The server rejected every offered protocol version.
    #[error("the server rejected the offered protocol version")]
    Handshake,

    /// The server sent a malformed or unexpected message.
    #[error("invalid server message: {violation}")]
    ServerMessage {
        /// How the message deviated from the protocol.
        violation: ServerMessageViolation,
        /// The offending message as received.
        server_message: RawServerMessage,
    },

    /// The server did not respond within the configured window.
    #[error("no server response within {timeout:?}")]
    ResponseTimeout {
        /// The configured response window.
        timeout: Duration,
        /// The client message that went unanswered.
        request: Arc<Value>,
    },

    /// The server reported a client protocol violation.
    #[error("the server reported a protocol violation")]
    ViolationResponse {
        /// Server-supplied diagnostics.
        diagnostics: Arc<Value>,
    },

    /// The server returned failure for an action or feed open.
    #[error("the server rejected the request: {code}")]
    Rejection {
        /// Machine-readable error code from the server.
        code: String,
        /// Error details from the server.
        data: Arc<Value>,
    },

    /// The server terminated an open feed.
    #[error("the server terminated the feed: {code}")]
    Termination {
        /// Machine-readable error code from the server.
        code: String,
        /// Error details from the server.
        data: Arc<Value>,
    },
}

/// How a server message deviated from the protocol.
#[derive(Debug, Clone)]
pub enum ServerMessageViolation {
    /// The message was not valid JSON.
    Parse {
        /// The parser's description of the failure.
        detail: String,
    },
    /// The message did not match the server-message schema.
    Schema(SchemaViolation),
    /// A feed delta could not be applied.
    Delta(DeltaError),
    /// The post-delta feed data did not match the advertised hash.
    FeedIntegrity {
        /// The hash the server advertised.
        expected: String,
        /// The hash of the data the deltas produced.
        computed: String,
    },
    /// The message was well-formed but not valid in the current state.
    Unexpected {
        /// Why the message was unexpected.
        detail: String,
    },
}

impl fmt::Display for ServerMessageViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessageViolation::Parse { detail } => write!(f, "not valid JSON: {}", detail),
            ServerMessageViolation::Schema(violation) => write!(f, "{}", violation),
            ServerMessageViolation::Delta(error) => write!(f, "bad feed delta: {}", error),
            ServerMessageViolation::FeedIntegrity { expected, computed } => write!(
                f,
                "feed data hash mismatch: server advertised {}, client computed {}",
                expected, computed
            ),
            ServerMessageViolation::Unexpected { detail } => write!(f, "unexpected: {}", detail),
        }
    }
}

/// The offending server message attached to a [`ClientError::ServerMessage`].
#[derive(Debug, Clone)]
pub enum RawServerMessage {
    /// The raw frame, kept when it could not be parsed as JSON.
    Text(Arc<str>),
    /// The parsed message.
    Json(Arc<Value>),
}

impl ClientError {
    /// Creates a new argument error.
    pub fn argument(message: impl Into<String>) -> Self {
        ClientError::Argument {
            message: message.into(),
        }
    }

    /// Creates a new state error.
    pub fn state(message: impl Into<String>) -> Self {
        ClientError::State {
            message: message.into(),
        }
    }

    /// Creates a new transport contract error.
    pub fn transport(message: impl Into<String>, fault: Option<SharedTransportFault>) -> Self {
        ClientError::Transport {
            message: message.into(),
            fault,
        }
    }

    /// Creates a new connection error.
    pub fn connection(message: impl Into<String>, fault: Option<SharedTransportFault>) -> Self {
        ClientError::Connection {
            message: message.into(),
            fault,
        }
    }

    /// The connection error delivered to pending work when the conversation
    /// ends before a response arrives.
    pub(crate) fn connection_lost() -> Self {
        ClientError::connection("the connection was lost", None)
    }

    /// Returns true if this error means the client instance is unusable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientError::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_argument_display() {
        let err = ClientError::argument("action args must be an object");
        assert_eq!(
            err.to_string(),
            "invalid argument: action args must be an object"
        );
    }

    #[test]
    fn test_state_display() {
        let err = ClientError::state("not connected");
        assert_eq!(err.to_string(), "invalid state: not connected");
    }

    #[test]
    fn test_connection_display() {
        let err = ClientError::connection("could not connect", None);
        assert_eq!(err.to_string(), "could not connect");
    }

    #[test]
    fn test_rejection_display() {
        let err = ClientError::Rejection {
            code: "DENIED".to_string(),
            data: Arc::new(json!({})),
        };
        assert_eq!(err.to_string(), "the server rejected the request: DENIED");
    }

    #[test]
    fn test_server_message_display() {
        let err = ClientError::ServerMessage {
            violation: ServerMessageViolation::Unexpected {
                detail: "duplicate HandshakeResponse".to_string(),
            },
            server_message: RawServerMessage::Json(Arc::new(json!({}))),
        };
        assert_eq!(
            err.to_string(),
            "invalid server message: unexpected: duplicate HandshakeResponse"
        );
    }

    #[test]
    fn test_is_terminal() {
        assert!(ClientError::transport("boom", None).is_terminal());
        assert!(!ClientError::connection_lost().is_terminal());
        assert!(!ClientError::Handshake.is_terminal());
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = ClientError::ResponseTimeout {
            timeout: Duration::from_secs(10),
            request: Arc::new(json!({"MessageType": "Action"})),
        };
        let clone = err.clone();
        assert_eq!(err.to_string(), clone.to_string());
    }
}
