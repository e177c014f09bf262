//! Server-message schema validation.
//!
//! Every message received from the server is validated against the embedded
//! schema in [`crate::schemas`] before it is decoded or dispatched. The
//! validator is compiled once, on first use.

use crate::schemas::SERVER_MESSAGE_SCHEMA;
use jsonschema::Validator;
use once_cell::sync::Lazy;
use serde_json::Value;
use thiserror::Error;

static SERVER_MESSAGE_VALIDATOR: Lazy<Validator> = Lazy::new(|| {
    let schema: Value =
        serde_json::from_str(SERVER_MESSAGE_SCHEMA).expect("embedded schema is valid JSON");
    jsonschema::validator_for(&schema).expect("embedded schema compiles")
});

/// A server message's deviation from the protocol schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("schema violation at {instance_path}: {detail}")]
pub struct SchemaViolation {
    /// JSON pointer to the offending location in the message.
    pub instance_path: String,
    /// Human-readable description of the violation.
    pub detail: String,
}

/// Validates a parsed server message against the protocol schema.
///
/// Returns the first violation found, if any.
///
/// # Example
///
/// ```
/// use feedlink_core::validation::validate_server_message;
/// use serde_json::json;
///
/// let ok = json!({"MessageType": "FeedCloseResponse", "FeedName": "chat", "FeedArgs": {}});
/// assert!(validate_server_message(&ok).is_ok());
///
/// let bad = json!({"MessageType": "NoSuchThing"});
/// assert!(validate_server_message(&bad).is_err());
/// ```
pub fn validate_server_message(message: &Value) -> Result<(), SchemaViolation> {
    match SERVER_MESSAGE_VALIDATOR.iter_errors(message).next() {
        None => Ok(()),
        Some(error) => Err(SchemaViolation {
            instance_path: error.instance_path.to_string(),
            detail: error.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_handshake_response() {
        let message = json!({"MessageType": "HandshakeResponse", "Success": true, "Version": "0.1"});
        assert!(validate_server_message(&message).is_ok());
    }

    #[test]
    fn test_failed_handshake_must_not_carry_version() {
        let message =
            json!({"MessageType": "HandshakeResponse", "Success": false, "Version": "0.2"});
        assert!(validate_server_message(&message).is_err());

        let message = json!({"MessageType": "HandshakeResponse", "Success": false});
        assert!(validate_server_message(&message).is_ok());
    }

    #[test]
    fn test_action_response_success_requires_data() {
        let message = json!({"MessageType": "ActionResponse", "CallbackId": "1", "Success": true});
        assert!(validate_server_message(&message).is_err());

        let message = json!({
            "MessageType": "ActionResponse",
            "CallbackId": "1",
            "Success": true,
            "ActionData": {}
        });
        assert!(validate_server_message(&message).is_ok());
    }

    #[test]
    fn test_action_response_failure_requires_error_fields() {
        let message = json!({"MessageType": "ActionResponse", "CallbackId": "1", "Success": false});
        assert!(validate_server_message(&message).is_err());

        let message = json!({
            "MessageType": "ActionResponse",
            "CallbackId": "1",
            "Success": false,
            "ErrorCode": "DENIED",
            "ErrorData": {}
        });
        assert!(validate_server_message(&message).is_ok());
    }

    #[test]
    fn test_feed_args_must_be_string_valued() {
        let message = json!({
            "MessageType": "FeedCloseResponse",
            "FeedName": "chat",
            "FeedArgs": {"room": 7}
        });
        assert!(validate_server_message(&message).is_err());
    }

    #[test]
    fn test_feed_action_with_deltas_and_hash() {
        let message = json!({
            "MessageType": "FeedAction",
            "FeedName": "chat",
            "FeedArgs": {"room": "a"},
            "ActionName": "post",
            "ActionData": {},
            "FeedDeltas": [{"Operation": "Toggle", "Path": ["flag"]}],
            "FeedMd5": "mZFLkyvTelC5g8XnyQrpOw=="
        });
        assert!(validate_server_message(&message).is_ok());
    }

    #[test]
    fn test_feed_action_rejects_unknown_operation() {
        let message = json!({
            "MessageType": "FeedAction",
            "FeedName": "chat",
            "FeedArgs": {},
            "ActionName": "post",
            "ActionData": {},
            "FeedDeltas": [{"Operation": "Explode", "Path": []}]
        });
        assert!(validate_server_message(&message).is_err());
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let message = json!({"MessageType": "Gossip"});
        assert!(validate_server_message(&message).is_err());
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(validate_server_message(&json!("hello")).is_err());
        assert!(validate_server_message(&json!(42)).is_err());
    }
}
