//! Wire message types for the Feedlink Protocol.
//!
//! The protocol exchanges JSON messages on a string-framed channel. Every
//! message is an object tagged by `MessageType`; the remaining fields depend
//! on the type. This module provides both directions:
//!
//! - [`ClientMessage`] - messages the client sends (Handshake, Action,
//!   FeedOpen, FeedClose)
//! - [`ServerMessage`] - messages the server sends (ViolationResponse,
//!   HandshakeResponse, ActionResponse, FeedOpenResponse, FeedCloseResponse,
//!   FeedAction, FeedTermination)
//!
//! Incoming messages are schema-validated (see [`crate::validation`]) before
//! they are decoded into [`ServerMessage`], so decoding failures after a
//! successful validation indicate a schema/type mismatch bug rather than a
//! malformed server.
//!
//! # Example
//!
//! ```
//! use feedlink_core::messages::ClientMessage;
//! use serde_json::json;
//!
//! let message = ClientMessage::action("ping", json!({}), "17");
//! let wire = serde_json::to_value(&message).unwrap();
//! assert_eq!(wire["MessageType"], "Action");
//! assert_eq!(wire["CallbackId"], "17");
//! ```

use crate::delta::Delta;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A message sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "MessageType", rename_all_fields = "PascalCase")]
pub enum ClientMessage {
    /// Opens the protocol conversation by offering version numbers.
    Handshake {
        /// Protocol versions the client can speak, in preference order.
        versions: Vec<String>,
    },
    /// Invokes a named server-side action.
    Action {
        /// Name of the action to invoke.
        action_name: String,
        /// Action arguments; always a JSON object.
        action_args: Value,
        /// Opaque id correlating the eventual `ActionResponse`.
        callback_id: String,
    },
    /// Requests that a feed be opened.
    FeedOpen {
        /// Feed name.
        feed_name: String,
        /// Feed arguments.
        feed_args: BTreeMap<String, String>,
    },
    /// Requests that an open feed be closed.
    FeedClose {
        /// Feed name.
        feed_name: String,
        /// Feed arguments.
        feed_args: BTreeMap<String, String>,
    },
}

impl ClientMessage {
    /// Creates a `Handshake` offering exactly the given versions.
    pub fn handshake(versions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ClientMessage::Handshake {
            versions: versions.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates an `Action` invocation.
    pub fn action(
        action_name: impl Into<String>,
        action_args: Value,
        callback_id: impl Into<String>,
    ) -> Self {
        ClientMessage::Action {
            action_name: action_name.into(),
            action_args,
            callback_id: callback_id.into(),
        }
    }

    /// Creates a `FeedOpen` request.
    pub fn feed_open(feed_name: impl Into<String>, feed_args: BTreeMap<String, String>) -> Self {
        ClientMessage::FeedOpen {
            feed_name: feed_name.into(),
            feed_args,
        }
    }

    /// Creates a `FeedClose` request.
    pub fn feed_close(feed_name: impl Into<String>, feed_args: BTreeMap<String, String>) -> Self {
        ClientMessage::FeedClose {
            feed_name: feed_name.into(),
            feed_args,
        }
    }
}

/// A message received from the server.
///
/// Optional fields follow the protocol's success/failure split: a successful
/// response carries its data field, a failed one carries `ErrorCode` and
/// `ErrorData`. The schema validator enforces that split before decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "MessageType", rename_all_fields = "PascalCase")]
pub enum ServerMessage {
    /// The server is reporting a client protocol violation.
    ViolationResponse {
        /// Server-supplied diagnostic details.
        diagnostics: Value,
    },
    /// Reply to the client `Handshake`; at most one per session.
    HandshakeResponse {
        /// Whether the server accepted one of the offered versions.
        success: bool,
        /// The accepted version; present on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    /// Reply to a client `Action`.
    ActionResponse {
        /// The id the client attached to the `Action`.
        callback_id: String,
        /// Whether the action succeeded.
        success: bool,
        /// Action result; present on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action_data: Option<Value>,
        /// Machine-readable failure code; present on failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
        /// Failure details; present on failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_data: Option<Value>,
    },
    /// Reply to a client `FeedOpen`.
    FeedOpenResponse {
        /// Feed name.
        feed_name: String,
        /// Feed arguments.
        feed_args: BTreeMap<String, String>,
        /// Whether the feed was opened.
        success: bool,
        /// Initial feed data snapshot; present on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feed_data: Option<Value>,
        /// Machine-readable failure code; present on failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
        /// Failure details; present on failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_data: Option<Value>,
    },
    /// Reply to a client `FeedClose`.
    FeedCloseResponse {
        /// Feed name.
        feed_name: String,
        /// Feed arguments.
        feed_args: BTreeMap<String, String>,
    },
    /// An action revelation on an open feed.
    FeedAction {
        /// Feed name.
        feed_name: String,
        /// Feed arguments.
        feed_args: BTreeMap<String, String>,
        /// Name of the revealed action.
        action_name: String,
        /// Data attached to the revealed action.
        action_data: Value,
        /// Deltas to apply, in order, to the current feed data.
        feed_deltas: Vec<Delta>,
        /// Optional integrity hash of the post-delta feed data.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feed_md5: Option<String>,
    },
    /// The server has forcibly closed an open feed.
    FeedTermination {
        /// Feed name.
        feed_name: String,
        /// Feed arguments.
        feed_args: BTreeMap<String, String>,
        /// Machine-readable termination code.
        error_code: String,
        /// Termination details.
        error_data: Value,
    },
}
