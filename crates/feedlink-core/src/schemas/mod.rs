//! Embedded JSON schema for the Feedlink Protocol.
//!
//! The server-message vocabulary is validated against this schema before any
//! message is dispatched; see [`crate::validation`] for the compiled
//! validator. Each message type is pinned by a `MessageType` const inside the
//! top-level `oneOf`, so exactly one branch can match a well-formed message
//! and unknown message types match none.

/// Embedded server-message JSON schema.
///
/// Covers all seven server message types, including the success/failure field
/// split on `HandshakeResponse`, `ActionResponse`, and `FeedOpenResponse`.
pub const SERVER_MESSAGE_SCHEMA: &str = r##"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "title": "ServerMessage",
  "type": "object",
  "required": ["MessageType"],
  "oneOf": [
    { "$ref": "#/$defs/violationResponse" },
    { "$ref": "#/$defs/handshakeResponse" },
    { "$ref": "#/$defs/actionResponse" },
    { "$ref": "#/$defs/feedOpenResponse" },
    { "$ref": "#/$defs/feedCloseResponse" },
    { "$ref": "#/$defs/feedAction" },
    { "$ref": "#/$defs/feedTermination" }
  ],
  "$defs": {
    "feedName": { "type": "string", "minLength": 1 },
    "feedArgs": {
      "type": "object",
      "additionalProperties": { "type": "string" }
    },
    "delta": {
      "type": "object",
      "required": ["Operation", "Path"],
      "properties": {
        "Operation": {
          "enum": [
            "Set", "Delete", "DeleteValue", "Prepend", "Append",
            "Increment", "Decrement", "Toggle", "InsertFirst", "InsertLast",
            "InsertBefore", "InsertAfter", "DeleteFirst", "DeleteLast"
          ]
        },
        "Path": {
          "type": "array",
          "items": {
            "anyOf": [
              { "type": "string" },
              { "type": "integer", "minimum": 0 }
            ]
          }
        },
        "Value": {}
      },
      "additionalProperties": false
    },
    "violationResponse": {
      "type": "object",
      "required": ["MessageType", "Diagnostics"],
      "properties": {
        "MessageType": { "const": "ViolationResponse" },
        "Diagnostics": { "type": "object" }
      },
      "additionalProperties": false
    },
    "handshakeResponse": {
      "type": "object",
      "required": ["MessageType", "Success"],
      "properties": {
        "MessageType": { "const": "HandshakeResponse" },
        "Success": { "type": "boolean" },
        "Version": { "type": "string" }
      },
      "additionalProperties": false,
      "oneOf": [
        {
          "properties": { "Success": { "const": true } },
          "required": ["Version"]
        },
        {
          "properties": { "Success": { "const": false } },
          "not": { "required": ["Version"] }
        }
      ]
    },
    "actionResponse": {
      "type": "object",
      "required": ["MessageType", "CallbackId", "Success"],
      "properties": {
        "MessageType": { "const": "ActionResponse" },
        "CallbackId": { "type": "string", "minLength": 1 },
        "Success": { "type": "boolean" },
        "ActionData": { "type": "object" },
        "ErrorCode": { "type": "string", "minLength": 1 },
        "ErrorData": { "type": "object" }
      },
      "additionalProperties": false,
      "oneOf": [
        {
          "properties": { "Success": { "const": true } },
          "required": ["ActionData"],
          "not": { "anyOf": [ { "required": ["ErrorCode"] }, { "required": ["ErrorData"] } ] }
        },
        {
          "properties": { "Success": { "const": false } },
          "required": ["ErrorCode", "ErrorData"],
          "not": { "required": ["ActionData"] }
        }
      ]
    },
    "feedOpenResponse": {
      "type": "object",
      "required": ["MessageType", "FeedName", "FeedArgs", "Success"],
      "properties": {
        "MessageType": { "const": "FeedOpenResponse" },
        "FeedName": { "$ref": "#/$defs/feedName" },
        "FeedArgs": { "$ref": "#/$defs/feedArgs" },
        "Success": { "type": "boolean" },
        "FeedData": { "type": "object" },
        "ErrorCode": { "type": "string", "minLength": 1 },
        "ErrorData": { "type": "object" }
      },
      "additionalProperties": false,
      "oneOf": [
        {
          "properties": { "Success": { "const": true } },
          "required": ["FeedData"],
          "not": { "anyOf": [ { "required": ["ErrorCode"] }, { "required": ["ErrorData"] } ] }
        },
        {
          "properties": { "Success": { "const": false } },
          "required": ["ErrorCode", "ErrorData"],
          "not": { "required": ["FeedData"] }
        }
      ]
    },
    "feedCloseResponse": {
      "type": "object",
      "required": ["MessageType", "FeedName", "FeedArgs"],
      "properties": {
        "MessageType": { "const": "FeedCloseResponse" },
        "FeedName": { "$ref": "#/$defs/feedName" },
        "FeedArgs": { "$ref": "#/$defs/feedArgs" }
      },
      "additionalProperties": false
    },
    "feedAction": {
      "type": "object",
      "required": ["MessageType", "FeedName", "FeedArgs", "ActionName", "ActionData", "FeedDeltas"],
      "properties": {
        "MessageType": { "const": "FeedAction" },
        "FeedName": { "$ref": "#/$defs/feedName" },
        "FeedArgs": { "$ref": "#/$defs/feedArgs" },
        "ActionName": { "type": "string", "minLength": 1 },
        "ActionData": { "type": "object" },
        "FeedDeltas": {
          "type": "array",
          "items": { "$ref": "#/$defs/delta" }
        },
        "FeedMd5": { "type": "string", "minLength": 24, "maxLength": 24 }
      },
      "additionalProperties": false
    },
    "feedTermination": {
      "type": "object",
      "required": ["MessageType", "FeedName", "FeedArgs", "ErrorCode", "ErrorData"],
      "properties": {
        "MessageType": { "const": "FeedTermination" },
        "FeedName": { "$ref": "#/$defs/feedName" },
        "FeedArgs": { "$ref": "#/$defs/feedArgs" },
        "ErrorCode": { "type": "string", "minLength": 1 },
        "ErrorData": { "type": "object" }
      },
      "additionalProperties": false
    }
  }
}"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_valid_json() {
        let result: Result<serde_json::Value, _> = serde_json::from_str(SERVER_MESSAGE_SCHEMA);
        assert!(result.is_ok(), "server message schema should be valid JSON");
    }

    #[test]
    fn test_schema_covers_all_message_types() {
        let schema: serde_json::Value = serde_json::from_str(SERVER_MESSAGE_SCHEMA).unwrap();
        let defs = schema["$defs"].as_object().unwrap();
        for name in crate::constants::SERVER_MESSAGE_TYPES {
            let found = defs.values().any(|def| {
                def["properties"]["MessageType"]["const"]
                    .as_str()
                    .is_some_and(|t| t == name)
            });
            assert!(found, "schema should define message type {}", name);
        }
    }
}
