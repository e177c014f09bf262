//! Protocol constants for the Feedlink Protocol.
//!
//! This module provides protocol-wide constants:
//!
//! - **Version** - The protocol version spoken by this library
//! - **Message types** - Wire names of client and server messages
//!
//! Constants are used throughout the codebase to ensure consistency.

/// The Feedlink Protocol version implemented by this library.
///
/// The client offers exactly this version during the handshake and refuses
/// any other version returned by the server.
pub const PROTOCOL_VERSION: &str = "0.1";

/// Wire names of client-originated messages.
pub const CLIENT_MESSAGE_TYPES: [&str; 4] = ["Handshake", "Action", "FeedOpen", "FeedClose"];

/// Wire names of server-originated messages.
pub const SERVER_MESSAGE_TYPES: [&str; 7] = [
    "ViolationResponse",
    "HandshakeResponse",
    "ActionResponse",
    "FeedOpenResponse",
    "FeedCloseResponse",
    "FeedAction",
    "FeedTermination",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version() {
        assert_eq!(PROTOCOL_VERSION, "0.1");
    }

    #[test]
    fn test_message_type_names_are_unique() {
        let mut all: Vec<&str> = CLIENT_MESSAGE_TYPES
            .iter()
            .chain(SERVER_MESSAGE_TYPES.iter())
            .copied()
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 11);
    }
}
