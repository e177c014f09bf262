//! # feedlink-core
//!
//! Core types and utilities for the Feedlink Protocol.
//!
//! This crate provides the protocol-level building blocks consumed by the
//! client crate: wire message types, feed identity, the delta interpreter,
//! feed data integrity hashing, schema validation, and identifier
//! allocation.
//!
//! ## Modules
//!
//! - [`messages`] - Client and server wire message types
//! - [`feed`] - Feed identity and canonical serials
//! - [`delta`] - Feed delta vocabulary and interpreter
//! - [`integrity`] - Canonical JSON and the `FeedMd5` hash
//! - [`validation`] - Server-message schema validation
//! - [`schemas`] - The embedded JSON schema
//! - [`constants`] - Protocol constants
//! - [`id`] - Process-wide unique identifier allocation

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

// Module declarations
pub mod constants;
pub mod delta;
pub mod feed;
pub mod id;
pub mod integrity;
pub mod messages;
pub mod schemas;
pub mod validation;

// =============================================================================
// Core Type Re-exports
// =============================================================================

// Re-exports for ergonomic imports
// Users can write `use feedlink_core::FeedIdentity;` instead of the full path.
pub use constants::PROTOCOL_VERSION;
pub use delta::{apply_delta, apply_deltas, Delta, DeltaError, Path, PathSegment};
pub use feed::{FeedIdentity, FeedSerial};
pub use integrity::{canonical_json, feed_data_hash};
pub use messages::{ClientMessage, ServerMessage};
pub use validation::{validate_server_message, SchemaViolation};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        // Verify that key types are accessible
        let _ = std::any::type_name::<FeedIdentity>();
        let _ = std::any::type_name::<ClientMessage>();
        let _ = std::any::type_name::<Delta>();
    }
}
