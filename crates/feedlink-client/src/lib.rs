//! # feedlink-client
//!
//! Client for the Feedlink Protocol: named server-side *actions* with
//! replies, and live-updating *feeds* delivering a snapshot plus ordered
//! action revelations, layered on an application-supplied message transport.
//!
//! The crate is organized as the layers of the client state machine:
//!
//! - [`transport`] - the transport contract and a mock for tests
//! - `harness` (internal) - strict validation of transport behavior
//! - `conversation` (internal) - the protocol state machine
//! - `coordinator` (internal) - ordered dispatch to the application
//! - [`client`] - the public async surface
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use feedlink_client::{ClientOptions, FeedlinkClient, FeedEvent};
//! use feedlink_core::FeedIdentity;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = my_transport(); // implements feedlink_client::Transport
//!     let client = FeedlinkClient::new(Box::new(transport), ClientOptions::default());
//!
//!     client.connect().await?;
//!
//!     let result = client.action("greet", serde_json::json!({"name": "ada"})).await?;
//!     println!("server said: {:?}", result);
//!
//!     let mut feed = client.feed(FeedIdentity::new("chat", [("room", "lobby")])).await?;
//!     while let Some(event) = feed.next_event().await {
//!         match event {
//!             FeedEvent::Action { action_name, new_data, .. } => {
//!                 println!("{} -> {:?}", action_name, new_data);
//!             }
//!             FeedEvent::Closed(reason) => {
//!                 println!("feed closed: {:?}", reason);
//!                 break;
//!             }
//!         }
//!     }
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod client;
pub mod config;
pub mod error;
pub mod transport;

mod conversation;
mod coordinator;
mod harness;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use client::{ClientEvent, ClientState, FeedEvent, FeedHandle, FeedObjectState, FeedlinkClient};
pub use config::{ClientOptions, ClientOptionsBuilder};
pub use error::{ClientError, RawServerMessage, ServerMessageViolation, SharedTransportFault};
pub use transport::{
    EventSink, Transport, TransportEvent, TransportFault, TransportResult, TransportState,
};

// Re-export commonly used types from feedlink-core for convenience
pub use feedlink_core::feed::{FeedIdentity, FeedSerial};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
