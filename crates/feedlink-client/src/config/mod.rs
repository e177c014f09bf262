//! Configuration types for the Feedlink client.
//!
//! [`ClientOptions`] carries the timing knobs the client core consumes. The
//! transport itself is passed to [`FeedlinkClient::new`](crate::FeedlinkClient::new)
//! as a separate argument, and reconnection policy belongs to a layer above
//! this crate, so neither appears here.
//!
//! ## Example
//!
//! ```rust
//! use feedlink_client::ClientOptions;
//! use std::time::Duration;
//!
//! let options = ClientOptions::builder()
//!     .connect_timeout(Duration::from_secs(5))
//!     .response_timeout(Duration::from_secs(30))
//!     .build();
//! ```

use std::time::Duration;

/// Default for every timeout option.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timing configuration for a [`FeedlinkClient`](crate::FeedlinkClient).
///
/// A zero duration disables the corresponding timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// How long the transport may take to reach the connected state before
    /// the attempt is abandoned. Zero disables the timer.
    pub connect_timeout: Duration,

    /// How long the server may take to answer a handshake, action, feed
    /// open, or feed close before the connection is considered broken. Zero
    /// disables the timers.
    pub response_timeout: Duration,

    /// How long the transport may take to finish a disconnect before the
    /// client declares the transport broken. Zero disables the watchdog.
    pub disconnect_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_TIMEOUT,
            response_timeout: DEFAULT_TIMEOUT,
            disconnect_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ClientOptions {
    /// Creates a builder starting from the defaults.
    pub fn builder() -> ClientOptionsBuilder {
        ClientOptionsBuilder {
            options: Self::default(),
        }
    }
}

/// Builder for [`ClientOptions`].
#[derive(Debug, Clone)]
pub struct ClientOptionsBuilder {
    options: ClientOptions,
}

impl ClientOptionsBuilder {
    /// Sets the transport connect timeout. Zero disables it.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Sets the server response timeout. Zero disables it.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.options.response_timeout = timeout;
        self
    }

    /// Sets the transport disconnect watchdog timeout. Zero disables it.
    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.options.disconnect_timeout = timeout;
        self
    }

    /// Finalizes the options.
    pub fn build(self) -> ClientOptions {
        self.options
    }
}
