//! Transport layer for the Feedlink client.
//!
//! The client is layered on an application-supplied, connection-oriented
//! message transport. This module provides the [`Transport`] trait that a
//! transport implementation must satisfy, the [`TransportEvent`] vocabulary
//! it emits, and the [`EventSink`] it emits into.
//!
//! ## Contract
//!
//! Control methods are synchronous and initiating: a transport performs its
//! actual I/O on its own task, but it must push the acknowledging event into
//! its [`EventSink`] *before the control method returns*:
//!
//! - `connect()` must emit [`TransportEvent::Connecting`] before returning.
//! - `disconnect()` must emit [`TransportEvent::Disconnecting`] (with no
//!   fault) before returning.
//!
//! Thereafter events flow asynchronously:
//! `Connecting → Connected → Message* → Disconnecting → Disconnected`.
//! A spontaneous connection loss is reported as `Disconnecting(Some(fault))`
//! followed by `Disconnected`. After a `Disconnecting` event the transport
//! must not emit further `Message` events.
//!
//! Deviations from this contract are detected by the harness layer, which
//! declares the transport broken and stops using it.

pub mod mock;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// The value a transport fails with.
pub type TransportFault = Box<dyn std::error::Error + Send + Sync>;

/// Result type for transport control methods.
pub type TransportResult<T> = Result<T, TransportFault>;

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    /// No connection exists or is being attempted.
    Disconnected,

    /// A connection attempt is in progress.
    Connecting,

    /// The connection is established.
    Connected,
}

impl TransportState {
    /// Returns true if the transport is connected.
    pub fn is_connected(&self) -> bool {
        *self == TransportState::Connected
    }

    /// Returns true if the transport is disconnected.
    pub fn is_disconnected(&self) -> bool {
        *self == TransportState::Disconnected
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportState::Disconnected => write!(f, "disconnected"),
            TransportState::Connecting => write!(f, "connecting"),
            TransportState::Connected => write!(f, "connected"),
        }
    }
}

/// An event emitted by a transport into its [`EventSink`].
#[derive(Debug)]
pub enum TransportEvent {
    /// A connection attempt has started.
    Connecting,

    /// The connection attempt succeeded.
    Connected,

    /// A message frame arrived.
    Message(String),

    /// The connection is going down. `Some(fault)` for a spontaneous loss,
    /// `None` when acknowledging a `disconnect()` call.
    Disconnecting(Option<TransportFault>),

    /// The connection is fully down.
    Disconnected,
}

/// Abstract interface for transport implementations.
///
/// The transport handles connection management and message framing; the
/// client layers protocol semantics (handshake, actions, feeds) on top.
pub trait Transport: Send + 'static {
    /// Hands the transport the sink it must emit its events into.
    ///
    /// Called exactly once, before any other method.
    fn attach(&mut self, events: EventSink);

    /// Returns the current connection state.
    fn state(&self) -> TransportState;

    /// Starts a connection attempt.
    ///
    /// Must emit [`TransportEvent::Connecting`] before returning.
    fn connect(&mut self) -> TransportResult<()>;

    /// Sends a message frame on the established connection.
    fn send(&mut self, message: &str) -> TransportResult<()>;

    /// Starts a graceful shutdown of the connection.
    ///
    /// Must emit [`TransportEvent::Disconnecting`] (no fault) before
    /// returning, and [`TransportEvent::Disconnected`] once down.
    fn disconnect(&mut self) -> TransportResult<()>;
}

// =============================================================================
// Event channel
// =============================================================================

struct EventChannel {
    queue: Mutex<VecDeque<TransportEvent>>,
    notify: Notify,
}

impl EventChannel {
    fn push(&self, event: TransportEvent) {
        let mut queue = self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        queue.push_back(event);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<TransportEvent> {
        let mut queue = self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        queue.pop_front()
    }

    fn is_empty(&self) -> bool {
        let queue = self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        queue.is_empty()
    }
}

/// The sending half of a transport event channel.
///
/// Cloneable so a transport can emit from its I/O task as well as from its
/// control methods.
#[derive(Clone)]
pub struct EventSink {
    shared: Arc<EventChannel>,
}

impl EventSink {
    /// Emits an event to the client.
    pub fn emit(&self, event: TransportEvent) {
        self.shared.push(event);
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// The receiving half of a transport event channel; held by the harness.
pub(crate) struct EventSource {
    shared: Arc<EventChannel>,
}

impl EventSource {
    /// Pops the next queued event, if any, without waiting.
    pub(crate) fn try_next(&self) -> Option<TransportEvent> {
        self.shared.pop()
    }

    /// Returns a waker handle the driver can select on.
    pub(crate) fn waker(&self) -> EventWaker {
        EventWaker {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Completes whenever at least one transport event is queued.
#[derive(Clone)]
pub(crate) struct EventWaker {
    shared: Arc<EventChannel>,
}

impl EventWaker {
    /// Waits until the event queue is non-empty.
    pub(crate) async fn ready(&self) {
        loop {
            if !self.shared.is_empty() {
                return;
            }
            self.shared.notify.notified().await;
        }
    }
}

/// Creates a connected sink/source pair.
pub(crate) fn event_channel() -> (EventSink, EventSource) {
    let shared = Arc::new(EventChannel {
        queue: Mutex::new(VecDeque::new()),
        notify: Notify::new(),
    });
    (
        EventSink {
            shared: Arc::clone(&shared),
        },
        EventSource { shared },
    )
}
