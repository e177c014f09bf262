//! Transport harness: a strict validator over the transport.
//!
//! The harness presents an event-ordered view of the transport to the
//! conversation. It enforces the contract documented on
//! [`Transport`](crate::transport::Transport):
//!
//! - control methods are only legal in the right states;
//! - `Connecting` / `Disconnecting` acknowledgments must be emitted
//!   synchronously inside `connect()` / `disconnect()`;
//! - spontaneous events must arrive in the documented order, and a
//!   spontaneous `Disconnecting` must carry a fault.
//!
//! Any deviation moves the harness to its terminal failed state: a single
//! [`HarnessEvent::Failed`] is surfaced, every later transport event is
//! ignored, and every later method call returns a state error. The client
//! never touches the transport again.
//!
//! Spontaneous disconnects are normalized into
//! [`ClientError::Connection`] values whose message distinguishes a failed
//! connection attempt from a lost established connection.
//!
//! A watchdog guards the disconnecting state: if the transport never
//! delivers its `Disconnected` event, the harness declares it broken rather
//! than waiting forever.

use crate::error::{ClientError, SharedTransportFault};
use crate::transport::{
    event_channel, EventSource, EventWaker, Transport, TransportEvent, TransportFault,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Connection state tracked by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HarnessState {
    /// No connection exists or is being attempted.
    Disconnected,
    /// `connect()` has been called; awaiting the `Connected` event.
    Connecting,
    /// The connection is established.
    Connected,
    /// A disconnect is underway; awaiting the `Disconnected` event.
    Disconnecting,
    /// The transport violated its contract; terminal.
    Failed,
}

/// A validated event surfaced to the conversation.
///
/// The synchronous acknowledgments (`Connecting`, expected `Disconnecting`)
/// are consumed inside [`TransportHarness::connect`] and
/// [`TransportHarness::disconnect`], so they do not appear here.
#[derive(Debug)]
pub(crate) enum HarnessEvent {
    /// The transport finished connecting.
    Connected,
    /// A message frame arrived.
    Message(String),
    /// The transport is going down spontaneously; carries the normalized
    /// connection error.
    Disconnecting(ClientError),
    /// The transport finished disconnecting.
    Disconnected,
    /// The transport violated its contract; no further events will follow.
    Failed(ClientError),
}

/// Strict validator/adapter over a [`Transport`].
pub(crate) struct TransportHarness {
    transport: Box<dyn Transport>,
    events: EventSource,
    state: HarnessState,
    disconnect_timeout: Duration,
    watchdog: Option<Instant>,
    pending_failure: Option<ClientError>,
}

impl TransportHarness {
    /// Wraps a transport, wiring up its event channel.
    pub(crate) fn new(mut transport: Box<dyn Transport>, disconnect_timeout: Duration) -> Self {
        let (sink, events) = event_channel();
        transport.attach(sink);
        Self {
            transport,
            events,
            state: HarnessState::Disconnected,
            disconnect_timeout,
            watchdog: None,
            pending_failure: None,
        }
    }

    /// Returns the current harness state.
    pub(crate) fn state(&self) -> HarnessState {
        self.state
    }

    /// Returns a waker that completes when transport events are queued.
    pub(crate) fn waker(&self) -> EventWaker {
        self.events.waker()
    }

    /// Starts a connection attempt.
    ///
    /// The transport must emit `Connecting` before `transport.connect()`
    /// returns; anything else is a contract violation.
    pub(crate) fn connect(&mut self) -> Result<(), ClientError> {
        if self.state != HarnessState::Disconnected {
            return Err(ClientError::state(format!(
                "connect() requires a disconnected transport (currently {:?})",
                self.state
            )));
        }
        if let Err(fault) = self.transport.connect() {
            return Err(self.fail("transport connect() failed", Some(fault)));
        }
        match self.events.try_next() {
            Some(TransportEvent::Connecting) => {
                self.state = HarnessState::Connecting;
                tracing::debug!("transport connecting");
                Ok(())
            }
            _ => Err(self.fail(
                "transport did not emit a connecting event within connect()",
                None,
            )),
        }
    }

    /// Sends a message frame on the established connection.
    pub(crate) fn send(&mut self, message: &str) -> Result<(), ClientError> {
        if self.state != HarnessState::Connected {
            return Err(ClientError::state(format!(
                "send() requires a connected transport (currently {:?})",
                self.state
            )));
        }
        if let Err(fault) = self.transport.send(message) {
            return Err(self.fail("transport send() failed", Some(fault)));
        }
        Ok(())
    }

    /// Starts a graceful disconnect and arms the watchdog.
    ///
    /// The transport must emit `Disconnecting` with no fault before
    /// `transport.disconnect()` returns.
    pub(crate) fn disconnect(&mut self) -> Result<(), ClientError> {
        if self.state != HarnessState::Connecting && self.state != HarnessState::Connected {
            return Err(ClientError::state(format!(
                "disconnect() requires a connecting or connected transport (currently {:?})",
                self.state
            )));
        }
        if let Err(fault) = self.transport.disconnect() {
            return Err(self.fail("transport disconnect() failed", Some(fault)));
        }
        match self.events.try_next() {
            Some(TransportEvent::Disconnecting(None)) => {
                self.enter_disconnecting();
                tracing::debug!("transport disconnecting");
                Ok(())
            }
            Some(TransportEvent::Disconnecting(Some(_))) => Err(self.fail(
                "transport attached an error to a requested disconnect",
                None,
            )),
            _ => Err(self.fail(
                "transport did not emit a disconnecting event within disconnect()",
                None,
            )),
        }
    }

    /// Validates and returns the next spontaneous transport event, if any.
    ///
    /// After a contract violation this surfaces a single
    /// [`HarnessEvent::Failed`] and then drains everything silently.
    pub(crate) fn poll_event(&mut self) -> Option<HarnessEvent> {
        if self.state == HarnessState::Failed {
            if let Some(error) = self.pending_failure.take() {
                return Some(HarnessEvent::Failed(error));
            }
            while self.events.try_next().is_some() {}
            return None;
        }

        let event = self.events.try_next()?;
        match (event, self.state) {
            (TransportEvent::Connected, HarnessState::Connecting) => {
                self.state = HarnessState::Connected;
                Some(HarnessEvent::Connected)
            }
            (TransportEvent::Message(frame), HarnessState::Connected) => {
                Some(HarnessEvent::Message(frame))
            }
            (TransportEvent::Disconnecting(Some(fault)), HarnessState::Connecting) => {
                self.enter_disconnecting();
                Some(HarnessEvent::Disconnecting(ClientError::connection(
                    format!("could not connect: {}", fault),
                    Some(share(fault)),
                )))
            }
            (TransportEvent::Disconnecting(Some(fault)), HarnessState::Connected) => {
                self.enter_disconnecting();
                Some(HarnessEvent::Disconnecting(ClientError::connection(
                    format!("connection failed: {}", fault),
                    Some(share(fault)),
                )))
            }
            (TransportEvent::Disconnecting(None), _) => Some(HarnessEvent::Failed(self.fail(
                "transport emitted a spontaneous disconnecting event with no error",
                None,
            ))),
            (TransportEvent::Disconnected, HarnessState::Disconnecting) => {
                self.state = HarnessState::Disconnected;
                self.watchdog = None;
                Some(HarnessEvent::Disconnected)
            }
            (event, state) => Some(HarnessEvent::Failed(self.fail(
                format!("transport emitted {} while {:?}", event_name(&event), state),
                None,
            ))),
        }
    }

    /// Deadline of the disconnect watchdog, if armed.
    pub(crate) fn watchdog_deadline(&self) -> Option<Instant> {
        self.watchdog
    }

    /// Fires the watchdog if its deadline has passed.
    pub(crate) fn poll_watchdog(&mut self, now: Instant) -> Option<HarnessEvent> {
        let deadline = self.watchdog?;
        if now < deadline {
            return None;
        }
        self.watchdog = None;
        Some(HarnessEvent::Failed(self.fail(
            "transport did not finish disconnecting within the watchdog window",
            None,
        )))
    }

    fn enter_disconnecting(&mut self) {
        self.state = HarnessState::Disconnecting;
        if self.disconnect_timeout > Duration::ZERO {
            self.watchdog = Some(Instant::now() + self.disconnect_timeout);
        }
    }

    /// Records a contract violation and builds the terminal error.
    fn fail(&mut self, message: impl Into<String>, fault: Option<TransportFault>) -> ClientError {
        let error = ClientError::transport(message, fault.map(share));
        tracing::error!(error = %error, "transport contract violation");
        self.state = HarnessState::Failed;
        self.watchdog = None;
        self.pending_failure = Some(error.clone());
        error
    }
}

fn share(fault: TransportFault) -> SharedTransportFault {
    Arc::from(fault)
}

fn event_name(event: &TransportEvent) -> &'static str {
    match event {
        TransportEvent::Connecting => "connecting",
        TransportEvent::Connected => "connected",
        TransportEvent::Message(_) => "message",
        TransportEvent::Disconnecting(_) => "disconnecting",
        TransportEvent::Disconnected => "disconnected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockHandle, MockTransport};

    fn harness() -> (TransportHarness, MockHandle) {
        let (transport, handle) = MockTransport::new();
        (
            TransportHarness::new(Box::new(transport), Duration::from_secs(5)),
            handle,
        )
    }

    #[test]
    fn test_connect_happy_path() {
        let (mut harness, _handle) = harness();
        harness.connect().unwrap();
        assert_eq!(harness.state(), HarnessState::Connecting);

        // The mock emitted Connected synchronously; the pump validates it.
        assert!(matches!(harness.poll_event(), Some(HarnessEvent::Connected)));
        assert_eq!(harness.state(), HarnessState::Connected);
    }

    #[test]
    fn test_connect_requires_disconnected() {
        let (mut harness, _handle) = harness();
        harness.connect().unwrap();
        let err = harness.connect().unwrap_err();
        assert!(matches!(err, ClientError::State { .. }));
    }

    #[test]
    fn test_connect_without_connecting_event_fails() {
        let (mut harness, handle) = harness();
        handle.set_omit_connecting(true);
        let err = harness.connect().unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }));
        assert_eq!(harness.state(), HarnessState::Failed);

        // The failure is surfaced once through the pump, then silence.
        assert!(matches!(harness.poll_event(), Some(HarnessEvent::Failed(_))));
        assert!(harness.poll_event().is_none());
    }

    #[test]
    fn test_connect_method_failure() {
        let (mut harness, handle) = harness();
        handle.fail_next_connect("refused");
        let err = harness.connect().unwrap_err();
        match err {
            ClientError::Transport { fault, .. } => {
                assert!(fault.is_some());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_send_requires_connected() {
        let (mut harness, _handle) = harness();
        assert!(matches!(
            harness.send("frame"),
            Err(ClientError::State { .. })
        ));
    }

    #[test]
    fn test_message_delivery() {
        let (mut harness, handle) = harness();
        harness.connect().unwrap();
        harness.poll_event();
        handle.push_message("frame");

        match harness.poll_event() {
            Some(HarnessEvent::Message(frame)) => assert_eq!(frame, "frame"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_message_before_connected_is_violation() {
        let (mut harness, handle) = harness();
        handle.set_complete_connect(false);
        harness.connect().unwrap();
        handle.push_message("early");

        assert!(matches!(harness.poll_event(), Some(HarnessEvent::Failed(_))));
        assert_eq!(harness.state(), HarnessState::Failed);
    }

    #[test]
    fn test_disconnect_happy_path() {
        let (mut harness, _handle) = harness();
        harness.connect().unwrap();
        harness.poll_event();

        harness.disconnect().unwrap();
        assert_eq!(harness.state(), HarnessState::Disconnecting);
        assert!(matches!(harness.poll_event(), Some(HarnessEvent::Disconnected)));
        assert_eq!(harness.state(), HarnessState::Disconnected);
        assert!(harness.watchdog_deadline().is_none());
    }

    #[test]
    fn test_disconnect_without_event_is_violation() {
        let (mut harness, handle) = harness();
        harness.connect().unwrap();
        harness.poll_event();
        handle.set_omit_disconnecting(true);

        assert!(matches!(
            harness.disconnect(),
            Err(ClientError::Transport { .. })
        ));
    }

    #[test]
    fn test_spontaneous_failure_while_connected() {
        let (mut harness, handle) = harness();
        harness.connect().unwrap();
        harness.poll_event();

        handle.fail_connection("wire cut");
        match harness.poll_event() {
            Some(HarnessEvent::Disconnecting(ClientError::Connection { message, fault })) => {
                assert!(message.starts_with("connection failed"));
                assert!(fault.is_some());
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(harness.poll_event(), Some(HarnessEvent::Disconnected)));
    }

    #[test]
    fn test_spontaneous_failure_while_connecting() {
        let (mut harness, handle) = harness();
        handle.set_complete_connect(false);
        harness.connect().unwrap();

        handle.fail_connection("no route");
        match harness.poll_event() {
            Some(HarnessEvent::Disconnecting(ClientError::Connection { message, .. })) => {
                assert!(message.starts_with("could not connect"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_spontaneous_disconnecting_without_error_is_violation() {
        let (mut harness, handle) = harness();
        harness.connect().unwrap();
        harness.poll_event();

        handle.emit(TransportEvent::Disconnecting(None));
        assert!(matches!(harness.poll_event(), Some(HarnessEvent::Failed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_fires_when_disconnect_hangs() {
        let (transport, handle) = MockTransport::new();
        let mut harness = TransportHarness::new(Box::new(transport), Duration::from_secs(5));
        harness.connect().unwrap();
        harness.poll_event();

        handle.set_complete_disconnect(false);
        harness.disconnect().unwrap();
        let deadline = harness.watchdog_deadline().expect("watchdog armed");

        assert!(harness.poll_watchdog(Instant::now()).is_none());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(matches!(
            harness.poll_watchdog(Instant::now()),
            Some(HarnessEvent::Failed(_))
        ));
        assert!(Instant::now() >= deadline);
        assert_eq!(harness.state(), HarnessState::Failed);
    }
}
