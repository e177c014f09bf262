//! Mock transport implementation for testing.
//!
//! [`MockTransport`] satisfies the [`Transport`](super::Transport) contract
//! without any real network. Construction returns the transport together with
//! a [`MockHandle`]; the transport is moved into the client while the handle
//! stays with the test, which uses it to inspect sent frames and to play the
//! server's side of the conversation.
//!
//! # Example
//!
//! ```rust,ignore
//! let (transport, handle) = MockTransport::new();
//! let client = FeedlinkClient::new(Box::new(transport), ClientOptions::default());
//!
//! let connect = client.connect();
//! handle.push_message_value(&serde_json::json!({
//!     "MessageType": "HandshakeResponse", "Success": true, "Version": "0.1"
//! }));
//! connect.await.unwrap();
//! ```

use crate::transport::{
    EventSink, Transport, TransportEvent, TransportFault, TransportResult, TransportState,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

struct MockShared {
    state: Mutex<TransportState>,
    sink: Mutex<Option<EventSink>>,
    sent: Mutex<Vec<String>>,
    complete_connect: AtomicBool,
    complete_disconnect: AtomicBool,
    omit_connecting: AtomicBool,
    omit_disconnecting: AtomicBool,
    fail_next_connect: Mutex<Option<String>>,
}

impl MockShared {
    fn lock_state(&self) -> TransportState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: TransportState) {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    fn emit(&self, event: TransportEvent) {
        let sink = self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sink) = sink.as_ref() {
            sink.emit(event);
        }
    }
}

/// A mock transport for testing purposes.
///
/// By default a `connect()` call emits `Connecting` and `Connected`
/// synchronously and a `disconnect()` call emits `Disconnecting` and
/// `Disconnected` synchronously; both completions can be deferred through the
/// handle to exercise the in-between states.
pub struct MockTransport {
    shared: Arc<MockShared>,
}

/// Test-side controller for a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<MockShared>,
}

impl MockTransport {
    /// Creates a mock transport and its controlling handle.
    pub fn new() -> (Self, MockHandle) {
        let shared = Arc::new(MockShared {
            state: Mutex::new(TransportState::Disconnected),
            sink: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            complete_connect: AtomicBool::new(true),
            complete_disconnect: AtomicBool::new(true),
            omit_connecting: AtomicBool::new(false),
            omit_disconnecting: AtomicBool::new(false),
            fail_next_connect: Mutex::new(None),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MockHandle { shared },
        )
    }
}

impl Transport for MockTransport {
    fn attach(&mut self, events: EventSink) {
        *self
            .shared
            .sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(events);
    }

    fn state(&self) -> TransportState {
        self.shared.lock_state()
    }

    fn connect(&mut self) -> TransportResult<()> {
        if let Some(message) = self
            .shared
            .fail_next_connect
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            return Err(fault(message));
        }
        if !self.shared.omit_connecting.load(Ordering::SeqCst) {
            self.shared.emit(TransportEvent::Connecting);
        }
        self.shared.set_state(TransportState::Connecting);
        if self.shared.complete_connect.load(Ordering::SeqCst) {
            self.shared.emit(TransportEvent::Connected);
            self.shared.set_state(TransportState::Connected);
        }
        Ok(())
    }

    fn send(&mut self, message: &str) -> TransportResult<()> {
        if self.shared.lock_state() != TransportState::Connected {
            return Err(fault("not connected"));
        }
        self.shared
            .sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.to_string());
        Ok(())
    }

    fn disconnect(&mut self) -> TransportResult<()> {
        if !self.shared.omit_disconnecting.load(Ordering::SeqCst) {
            self.shared.emit(TransportEvent::Disconnecting(None));
        }
        if self.shared.complete_disconnect.load(Ordering::SeqCst) {
            self.shared.emit(TransportEvent::Disconnected);
        }
        self.shared.set_state(TransportState::Disconnected);
        Ok(())
    }
}

impl MockHandle {
    /// Returns the frames sent so far without clearing them.
    pub fn sent(&self) -> Vec<String> {
        self.shared
            .sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Removes and returns the frames sent so far, parsed as JSON.
    pub fn take_sent(&self) -> Vec<Value> {
        let frames: Vec<String> = std::mem::take(
            &mut *self
                .shared
                .sent
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        frames
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    /// Returns the number of frames sent so far.
    pub fn sent_count(&self) -> usize {
        self.shared
            .sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Emits an arbitrary transport event; misbehavior tests use this to
    /// violate the contract on purpose.
    pub fn emit(&self, event: TransportEvent) {
        self.shared.emit(event);
    }

    /// Delivers a message frame from the "server".
    pub fn push_message(&self, frame: impl Into<String>) {
        self.shared.emit(TransportEvent::Message(frame.into()));
    }

    /// Delivers a JSON message from the "server".
    pub fn push_message_value(&self, message: &Value) {
        self.push_message(message.to_string());
    }

    /// Controls whether `connect()` completes synchronously with a
    /// `Connected` event (the default) or leaves the transport connecting.
    pub fn set_complete_connect(&self, complete: bool) {
        self.shared.complete_connect.store(complete, Ordering::SeqCst);
    }

    /// Controls whether `disconnect()` completes synchronously with a
    /// `Disconnected` event (the default).
    pub fn set_complete_disconnect(&self, complete: bool) {
        self.shared.complete_disconnect.store(complete, Ordering::SeqCst);
    }

    /// Makes `connect()` violate the contract by not emitting `Connecting`.
    pub fn set_omit_connecting(&self, omit: bool) {
        self.shared.omit_connecting.store(omit, Ordering::SeqCst);
    }

    /// Makes `disconnect()` violate the contract by not emitting
    /// `Disconnecting`.
    pub fn set_omit_disconnecting(&self, omit: bool) {
        self.shared.omit_disconnecting.store(omit, Ordering::SeqCst);
    }

    /// Makes the next `connect()` call fail with the given message.
    pub fn fail_next_connect(&self, message: impl Into<String>) {
        *self
            .shared
            .fail_next_connect
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(message.into());
    }

    /// Finishes a deferred connect: emits `Connected` and updates the state.
    pub fn finish_connect(&self) {
        self.shared.emit(TransportEvent::Connected);
        self.shared.set_state(TransportState::Connected);
    }

    /// Finishes a deferred disconnect: emits `Disconnected`.
    pub fn finish_disconnect(&self) {
        self.shared.emit(TransportEvent::Disconnected);
        self.shared.set_state(TransportState::Disconnected);
    }

    /// Simulates a spontaneous connection loss.
    pub fn fail_connection(&self, message: impl Into<String>) {
        self.shared
            .emit(TransportEvent::Disconnecting(Some(fault(message))));
        self.shared.emit(TransportEvent::Disconnected);
        self.shared.set_state(TransportState::Disconnected);
    }
}

fn fault(message: impl Into<String>) -> TransportFault {
    Box::new(std::io::Error::new(std::io::ErrorKind::Other, message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::event_channel;

    fn attached() -> (MockTransport, MockHandle, crate::transport::EventSource) {
        let (mut transport, handle) = MockTransport::new();
        let (sink, source) = event_channel();
        transport.attach(sink);
        (transport, handle, source)
    }

    #[test]
    fn test_connect_emits_connecting_then_connected() {
        let (mut transport, _handle, source) = attached();
        transport.connect().unwrap();

        assert!(matches!(source.try_next(), Some(TransportEvent::Connecting)));
        assert!(matches!(source.try_next(), Some(TransportEvent::Connected)));
        assert_eq!(transport.state(), TransportState::Connected);
    }

    #[test]
    fn test_deferred_connect() {
        let (mut transport, handle, source) = attached();
        handle.set_complete_connect(false);
        transport.connect().unwrap();

        assert!(matches!(source.try_next(), Some(TransportEvent::Connecting)));
        assert!(source.try_next().is_none());
        assert_eq!(transport.state(), TransportState::Connecting);

        handle.finish_connect();
        assert!(matches!(source.try_next(), Some(TransportEvent::Connected)));
    }

    #[test]
    fn test_send_records_frames() {
        let (mut transport, handle, _source) = attached();
        transport.connect().unwrap();
        transport.send(r#"{"MessageType":"Handshake","Versions":["0.1"]}"#).unwrap();

        assert_eq!(handle.sent_count(), 1);
        let sent = handle.take_sent();
        assert_eq!(sent[0]["MessageType"], "Handshake");
        assert_eq!(handle.sent_count(), 0);
    }

    #[test]
    fn test_send_requires_connection() {
        let (mut transport, _handle, _source) = attached();
        assert!(transport.send("frame").is_err());
    }

    #[test]
    fn test_disconnect_emits_events() {
        let (mut transport, _handle, source) = attached();
        transport.connect().unwrap();
        // Drain the connect events.
        source.try_next();
        source.try_next();

        transport.disconnect().unwrap();
        assert!(matches!(
            source.try_next(),
            Some(TransportEvent::Disconnecting(None))
        ));
        assert!(matches!(source.try_next(), Some(TransportEvent::Disconnected)));
    }

    #[test]
    fn test_fail_connection() {
        let (mut transport, handle, source) = attached();
        transport.connect().unwrap();
        source.try_next();
        source.try_next();

        handle.fail_connection("wire cut");
        match source.try_next() {
            Some(TransportEvent::Disconnecting(Some(fault))) => {
                assert!(fault.to_string().contains("wire cut"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(source.try_next(), Some(TransportEvent::Disconnected)));
    }

    #[test]
    fn test_fail_next_connect() {
        let (mut transport, handle, source) = attached();
        handle.fail_next_connect("refused");
        assert!(transport.connect().is_err());
        assert!(source.try_next().is_none());
    }
}
