//! The protocol conversation state machine.
//!
//! The conversation drives the Feedlink Protocol over the
//! [`TransportHarness`]: at-most-one handshake per connection, strict
//! server-message sequencing, per-request response timers, and precise feed
//! lifecycle bookkeeping.
//!
//! It is internally synchronous. A method may invoke the harness, and the
//! harness's synchronously-produced acknowledgment is consumed within the
//! same call; everything the conversation wants the coordinator to know
//! comes back as a list of [`ConversationEvent`]s in the order they
//! occurred.
//!
//! ## Teardown
//!
//! Whenever the server misbehaves - unparseable frame, schema violation,
//! message that is invalid in the current state, bad delta, hash mismatch,
//! missed response window - the conversation clears every timer and every
//! piece of per-connection bookkeeping *synchronously*, asks the harness to
//! disconnect, and reports `Disconnecting` carrying the typed error. The
//! same teardown path serves app-initiated disconnects, with no error.

mod timers;

use crate::config::ClientOptions;
use crate::error::{ClientError, RawServerMessage, ServerMessageViolation};
use crate::harness::{HarnessEvent, TransportHarness};
use crate::transport::{EventWaker, Transport};
use feedlink_core::delta::apply_deltas;
use feedlink_core::feed::{FeedIdentity, FeedSerial};
use feedlink_core::integrity::feed_data_hash;
use feedlink_core::messages::{ClientMessage, ServerMessage};
use feedlink_core::validation::validate_server_message;
use feedlink_core::PROTOCOL_VERSION;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use timers::{TimerKey, TimerTable};
use tokio::time::Instant;

/// Conversation state.
///
/// `Connecting` subsumes both the transport connect and the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConversationState {
    /// No connection.
    Disconnected,
    /// Transport connecting or handshake outstanding.
    Connecting,
    /// Handshake complete; requests are accepted.
    Connected,
    /// Teardown underway; awaiting the transport's disconnected event.
    Disconnecting,
    /// The transport violated its contract; terminal.
    Failed,
}

/// Server feed state as observable from outside the conversation.
///
/// The internal terminated phase is presented as `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServerFeedState {
    /// No server feed exists for the serial.
    Closed,
    /// `FeedOpen` sent; awaiting the response.
    Opening,
    /// The feed is open and has data.
    Open,
    /// `FeedClose` sent; awaiting the response.
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakePhase {
    Idle,
    AwaitingResponse,
    Complete,
}

/// Per-serial server feed bookkeeping.
///
/// `Closed` is represented by absence from the table. The frozen request is
/// kept while a response is outstanding so a timeout can report exactly what
/// went unanswered.
#[derive(Debug)]
enum FeedPhase {
    Opening { request: Arc<Value> },
    Open { data: Arc<Value> },
    Closing { request: Arc<Value> },
    Terminated,
}

/// An event reported by the conversation, in occurrence order.
#[derive(Debug)]
pub(crate) enum ConversationEvent {
    /// The transport started connecting.
    Connecting,
    /// Handshake complete; the conversation is connected.
    Connected,
    /// An action succeeded.
    ActionSuccess {
        /// Callback id of the action.
        callback_id: String,
        /// Action result data.
        data: Arc<Value>,
    },
    /// The server rejected an action.
    ActionFailure {
        /// Callback id of the action.
        callback_id: String,
        /// The rejection.
        error: ClientError,
    },
    /// An action's response window elapsed; teardown follows.
    ActionTimeout {
        /// Callback id of the action.
        callback_id: String,
        /// The response timeout error.
        error: ClientError,
    },
    /// A feed open succeeded.
    FeedOpenSuccess {
        /// Identity of the feed.
        feed: FeedIdentity,
        /// Initial feed data.
        data: Arc<Value>,
    },
    /// The server rejected a feed open.
    FeedOpenFailure {
        /// Identity of the feed.
        feed: FeedIdentity,
        /// The rejection.
        error: ClientError,
    },
    /// A feed close was acknowledged.
    FeedCloseSuccess {
        /// Identity of the feed.
        feed: FeedIdentity,
    },
    /// An action revelation mutated an open feed.
    FeedAction {
        /// Identity of the feed.
        feed: FeedIdentity,
        /// Name of the revealed action.
        action_name: String,
        /// Data attached to the revealed action.
        action_data: Arc<Value>,
        /// Feed data after the deltas.
        new_data: Arc<Value>,
        /// Feed data before the deltas.
        old_data: Arc<Value>,
    },
    /// The server terminated an open feed.
    FeedTermination {
        /// Identity of the feed.
        feed: FeedIdentity,
        /// The termination.
        error: ClientError,
    },
    /// The connection is going down. `None` when app-initiated.
    Disconnecting {
        /// The cause, if the client did not ask for the disconnect.
        error: Option<ClientError>,
    },
    /// The connection is fully down.
    Disconnected,
    /// The transport violated its contract; terminal.
    Failed {
        /// The transport error.
        error: ClientError,
    },
}

/// The protocol state machine.
pub(crate) struct Conversation {
    harness: TransportHarness,
    options: ClientOptions,
    state: ConversationState,
    handshake: HandshakePhase,
    handshake_request: Option<Arc<Value>>,
    pending_actions: HashMap<String, Arc<Value>>,
    feeds: HashMap<FeedSerial, FeedPhase>,
    timers: TimerTable,
    failure_announced: bool,
}

impl Conversation {
    /// Creates a conversation over the given transport.
    pub(crate) fn new(transport: Box<dyn Transport>, options: ClientOptions) -> Self {
        let harness = TransportHarness::new(transport, options.disconnect_timeout);
        Self {
            harness,
            options,
            state: ConversationState::Disconnected,
            handshake: HandshakePhase::Idle,
            handshake_request: None,
            pending_actions: HashMap::new(),
            feeds: HashMap::new(),
            timers: TimerTable::default(),
            failure_announced: false,
        }
    }

    /// Returns the conversation state.
    pub(crate) fn state(&self) -> ConversationState {
        self.state
    }

    /// Returns a waker that completes when transport events are queued.
    pub(crate) fn waker(&self) -> EventWaker {
        self.harness.waker()
    }

    /// Observable state of a server feed.
    pub(crate) fn feed_state(&self, feed: &FeedIdentity) -> ServerFeedState {
        match self.feeds.get(&feed.serial()) {
            None => ServerFeedState::Closed,
            Some(FeedPhase::Opening { .. }) => ServerFeedState::Opening,
            Some(FeedPhase::Open { .. }) => ServerFeedState::Open,
            Some(FeedPhase::Closing { .. }) | Some(FeedPhase::Terminated) => {
                ServerFeedState::Closing
            }
        }
    }

    /// Immutable snapshot of an open feed's data.
    pub(crate) fn feed_data(&self, feed: &FeedIdentity) -> Option<Arc<Value>> {
        match self.feeds.get(&feed.serial()) {
            Some(FeedPhase::Open { data }) => Some(Arc::clone(data)),
            _ => None,
        }
    }

    // =========================================================================
    // Inbound operations
    // =========================================================================

    /// Starts connecting. Requires a disconnected conversation.
    pub(crate) fn connect(&mut self) -> Result<Vec<ConversationEvent>, ClientError> {
        if self.state != ConversationState::Disconnected {
            return Err(ClientError::state(format!(
                "connect() requires a disconnected client (currently {:?})",
                self.state
            )));
        }
        if let Err(error) = self.harness.connect() {
            return Err(self.method_failure(error));
        }
        if self.options.connect_timeout > Duration::ZERO {
            self.timers
                .arm(TimerKey::Connect, Instant::now() + self.options.connect_timeout);
        }
        self.state = ConversationState::Connecting;
        self.handshake = HandshakePhase::Idle;
        tracing::info!("connecting");
        Ok(vec![ConversationEvent::Connecting])
    }

    /// Disconnects at the application's request.
    pub(crate) fn disconnect(&mut self) -> Result<Vec<ConversationEvent>, ClientError> {
        if self.state != ConversationState::Connecting && self.state != ConversationState::Connected
        {
            return Err(ClientError::state(format!(
                "disconnect() requires a connecting or connected client (currently {:?})",
                self.state
            )));
        }
        Ok(self.teardown(None))
    }

    /// Sends an action invocation and arms its response timer.
    pub(crate) fn action(
        &mut self,
        callback_id: &str,
        name: &str,
        args: Value,
    ) -> Result<Vec<ConversationEvent>, ClientError> {
        if self.state != ConversationState::Connected {
            return Err(ClientError::state("action() requires a connected client"));
        }
        if !args.is_object() {
            return Err(ClientError::argument("action arguments must be a JSON object"));
        }
        if self.pending_actions.contains_key(callback_id) {
            return Err(ClientError::state(format!(
                "callback id {} is already pending",
                callback_id
            )));
        }
        let message = ClientMessage::action(name, args, callback_id);
        let (frozen, frame) = encode(&message)?;
        if let Err(error) = self.harness.send(&frame) {
            return Err(self.method_failure(error));
        }
        self.pending_actions.insert(callback_id.to_string(), frozen);
        if self.options.response_timeout > Duration::ZERO {
            self.timers.arm(
                TimerKey::Action(callback_id.to_string()),
                Instant::now() + self.options.response_timeout,
            );
        }
        tracing::debug!(action = name, callback_id, "action sent");
        Ok(vec![])
    }

    /// Sends a feed open request. The server feed must be closed.
    pub(crate) fn feed_open(
        &mut self,
        feed: &FeedIdentity,
    ) -> Result<Vec<ConversationEvent>, ClientError> {
        if self.state != ConversationState::Connected {
            return Err(ClientError::state("feed_open() requires a connected client"));
        }
        let serial = feed.serial();
        if self.feeds.contains_key(&serial) {
            return Err(ClientError::state(format!(
                "feed {} is not closed",
                serial
            )));
        }
        let message = ClientMessage::feed_open(feed.name(), feed.args().clone());
        let (frozen, frame) = encode(&message)?;
        if let Err(error) = self.harness.send(&frame) {
            return Err(self.method_failure(error));
        }
        self.feeds
            .insert(serial.clone(), FeedPhase::Opening { request: frozen });
        if self.options.response_timeout > Duration::ZERO {
            self.timers.arm(
                TimerKey::Feed(serial),
                Instant::now() + self.options.response_timeout,
            );
        }
        tracing::debug!(feed = %feed, "feed open sent");
        Ok(vec![])
    }

    /// Sends a feed close request. The server feed must be open.
    pub(crate) fn feed_close(
        &mut self,
        feed: &FeedIdentity,
    ) -> Result<Vec<ConversationEvent>, ClientError> {
        if self.state != ConversationState::Connected {
            return Err(ClientError::state("feed_close() requires a connected client"));
        }
        let serial = feed.serial();
        match self.feeds.get(&serial) {
            Some(FeedPhase::Open { .. }) => {}
            _ => {
                return Err(ClientError::state(format!("feed {} is not open", serial)));
            }
        }
        let message = ClientMessage::feed_close(feed.name(), feed.args().clone());
        let (frozen, frame) = encode(&message)?;
        if let Err(error) = self.harness.send(&frame) {
            return Err(self.method_failure(error));
        }
        // Feed data is dropped as soon as the close goes out.
        self.feeds
            .insert(serial.clone(), FeedPhase::Closing { request: frozen });
        if self.options.response_timeout > Duration::ZERO {
            self.timers.arm(
                TimerKey::Feed(serial),
                Instant::now() + self.options.response_timeout,
            );
        }
        tracing::debug!(feed = %feed, "feed close sent");
        Ok(vec![])
    }

    // =========================================================================
    // Transport pump
    // =========================================================================

    /// Validates and processes every queued transport event.
    pub(crate) fn poll_transport(&mut self) -> Vec<ConversationEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.harness.poll_event() {
            events.extend(self.handle_harness_event(event));
        }
        events
    }

    fn handle_harness_event(&mut self, event: HarnessEvent) -> Vec<ConversationEvent> {
        match event {
            HarnessEvent::Connected => self.handle_transport_connected(),
            HarnessEvent::Message(frame) => self.handle_message(frame),
            HarnessEvent::Disconnecting(error) => {
                if self.state == ConversationState::Connecting
                    || self.state == ConversationState::Connected
                {
                    tracing::warn!(error = %error, "connection lost");
                    self.clear_session();
                    self.state = ConversationState::Disconnecting;
                    vec![ConversationEvent::Disconnecting { error: Some(error) }]
                } else {
                    vec![]
                }
            }
            HarnessEvent::Disconnected => {
                if self.state == ConversationState::Disconnecting {
                    self.state = ConversationState::Disconnected;
                    tracing::info!("disconnected");
                    vec![ConversationEvent::Disconnected]
                } else {
                    vec![]
                }
            }
            HarnessEvent::Failed(error) => {
                if self.failure_announced {
                    return vec![];
                }
                self.failure_announced = true;
                self.clear_session();
                self.state = ConversationState::Failed;
                vec![ConversationEvent::Failed { error }]
            }
        }
    }

    fn handle_transport_connected(&mut self) -> Vec<ConversationEvent> {
        if self.state != ConversationState::Connecting {
            return vec![];
        }
        self.timers.clear(&TimerKey::Connect);
        let message = ClientMessage::handshake([PROTOCOL_VERSION]);
        let (frozen, frame) = match encode(&message) {
            Ok(encoded) => encoded,
            Err(_) => return vec![],
        };
        if self.harness.send(&frame).is_err() {
            // The harness entered its failed state; the failure event is
            // already queued and surfaces on the next poll.
            self.clear_session();
            self.state = ConversationState::Failed;
            return vec![];
        }
        self.handshake_request = Some(frozen);
        self.handshake = HandshakePhase::AwaitingResponse;
        if self.options.response_timeout > Duration::ZERO {
            self.timers.arm(
                TimerKey::Handshake,
                Instant::now() + self.options.response_timeout,
            );
        }
        tracing::debug!("handshake sent");
        vec![]
    }

    // =========================================================================
    // Message ingestion
    // =========================================================================

    fn handle_message(&mut self, frame: String) -> Vec<ConversationEvent> {
        let parsed: Value = match serde_json::from_str(&frame) {
            Ok(value) => value,
            Err(error) => {
                return self.teardown(Some(ClientError::ServerMessage {
                    violation: ServerMessageViolation::Parse {
                        detail: error.to_string(),
                    },
                    server_message: RawServerMessage::Text(Arc::from(frame.as_str())),
                }))
            }
        };
        if let Err(violation) = validate_server_message(&parsed) {
            return self.teardown(Some(ClientError::ServerMessage {
                violation: ServerMessageViolation::Schema(violation),
                server_message: RawServerMessage::Json(Arc::new(parsed)),
            }));
        }
        let frozen = Arc::new(parsed);
        let message = match ServerMessage::deserialize(&*frozen) {
            Ok(message) => message,
            Err(error) => {
                return self.unexpected(frozen, format!("undecodable message: {}", error))
            }
        };
        self.dispatch(message, frozen)
    }

    fn dispatch(&mut self, message: ServerMessage, frozen: Arc<Value>) -> Vec<ConversationEvent> {
        match message {
            ServerMessage::HandshakeResponse { success, version } => {
                self.handle_handshake_response(success, version, frozen)
            }
            ServerMessage::ViolationResponse { diagnostics } => {
                if self.state != ConversationState::Connected {
                    return self.unexpected(frozen, "ViolationResponse before the handshake");
                }
                tracing::error!("server reported a protocol violation");
                self.teardown(Some(ClientError::ViolationResponse {
                    diagnostics: Arc::new(diagnostics),
                }))
            }
            ServerMessage::ActionResponse {
                callback_id,
                success,
                action_data,
                error_code,
                error_data,
            } => self.handle_action_response(
                callback_id,
                success,
                action_data,
                error_code,
                error_data,
                frozen,
            ),
            ServerMessage::FeedOpenResponse {
                feed_name,
                feed_args,
                success,
                feed_data,
                error_code,
                error_data,
            } => self.handle_feed_open_response(
                FeedIdentity::from_parts(feed_name, feed_args),
                success,
                feed_data,
                error_code,
                error_data,
                frozen,
            ),
            ServerMessage::FeedCloseResponse {
                feed_name,
                feed_args,
            } => self.handle_feed_close_response(
                FeedIdentity::from_parts(feed_name, feed_args),
                frozen,
            ),
            ServerMessage::FeedAction {
                feed_name,
                feed_args,
                action_name,
                action_data,
                feed_deltas,
                feed_md5,
            } => self.handle_feed_action(
                FeedIdentity::from_parts(feed_name, feed_args),
                action_name,
                action_data,
                feed_deltas,
                feed_md5,
                frozen,
            ),
            ServerMessage::FeedTermination {
                feed_name,
                feed_args,
                error_code,
                error_data,
            } => self.handle_feed_termination(
                FeedIdentity::from_parts(feed_name, feed_args),
                error_code,
                error_data,
                frozen,
            ),
        }
    }

    fn handle_handshake_response(
        &mut self,
        success: bool,
        version: Option<String>,
        frozen: Arc<Value>,
    ) -> Vec<ConversationEvent> {
        if self.state != ConversationState::Connecting
            || self.handshake != HandshakePhase::AwaitingResponse
        {
            return self.unexpected(frozen, "HandshakeResponse was not expected");
        }
        if !success {
            // No retry with other versions; one offer, one answer.
            return self.teardown(Some(ClientError::Handshake));
        }
        match version.as_deref() {
            Some(PROTOCOL_VERSION) => {
                self.timers.clear(&TimerKey::Handshake);
                self.handshake = HandshakePhase::Complete;
                self.handshake_request = None;
                self.state = ConversationState::Connected;
                tracing::info!(version = PROTOCOL_VERSION, "connected");
                vec![ConversationEvent::Connected]
            }
            other => {
                let detail = format!("server accepted unoffered version {:?}", other);
                self.unexpected(frozen, detail)
            }
        }
    }

    fn handle_action_response(
        &mut self,
        callback_id: String,
        success: bool,
        action_data: Option<Value>,
        error_code: Option<String>,
        error_data: Option<Value>,
        frozen: Arc<Value>,
    ) -> Vec<ConversationEvent> {
        if self.state != ConversationState::Connected {
            return self.unexpected(frozen, "ActionResponse before the handshake");
        }
        if self.pending_actions.remove(&callback_id).is_none() {
            return self.unexpected(
                frozen,
                format!("ActionResponse for unknown callback id {}", callback_id),
            );
        }
        self.timers.clear(&TimerKey::Action(callback_id.clone()));
        if success {
            match action_data {
                Some(data) => vec![ConversationEvent::ActionSuccess {
                    callback_id,
                    data: Arc::new(data),
                }],
                None => self.unexpected(frozen, "successful ActionResponse without ActionData"),
            }
        } else {
            match (error_code, error_data) {
                (Some(code), Some(data)) => vec![ConversationEvent::ActionFailure {
                    callback_id,
                    error: ClientError::Rejection {
                        code,
                        data: Arc::new(data),
                    },
                }],
                _ => self.unexpected(frozen, "failed ActionResponse without error fields"),
            }
        }
    }

    fn handle_feed_open_response(
        &mut self,
        feed: FeedIdentity,
        success: bool,
        feed_data: Option<Value>,
        error_code: Option<String>,
        error_data: Option<Value>,
        frozen: Arc<Value>,
    ) -> Vec<ConversationEvent> {
        if self.state != ConversationState::Connected {
            return self.unexpected(frozen, "FeedOpenResponse before the handshake");
        }
        let serial = feed.serial();
        match self.feeds.get(&serial) {
            Some(FeedPhase::Opening { .. }) => {}
            _ => {
                return self.unexpected(
                    frozen,
                    format!("FeedOpenResponse for feed {} which is not opening", serial),
                )
            }
        }
        self.timers.clear(&TimerKey::Feed(serial.clone()));
        if success {
            let data = match feed_data {
                Some(data) => Arc::new(data),
                None => {
                    return self
                        .unexpected(frozen, "successful FeedOpenResponse without FeedData")
                }
            };
            self.feeds.insert(
                serial.clone(),
                FeedPhase::Open {
                    data: Arc::clone(&data),
                },
            );
            tracing::debug!(feed = %feed, "feed open");
            vec![ConversationEvent::FeedOpenSuccess { feed, data }]
        } else {
            self.feeds.remove(&serial);
            match (error_code, error_data) {
                (Some(code), Some(data)) => vec![ConversationEvent::FeedOpenFailure {
                    feed,
                    error: ClientError::Rejection {
                        code,
                        data: Arc::new(data),
                    },
                }],
                _ => self.unexpected(frozen, "failed FeedOpenResponse without error fields"),
            }
        }
    }

    fn handle_feed_close_response(
        &mut self,
        feed: FeedIdentity,
        frozen: Arc<Value>,
    ) -> Vec<ConversationEvent> {
        if self.state != ConversationState::Connected {
            return self.unexpected(frozen, "FeedCloseResponse before the handshake");
        }
        let serial = feed.serial();
        match self.feeds.get(&serial) {
            Some(FeedPhase::Closing { .. }) | Some(FeedPhase::Terminated) => {}
            _ => {
                return self.unexpected(
                    frozen,
                    format!("FeedCloseResponse for feed {} which is not closing", serial),
                )
            }
        }
        self.timers.clear(&TimerKey::Feed(serial.clone()));
        self.feeds.remove(&serial);
        tracing::debug!(feed = %feed, "feed closed");
        vec![ConversationEvent::FeedCloseSuccess { feed }]
    }

    fn handle_feed_action(
        &mut self,
        feed: FeedIdentity,
        action_name: String,
        action_data: Value,
        feed_deltas: Vec<feedlink_core::delta::Delta>,
        feed_md5: Option<String>,
        frozen: Arc<Value>,
    ) -> Vec<ConversationEvent> {
        if self.state != ConversationState::Connected {
            return self.unexpected(frozen, "FeedAction before the handshake");
        }
        let serial = feed.serial();
        let old_data = match self.feeds.get(&serial) {
            // A revelation racing our FeedClose is discarded quietly.
            Some(FeedPhase::Closing { .. }) => return vec![],
            Some(FeedPhase::Open { data }) => Arc::clone(data),
            _ => {
                return self.unexpected(
                    frozen,
                    format!("FeedAction for feed {} which is not open", serial),
                )
            }
        };
        let new_data = match apply_deltas(&old_data, &feed_deltas) {
            Ok(data) => data,
            Err(error) => {
                return self.teardown(Some(ClientError::ServerMessage {
                    violation: ServerMessageViolation::Delta(error),
                    server_message: RawServerMessage::Json(frozen),
                }))
            }
        };
        if let Some(expected) = feed_md5 {
            let computed = feed_data_hash(&new_data);
            if computed != expected {
                tracing::error!(feed = %feed, "feed data hash mismatch");
                return self.teardown(Some(ClientError::ServerMessage {
                    violation: ServerMessageViolation::FeedIntegrity { expected, computed },
                    server_message: RawServerMessage::Json(frozen),
                }));
            }
        }
        let new_data = Arc::new(new_data);
        self.feeds.insert(
            serial,
            FeedPhase::Open {
                data: Arc::clone(&new_data),
            },
        );
        vec![ConversationEvent::FeedAction {
            feed,
            action_name,
            action_data: Arc::new(action_data),
            new_data,
            old_data,
        }]
    }

    fn handle_feed_termination(
        &mut self,
        feed: FeedIdentity,
        error_code: String,
        error_data: Value,
        frozen: Arc<Value>,
    ) -> Vec<ConversationEvent> {
        if self.state != ConversationState::Connected {
            return self.unexpected(frozen, "FeedTermination before the handshake");
        }
        let serial = feed.serial();
        match self.feeds.get(&serial) {
            Some(FeedPhase::Open { .. }) => {
                self.feeds.remove(&serial);
                tracing::warn!(feed = %feed, code = %error_code, "feed terminated");
                vec![ConversationEvent::FeedTermination {
                    feed,
                    error: ClientError::Termination {
                        code: error_code,
                        data: Arc::new(error_data),
                    },
                }]
            }
            Some(FeedPhase::Closing { .. }) => {
                // The protocol still owes us a FeedCloseResponse; hide the
                // termination and keep presenting the feed as closing.
                self.feeds.insert(serial, FeedPhase::Terminated);
                vec![]
            }
            _ => self.unexpected(
                frozen,
                format!("FeedTermination for feed {} which is not open", serial),
            ),
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Earliest deadline among response timers and the harness watchdog.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        match (self.timers.next_deadline(), self.harness.watchdog_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Fires whatever is due at `now`.
    pub(crate) fn poll_deadline(&mut self, now: Instant) -> Vec<ConversationEvent> {
        if let Some(event) = self.harness.poll_watchdog(now) {
            return self.handle_harness_event(event);
        }
        let Some(key) = self.timers.pop_due(now) else {
            return vec![];
        };
        let timeout = self.options.response_timeout;
        match key {
            TimerKey::Connect => {
                tracing::warn!("transport did not connect in time");
                self.teardown(Some(ClientError::connection("transport did not connect", None)))
            }
            TimerKey::Handshake => {
                let request = frozen_or_null(self.handshake_request.clone());
                tracing::warn!("handshake response timed out");
                self.teardown(Some(ClientError::ResponseTimeout { timeout, request }))
            }
            TimerKey::Action(callback_id) => {
                let request = frozen_or_null(self.pending_actions.remove(&callback_id));
                let error = ClientError::ResponseTimeout { timeout, request };
                tracing::warn!(callback_id, "action response timed out");
                let mut events = vec![ConversationEvent::ActionTimeout {
                    callback_id,
                    error: error.clone(),
                }];
                events.extend(self.teardown(Some(error)));
                events
            }
            TimerKey::Feed(serial) => {
                let request = match self.feeds.get(&serial) {
                    Some(FeedPhase::Opening { request }) | Some(FeedPhase::Closing { request }) => {
                        Arc::clone(request)
                    }
                    _ => Arc::new(Value::Null),
                };
                tracing::warn!(feed = %serial, "feed response timed out");
                self.teardown(Some(ClientError::ResponseTimeout { timeout, request }))
            }
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Clears everything synchronously and starts disconnecting.
    fn teardown(&mut self, error: Option<ClientError>) -> Vec<ConversationEvent> {
        if let Some(error) = &error {
            tracing::warn!(error = %error, "tearing down the connection");
        }
        self.clear_session();
        self.state = ConversationState::Disconnecting;
        match self.harness.disconnect() {
            Ok(()) => vec![ConversationEvent::Disconnecting { error }],
            Err(_) => {
                // Harness failure; the terminal event surfaces via the pump.
                self.state = ConversationState::Failed;
                vec![]
            }
        }
    }

    fn unexpected(
        &mut self,
        frozen: Arc<Value>,
        detail: impl Into<String>,
    ) -> Vec<ConversationEvent> {
        self.teardown(Some(ClientError::ServerMessage {
            violation: ServerMessageViolation::Unexpected {
                detail: detail.into(),
            },
            server_message: RawServerMessage::Json(frozen),
        }))
    }

    fn method_failure(&mut self, error: ClientError) -> ClientError {
        if error.is_terminal() {
            self.clear_session();
            self.state = ConversationState::Failed;
        }
        error
    }

    fn clear_session(&mut self) {
        self.timers.clear_all();
        self.pending_actions.clear();
        self.feeds.clear();
        self.handshake = HandshakePhase::Idle;
        self.handshake_request = None;
    }

}

fn frozen_or_null(request: Option<Arc<Value>>) -> Arc<Value> {
    request.unwrap_or_else(|| Arc::new(Value::Null))
}

fn encode(message: &ClientMessage) -> Result<(Arc<Value>, String), ClientError> {
    let value = serde_json::to_value(message)
        .map_err(|error| ClientError::argument(format!("could not encode message: {}", error)))?;
    let frame = value.to_string();
    Ok((Arc::new(value), frame))
}
