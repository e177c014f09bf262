//! The coordinator: ordered fan-out of conversation events to the app.
//!
//! The coordinator multiplexes many app-visible feed objects onto single
//! server feeds and turns the conversation's event stream into application
//! invocations with documented ordering. Every application-visible
//! invocation is deferred through a strict-priority [`TaskQueue`]; the
//! driver runs one op per macrotask.
//!
//! ## Tiers
//!
//! | Tier | Content |
//! |------|---------|
//! | 0    | Invoking stored close responders of a dispatched app close |
//! | 1    | Emitting the close event of an app-initiated feed close |
//! | 2    | Sub-invocations scheduled by the event currently processing |
//! | 3    | Resolving an app `feed()` call once the master feed is open |
//! | 4    | The next pending conversation event, in arrival order |
//!
//! Pending events process in arrival order (tier 4); the event underway may
//! schedule sub-invocations that must run before the next pending event
//! (tier 2); an app-initiated feed close pre-empts conversation work so
//! closes complete even across disconnects (tiers 0 and 1); fresh feed-open
//! resolutions wait for the underway event so existing feed objects observe
//! the newest master state first (tier 3).
//!
//! ## Suppression
//!
//! Once the app calls `disconnect()`, every tier-3/4 emission and
//! application callback is suppressed - state bookkeeping still runs - until
//! the `disconnecting` op clears the flag. This guarantees that after
//! `disconnect()` the next app-visible events are `disconnecting` then
//! `disconnected`, never an interleaved action result or feed event.
//! Suppressed responders stay in the database so the `disconnecting` op can
//! drain them with a connection error.

mod db;
mod queue;

pub(crate) use db::{
    ActionResponder, CloseResponder, ConnectResponder, CoordinatorDb, DisconnectResponder,
    FeedObjectPhase, FeedOpened, OpenResponder,
};

use crate::client::{ClientEvent, ClientState, FeedEvent, FeedObjectState};
use crate::conversation::{Conversation, ConversationEvent, ConversationState, ServerFeedState};
use crate::error::ClientError;
use crate::transport::EventWaker;
use feedlink_core::feed::FeedIdentity;
use feedlink_core::id::next_id;
use queue::TaskQueue;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;

const TIER_CLOSE_CALLBACKS: u8 = 0;
const TIER_APP_FEED_CLOSE: u8 = 1;
const TIER_EVENT_UNDERWAY: u8 = 2;
const TIER_APP_FEED_OPEN: u8 = 3;
const TIER_EVENT_PENDING: u8 = 4;

/// A deferred coordinator invocation. The tier is derived from the op kind,
/// never supplied by callers.
enum Op {
    /// Drain the feed-object-close responder list.
    DrainCloseCallbacks,
    /// Emit the close event of an app-initiated feed object close.
    FinishFeedObjectClose { object_id: u64 },
    /// A sub-invocation of the event underway.
    Sub(SubOp),
    /// Resolve an app `feed()` call from the master feed state.
    ResolveFeedObjectOpen { object_id: u64 },
    /// Process the next pending conversation event.
    Event(ConversationEvent),
}

impl Op {
    fn tier(&self) -> u8 {
        match self {
            Op::DrainCloseCallbacks => TIER_CLOSE_CALLBACKS,
            Op::FinishFeedObjectClose { .. } => TIER_APP_FEED_CLOSE,
            Op::Sub(_) => TIER_EVENT_UNDERWAY,
            Op::ResolveFeedObjectOpen { .. } => TIER_APP_FEED_OPEN,
            Op::Event(_) => TIER_EVENT_PENDING,
        }
    }
}

/// Sub-invocations scheduled by tier-4 ops. Each re-checks database state
/// (and the suppression flag, where applicable) at run time.
enum SubOp {
    /// Resolve the oldest pending connect responder with success.
    PopConnectCallback,
    /// Transition to connected and emit the event.
    AnnounceConnected,
    /// Mark an opening feed object open and resolve its `feed()` call.
    OpenFeedObject { object_id: u64 },
    /// Close an opening feed object and reject its `feed()` call.
    FailFeedObjectOpen { object_id: u64, error: ClientError },
    /// Emit an action revelation on an open feed object.
    EmitFeedObjectAction {
        object_id: u64,
        action_name: String,
        action_data: Arc<Value>,
        new_data: Arc<Value>,
        old_data: Arc<Value>,
    },
    /// Close an open feed object with a termination error.
    TerminateFeedObject { object_id: u64, error: ClientError },
    /// Disconnect drain: reject a pending action responder.
    AbortActionCallback { callback_id: u64, error: ClientError },
    /// Disconnect drain: close an opening object and reject its open.
    AbortFeedObjectOpen { object_id: u64, error: ClientError },
    /// Disconnect drain: close an open object with a connection error.
    LoseFeedObject { object_id: u64, error: ClientError },
    /// Disconnect drain: resolve the oldest connect responder with the
    /// teardown error, or success when the app asked for the disconnect.
    PopConnectCallbackWith { error: Option<ClientError> },
    /// Clear the suppression flag, transition, and emit `disconnecting`.
    AnnounceDisconnecting { error: Option<ClientError> },
    /// Resolve the oldest pending disconnect responder.
    PopDisconnectCallback,
    /// Transition to disconnected and emit the event.
    AnnounceDisconnected,
}

/// Coordinator state machine; owned and pumped by the driver task.
pub(crate) struct Coordinator {
    conversation: Conversation,
    db: CoordinatorDb,
    queue: TaskQueue<Op>,
    state: ClientState,
    disconnect_called: bool,
    events: broadcast::Sender<ClientEvent>,
}

impl Coordinator {
    /// Creates a coordinator over a conversation.
    pub(crate) fn new(conversation: Conversation, events: broadcast::Sender<ClientEvent>) -> Self {
        Self {
            conversation,
            db: CoordinatorDb::new(),
            queue: TaskQueue::new(),
            state: ClientState::Disconnected,
            disconnect_called: false,
            events,
        }
    }

    // =========================================================================
    // Application-facing operations
    // =========================================================================

    /// Starts connecting, or joins an in-flight attempt.
    pub(crate) fn connect(&mut self, responder: ConnectResponder) {
        // Events the transport already queued happened before this call.
        self.pump_transport();
        match self.conversation.state() {
            ConversationState::Disconnected => match self.conversation.connect() {
                Ok(events) => {
                    self.db.push_connect_callback(responder);
                    self.enqueue_events(events);
                }
                Err(error) => {
                    let _ = responder.send(Err(error));
                }
            },
            ConversationState::Connecting => {
                self.db.push_connect_callback(responder);
            }
            other => {
                let _ = responder.send(Err(ClientError::state(format!(
                    "connect() requires a disconnected client (currently {:?})",
                    other
                ))));
            }
        }
    }

    /// Starts disconnecting and raises the suppression flag.
    pub(crate) fn disconnect(&mut self, responder: DisconnectResponder) {
        self.pump_transport();
        match self.conversation.state() {
            ConversationState::Connecting | ConversationState::Connected => {
                match self.conversation.disconnect() {
                    Ok(events) => {
                        self.db.push_disconnect_callback(responder);
                        self.disconnect_called = true;
                        self.enqueue_events(events);
                    }
                    Err(error) => {
                        let _ = responder.send(Err(error));
                    }
                }
            }
            other => {
                let _ = responder.send(Err(ClientError::state(format!(
                    "disconnect() requires a connecting or connected client (currently {:?})",
                    other
                ))));
            }
        }
    }

    /// Invokes a server action.
    pub(crate) fn action(&mut self, name: &str, args: Value, responder: ActionResponder) {
        self.pump_transport();
        if self.conversation.state() != ConversationState::Connected {
            let _ = responder.send(Err(ClientError::state(
                "action() requires a connected client",
            )));
            return;
        }
        let callback_id = next_id();
        match self
            .conversation
            .action(&callback_id.to_string(), name, args)
        {
            Ok(events) => {
                self.db.insert_action_callback(callback_id, responder);
                self.enqueue_events(events);
            }
            Err(error) => {
                let _ = responder.send(Err(error));
            }
        }
    }

    /// Creates a feed object, opening the server feed if necessary.
    pub(crate) fn feed_open(&mut self, feed: FeedIdentity, responder: OpenResponder) {
        self.pump_transport();
        if self.conversation.state() != ConversationState::Connected {
            let _ = responder.send(Err(ClientError::state(
                "feed() requires a connected client",
            )));
            return;
        }
        if self.conversation.feed_state(&feed) == ServerFeedState::Closed {
            if let Err(error) = self.conversation.feed_open(&feed) {
                let _ = responder.send(Err(error));
                return;
            }
        }
        let object_id = self.db.new_feed_object(feed, responder);
        self.queue
            .push(TIER_APP_FEED_OPEN, Op::ResolveFeedObjectOpen { object_id });
    }

    /// Closes a feed object; its close event pre-empts conversation work.
    pub(crate) fn feed_close(&mut self, object_id: u64, responder: CloseResponder) {
        self.pump_transport();
        let phase = self.db.object_phase(object_id);
        match phase {
            Some(FeedObjectPhase::Open) | Some(FeedObjectPhase::Closing) => {}
            _ => {
                let _ = responder.send(Err(ClientError::state("feed object is not open")));
                return;
            }
        }
        self.db.push_close_callback(responder);
        if phase == Some(FeedObjectPhase::Closing) {
            // Duplicate close; the queued close op drains this responder too.
            return;
        }
        let identity = self.db.object_identity(object_id);
        let serial = self.db.object_serial(object_id);
        self.db.set_object_closing(object_id);
        if let (Some(identity), Some(serial)) = (identity, serial) {
            if !self.db.desired_open(&serial)
                && self.conversation.state() == ConversationState::Connected
                && self.conversation.feed_state(&identity) == ServerFeedState::Open
            {
                if let Err(error) = self.conversation.feed_close(&identity) {
                    tracing::debug!(error = %error, "feed close not sent");
                }
            }
        }
        self.queue
            .push(TIER_APP_FEED_CLOSE, Op::FinishFeedObjectClose { object_id });
    }

    /// External state of a feed object: open iff open or closing.
    pub(crate) fn feed_object_state(&self, object_id: u64) -> FeedObjectState {
        match self.db.object_phase(object_id) {
            Some(FeedObjectPhase::Open) | Some(FeedObjectPhase::Closing) => FeedObjectState::Open,
            _ => FeedObjectState::Closed,
        }
    }

    /// Data snapshot of an open feed object.
    pub(crate) fn feed_object_data(&self, object_id: u64) -> Option<Arc<Value>> {
        self.db.object_data(object_id)
    }

    /// Outward client state.
    pub(crate) fn client_state(&self) -> ClientState {
        self.state
    }

    // =========================================================================
    // Driver plumbing
    // =========================================================================

    /// Waker for queued transport events.
    pub(crate) fn waker(&self) -> EventWaker {
        self.conversation.waker()
    }

    /// Validates queued transport events and enqueues the results.
    pub(crate) fn pump_transport(&mut self) {
        let events = self.conversation.poll_transport();
        self.enqueue_events(events);
    }

    /// Earliest conversation deadline (response timers, watchdog).
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.conversation.next_deadline()
    }

    /// Fires due timers and enqueues the results.
    pub(crate) fn handle_deadline(&mut self) {
        let events = self.conversation.poll_deadline(Instant::now());
        self.enqueue_events(events);
    }

    /// Returns true if ops are queued.
    pub(crate) fn has_work(&self) -> bool {
        !self.queue.is_empty()
    }

    fn enqueue_events(&mut self, events: Vec<ConversationEvent>) {
        for event in events {
            let op = Op::Event(event);
            self.queue.push(op.tier(), op);
        }
    }

    fn schedule(&mut self, sub: SubOp) {
        let op = Op::Sub(sub);
        self.queue.push(op.tier(), op);
    }

    fn emit(&self, event: ClientEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Runs one queued op. Returns true if the op performed observable
    /// application-facing work; the driver yields only then.
    pub(crate) fn run_one(&mut self) -> bool {
        let Some(op) = self.queue.pop() else {
            return false;
        };
        match op {
            Op::DrainCloseCallbacks => {
                let drained = self.db.drain_close_callbacks();
                let observable = !drained.is_empty();
                for responder in drained {
                    let _ = responder.send(Ok(()));
                }
                observable
            }
            Op::FinishFeedObjectClose { object_id } => self.finish_feed_object_close(object_id),
            Op::Sub(sub) => self.run_sub(sub),
            Op::ResolveFeedObjectOpen { object_id } => self.resolve_feed_object_open(object_id),
            Op::Event(event) => self.run_event(event),
        }
    }

    // =========================================================================
    // Op bodies
    // =========================================================================

    fn finish_feed_object_close(&mut self, object_id: u64) -> bool {
        if self.db.object_phase(object_id) != Some(FeedObjectPhase::Closing) {
            return false;
        }
        let events = self.db.object_events(object_id);
        self.db.close_object(object_id);
        if let Some(events) = events {
            let _ = events.send(FeedEvent::Closed(None));
        }
        self.queue
            .push(TIER_CLOSE_CALLBACKS, Op::DrainCloseCallbacks);
        true
    }

    fn resolve_feed_object_open(&mut self, object_id: u64) -> bool {
        if self.disconnect_called {
            return false;
        }
        if self.db.object_phase(object_id) != Some(FeedObjectPhase::Opening) {
            return false;
        }
        let Some(serial) = self.db.object_serial(object_id) else {
            return false;
        };
        let Some(data) = self.db.master_data(&serial) else {
            // Master is closed; a server response will resolve this object.
            return false;
        };
        self.resolve_opener(object_id, data)
    }

    fn resolve_opener(&mut self, object_id: u64, data: Arc<Value>) -> bool {
        match self.db.open_object(object_id, Arc::clone(&data)) {
            Some((opener, events)) => {
                let _ = opener.send(Ok(FeedOpened {
                    object_id,
                    data,
                    events,
                }));
                true
            }
            None => false,
        }
    }

    fn run_sub(&mut self, sub: SubOp) -> bool {
        match sub {
            SubOp::PopConnectCallback => {
                if self.disconnect_called {
                    return false;
                }
                match self.db.pop_connect_callback() {
                    Some(responder) => {
                        let _ = responder.send(Ok(()));
                        true
                    }
                    None => false,
                }
            }
            SubOp::AnnounceConnected => {
                if self.disconnect_called {
                    return false;
                }
                self.state = ClientState::Connected;
                self.emit(ClientEvent::Connected);
                true
            }
            SubOp::OpenFeedObject { object_id } => {
                if self.disconnect_called {
                    return false;
                }
                let Some(serial) = self.db.object_serial(object_id) else {
                    return false;
                };
                // Read the master at run time: a later revelation may have
                // advanced the data since this op was scheduled.
                let Some(data) = self.db.master_data(&serial) else {
                    return false;
                };
                self.resolve_opener(object_id, data)
            }
            SubOp::FailFeedObjectOpen { object_id, error } => {
                if self.disconnect_called {
                    return false;
                }
                if self.db.object_phase(object_id) != Some(FeedObjectPhase::Opening) {
                    return false;
                }
                match self.db.close_object(object_id) {
                    Some(opener) => {
                        let _ = opener.send(Err(error));
                        true
                    }
                    None => false,
                }
            }
            SubOp::EmitFeedObjectAction {
                object_id,
                action_name,
                action_data,
                new_data,
                old_data,
            } => {
                if self.disconnect_called {
                    return false;
                }
                if self.db.object_phase(object_id) != Some(FeedObjectPhase::Open) {
                    return false;
                }
                self.db.set_object_data(object_id, Arc::clone(&new_data));
                if let Some(events) = self.db.object_events(object_id) {
                    let _ = events.send(FeedEvent::Action {
                        action_name,
                        action_data,
                        new_data,
                        old_data,
                    });
                    true
                } else {
                    false
                }
            }
            SubOp::TerminateFeedObject { object_id, error } => {
                if self.disconnect_called {
                    return false;
                }
                if self.db.object_phase(object_id) != Some(FeedObjectPhase::Open) {
                    return false;
                }
                let events = self.db.object_events(object_id);
                self.db.close_object(object_id);
                if let Some(events) = events {
                    let _ = events.send(FeedEvent::Closed(Some(error)));
                }
                true
            }
            SubOp::AbortActionCallback { callback_id, error } => {
                match self.db.pull_action_callback(callback_id) {
                    Some(responder) => {
                        let _ = responder.send(Err(error));
                        true
                    }
                    None => false,
                }
            }
            SubOp::AbortFeedObjectOpen { object_id, error } => {
                if self.db.object_phase(object_id) != Some(FeedObjectPhase::Opening) {
                    return false;
                }
                match self.db.close_object(object_id) {
                    Some(opener) => {
                        let _ = opener.send(Err(error));
                        true
                    }
                    None => false,
                }
            }
            SubOp::LoseFeedObject { object_id, error } => {
                if self.db.object_phase(object_id) != Some(FeedObjectPhase::Open) {
                    return false;
                }
                let events = self.db.object_events(object_id);
                self.db.close_object(object_id);
                if let Some(events) = events {
                    let _ = events.send(FeedEvent::Closed(Some(error)));
                }
                true
            }
            SubOp::PopConnectCallbackWith { error } => {
                match self.db.pop_connect_callback() {
                    Some(responder) => {
                        let result = match error {
                            Some(error) => Err(error),
                            // App-initiated: the attempt ended without an
                            // error to report.
                            None => Ok(()),
                        };
                        let _ = responder.send(result);
                        true
                    }
                    None => false,
                }
            }
            SubOp::AnnounceDisconnecting { error } => {
                self.disconnect_called = false;
                self.state = ClientState::Disconnecting;
                self.emit(ClientEvent::Disconnecting(error.map(Arc::new)));
                true
            }
            SubOp::PopDisconnectCallback => match self.db.pop_disconnect_callback() {
                Some(responder) => {
                    let _ = responder.send(Ok(()));
                    true
                }
                None => false,
            },
            SubOp::AnnounceDisconnected => {
                self.state = ClientState::Disconnected;
                self.emit(ClientEvent::Disconnected);
                true
            }
        }
    }

    fn run_event(&mut self, event: ConversationEvent) -> bool {
        match event {
            ConversationEvent::Connecting => {
                self.state = ClientState::Connecting;
                if self.disconnect_called {
                    return false;
                }
                self.emit(ClientEvent::Connecting);
                true
            }
            ConversationEvent::Connected => {
                if self.disconnect_called {
                    return false;
                }
                for _ in 0..self.db.connect_callback_count() {
                    self.schedule(SubOp::PopConnectCallback);
                }
                self.schedule(SubOp::AnnounceConnected);
                false
            }
            ConversationEvent::ActionSuccess { callback_id, data } => {
                self.settle_action(&callback_id, Ok(data))
            }
            ConversationEvent::ActionFailure { callback_id, error } => {
                self.settle_action(&callback_id, Err(error))
            }
            ConversationEvent::ActionTimeout { callback_id, error } => {
                self.settle_action(&callback_id, Err(error))
            }
            ConversationEvent::FeedOpenSuccess { feed, data } => {
                let serial = feed.serial();
                self.db.set_master_open(serial.clone(), data);
                if !self.disconnect_called {
                    for object_id in self.db.objects_in(&serial, FeedObjectPhase::Opening) {
                        self.schedule(SubOp::OpenFeedObject { object_id });
                    }
                }
                // Every interested object may have closed while the open was
                // in flight; bring the server feed back in line.
                if !self.db.desired_open(&serial)
                    && self.conversation.state() == ConversationState::Connected
                    && self.conversation.feed_state(&feed) == ServerFeedState::Open
                {
                    if let Err(error) = self.conversation.feed_close(&feed) {
                        tracing::debug!(error = %error, "feed close not sent");
                    }
                }
                false
            }
            ConversationEvent::FeedOpenFailure { feed, error } => {
                let serial = feed.serial();
                self.db.set_master_closed(&serial);
                if !self.disconnect_called {
                    for object_id in self.db.objects_in(&serial, FeedObjectPhase::Opening) {
                        self.schedule(SubOp::FailFeedObjectOpen {
                            object_id,
                            error: error.clone(),
                        });
                    }
                }
                false
            }
            ConversationEvent::FeedCloseSuccess { feed } => {
                let serial = feed.serial();
                self.db.set_master_closed(&serial);
                // Objects opened while the close was in flight; reopen
                // immediately rather than through the queue.
                if self.db.desired_open(&serial)
                    && self.conversation.state() == ConversationState::Connected
                    && self.conversation.feed_state(&feed) == ServerFeedState::Closed
                {
                    if let Err(error) = self.conversation.feed_open(&feed) {
                        tracing::debug!(error = %error, "feed reopen not sent");
                    }
                }
                false
            }
            ConversationEvent::FeedAction {
                feed,
                action_name,
                action_data,
                new_data,
                old_data,
            } => {
                let serial = feed.serial();
                self.db.set_master_data(&serial, Arc::clone(&new_data));
                if !self.disconnect_called {
                    for object_id in self.db.objects_in(&serial, FeedObjectPhase::Open) {
                        self.schedule(SubOp::EmitFeedObjectAction {
                            object_id,
                            action_name: action_name.clone(),
                            action_data: Arc::clone(&action_data),
                            new_data: Arc::clone(&new_data),
                            old_data: Arc::clone(&old_data),
                        });
                    }
                }
                false
            }
            ConversationEvent::FeedTermination { feed, error } => {
                let serial = feed.serial();
                self.db.set_master_closed(&serial);
                if !self.disconnect_called {
                    for object_id in self.db.objects_in(&serial, FeedObjectPhase::Open) {
                        self.schedule(SubOp::TerminateFeedObject {
                            object_id,
                            error: error.clone(),
                        });
                    }
                }
                false
            }
            ConversationEvent::Disconnecting { error } => {
                self.db.close_all_masters();
                for callback_id in self.db.action_callback_ids() {
                    self.schedule(SubOp::AbortActionCallback {
                        callback_id,
                        error: ClientError::connection_lost(),
                    });
                }
                for object_id in self.db.all_objects_in(FeedObjectPhase::Opening) {
                    self.schedule(SubOp::AbortFeedObjectOpen {
                        object_id,
                        error: ClientError::connection_lost(),
                    });
                }
                // Open objects close with the cause of the teardown; an
                // app-initiated disconnect reads as a plain connection loss.
                let close_error = error.clone().unwrap_or_else(ClientError::connection_lost);
                for object_id in self.db.all_objects_in(FeedObjectPhase::Open) {
                    self.schedule(SubOp::LoseFeedObject {
                        object_id,
                        error: close_error.clone(),
                    });
                }
                for _ in 0..self.db.connect_callback_count() {
                    self.schedule(SubOp::PopConnectCallbackWith {
                        error: error.clone(),
                    });
                }
                self.schedule(SubOp::AnnounceDisconnecting { error });
                false
            }
            ConversationEvent::Disconnected => {
                for _ in 0..self.db.disconnect_callback_count() {
                    self.schedule(SubOp::PopDisconnectCallback);
                }
                self.schedule(SubOp::AnnounceDisconnected);
                false
            }
            ConversationEvent::Failed { error } => self.fail(error),
        }
    }

    fn settle_action(&mut self, callback_id: &str, result: Result<Arc<Value>, ClientError>) -> bool {
        if self.disconnect_called {
            // Leave the responder for the disconnecting drain.
            return false;
        }
        let Some(callback_id) = callback_id.parse::<u64>().ok() else {
            return false;
        };
        match self.db.pull_action_callback(callback_id) {
            Some(responder) => {
                let _ = responder.send(result);
                true
            }
            None => false,
        }
    }

    /// Terminal transport failure: resolve everything outstanding with the
    /// error, then announce it. The instance makes no further transport
    /// calls.
    fn fail(&mut self, error: ClientError) -> bool {
        self.disconnect_called = false;
        self.db.close_all_masters();
        for callback_id in self.db.action_callback_ids() {
            if let Some(responder) = self.db.pull_action_callback(callback_id) {
                let _ = responder.send(Err(error.clone()));
            }
        }
        for object_id in self.db.all_objects_in(FeedObjectPhase::Opening) {
            if let Some(opener) = self.db.close_object(object_id) {
                let _ = opener.send(Err(error.clone()));
            }
        }
        for object_id in self.db.all_objects_in(FeedObjectPhase::Open) {
            let events = self.db.object_events(object_id);
            self.db.close_object(object_id);
            if let Some(events) = events {
                let _ = events.send(FeedEvent::Closed(Some(error.clone())));
            }
        }
        while let Some(responder) = self.db.pop_connect_callback() {
            let _ = responder.send(Err(error.clone()));
        }
        while let Some(responder) = self.db.pop_disconnect_callback() {
            let _ = responder.send(Err(error.clone()));
        }
        for responder in self.db.drain_close_callbacks() {
            let _ = responder.send(Err(error.clone()));
        }
        self.state = ClientState::Failed;
        self.emit(ClientEvent::Failed(Arc::new(error)));
        true
    }
}
