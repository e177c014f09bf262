//! High-level Feedlink client.
//!
//! This module provides [`FeedlinkClient`], the application-facing handle,
//! and [`FeedHandle`], the handle to one feed subscription. Both talk to a
//! single driver task that owns the coordinator, the conversation, and the
//! transport; commands flow in over a channel, results flow back through
//! per-call responders, and events flow out through a broadcast channel
//! (client level) and per-feed-object channels (feed level).
//!
//! The driver runs at most one queued coordinator op per macrotask, yielding
//! to the scheduler after every op that performed observable work. That is
//! what preserves the documented ordering of callbacks and events across
//! suspension points.
//!
//! # Example
//!
//! ```ignore
//! use feedlink_client::{ClientOptions, FeedlinkClient, FeedEvent};
//! use feedlink_core::FeedIdentity;
//!
//! let client = FeedlinkClient::new(transport, ClientOptions::default());
//! client.connect().await?;
//!
//! let result = client.action("greet", serde_json::json!({"name": "ada"})).await?;
//!
//! let mut feed = client.feed(FeedIdentity::new("chat", [("room", "lobby")])).await?;
//! while let Some(event) = feed.next_event().await {
//!     match event {
//!         FeedEvent::Action { action_name, new_data, .. } => {
//!             println!("{}: {:?}", action_name, new_data);
//!         }
//!         FeedEvent::Closed(reason) => break,
//!     }
//! }
//! ```

use crate::config::ClientOptions;
use crate::conversation::Conversation;
use crate::coordinator::{
    ActionResponder, CloseResponder, ConnectResponder, Coordinator, DisconnectResponder,
    OpenResponder,
};
use crate::error::ClientError;
use crate::transport::{EventWaker, Transport};
use feedlink_core::feed::FeedIdentity;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

/// Outward client state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// No connection.
    Disconnected,
    /// Connecting: transport connect plus handshake.
    Connecting,
    /// Connected; actions and feeds are available.
    Connected,
    /// Disconnect underway.
    Disconnecting,
    /// The transport violated its contract; the client is dead.
    Failed,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientState::Disconnected => write!(f, "disconnected"),
            ClientState::Connecting => write!(f, "connecting"),
            ClientState::Connected => write!(f, "connected"),
            ClientState::Disconnecting => write!(f, "disconnecting"),
            ClientState::Failed => write!(f, "failed"),
        }
    }
}

/// External state of a feed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedObjectState {
    /// The object is open (or closing, which the app still observes as open).
    Open,
    /// The object is closed or never finished opening.
    Closed,
}

/// Client-level events, delivered through [`FeedlinkClient::subscribe`].
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The client started connecting.
    Connecting,
    /// The client is connected.
    Connected,
    /// The connection is going down; `None` when the app asked for it.
    Disconnecting(Option<Arc<ClientError>>),
    /// The connection is fully down.
    Disconnected,
    /// The transport violated its contract; terminal.
    Failed(Arc<ClientError>),
}

/// Feed-object events, delivered through [`FeedHandle::next_event`].
#[derive(Debug)]
pub enum FeedEvent {
    /// An action revelation mutated the feed data.
    Action {
        /// Name of the revealed action.
        action_name: String,
        /// Data attached to the revealed action.
        action_data: Arc<Value>,
        /// Feed data after the revelation.
        new_data: Arc<Value>,
        /// Feed data before the revelation.
        old_data: Arc<Value>,
    },
    /// The feed object closed. `None` for an app-initiated close; otherwise
    /// the termination or connection error that closed it.
    Closed(Option<ClientError>),
}

enum Command {
    Connect {
        responder: ConnectResponder,
    },
    Disconnect {
        responder: DisconnectResponder,
    },
    Action {
        name: String,
        args: Value,
        responder: ActionResponder,
    },
    FeedOpen {
        feed: FeedIdentity,
        responder: OpenResponder,
    },
    FeedClose {
        object_id: u64,
        responder: CloseResponder,
    },
    FeedObjectState {
        object_id: u64,
        responder: oneshot::Sender<FeedObjectState>,
    },
    FeedObjectData {
        object_id: u64,
        responder: oneshot::Sender<Option<Arc<Value>>>,
    },
    State {
        responder: oneshot::Sender<ClientState>,
    },
}

/// Handle to a Feedlink client.
///
/// Cloneable; all clones talk to the same driver task. The driver shuts
/// down when every handle (and every [`FeedHandle`]) is dropped.
#[derive(Clone)]
pub struct FeedlinkClient {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ClientEvent>,
}

impl FeedlinkClient {
    /// Creates a client over the given transport and spawns its driver task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: Box<dyn Transport>, options: ClientOptions) -> Self {
        let conversation = Conversation::new(transport, options);
        let (events, _) = broadcast::channel(256);
        let coordinator = Coordinator::new(conversation, events.clone());
        let transport_events = coordinator.waker();
        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(
            Driver {
                coordinator,
                commands: command_rx,
                transport_events,
            }
            .run(),
        );
        Self { commands, events }
    }

    /// Subscribes to client-level events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Connects to the server: transport connect plus protocol handshake.
    ///
    /// Resolves once connected. If the connection attempt ends first, the
    /// call resolves with the teardown error - or with `Ok(())` when the
    /// attempt was ended by a `disconnect()` call.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.request(|responder| Command::Connect { responder })
            .await?
    }

    /// Disconnects. Pending work resolves with connection errors before the
    /// `Disconnecting` event; this call resolves on `Disconnected`.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.request(|responder| Command::Disconnect { responder })
            .await?
    }

    /// Invokes a named server action and returns its result data.
    ///
    /// `args` must be a JSON object. Exactly one outcome is delivered:
    /// the action data, a [`ClientError::Rejection`], a
    /// [`ClientError::ResponseTimeout`], or a [`ClientError::Connection`].
    pub async fn action(&self, name: &str, args: Value) -> Result<Arc<Value>, ClientError> {
        self.request(|responder| Command::Action {
            name: name.to_string(),
            args,
            responder,
        })
        .await?
    }

    /// Opens a feed object on the given feed.
    ///
    /// Resolves with a [`FeedHandle`] once the feed is open. Many feed
    /// objects may share one server feed; the subscription is reference
    /// counted underneath.
    pub async fn feed(&self, feed: FeedIdentity) -> Result<FeedHandle, ClientError> {
        let opened = self
            .request(|responder| Command::FeedOpen {
                feed: feed.clone(),
                responder,
            })
            .await??;
        Ok(FeedHandle {
            object_id: opened.object_id,
            identity: feed,
            commands: self.commands.clone(),
            events: opened.events,
        })
    }

    /// Returns the outward client state.
    pub async fn state(&self) -> ClientState {
        self.request(|responder| Command::State { responder })
            .await
            .unwrap_or(ClientState::Failed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (responder, receiver) = oneshot::channel();
        self.commands
            .send(make(responder))
            .map_err(|_| ClientError::state("the client task is gone"))?;
        receiver
            .await
            .map_err(|_| ClientError::state("the client task is gone"))
    }
}

/// Handle to one feed object.
///
/// Externally the object is open until a [`FeedEvent::Closed`] is observed
/// (or [`FeedHandle::close`] resolves).
#[derive(Debug)]
pub struct FeedHandle {
    object_id: u64,
    identity: FeedIdentity,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<FeedEvent>,
}

impl FeedHandle {
    /// Opaque id of this feed object.
    pub fn id(&self) -> u64 {
        self.object_id
    }

    /// Identity of the feed this object subscribes to.
    pub fn identity(&self) -> &FeedIdentity {
        &self.identity
    }

    /// Waits for the next event on this feed object.
    ///
    /// Returns `None` once the stream ends (after a close).
    pub async fn next_event(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }

    /// Returns the next event if one is already queued.
    pub fn try_next_event(&mut self) -> Option<FeedEvent> {
        self.events.try_recv().ok()
    }

    /// Returns the external state of this feed object.
    pub async fn state(&self) -> FeedObjectState {
        self.request(|responder| Command::FeedObjectState {
            object_id: self.object_id,
            responder,
        })
        .await
        .unwrap_or(FeedObjectState::Closed)
    }

    /// Returns this feed object's data snapshot, if open.
    pub async fn data(&self) -> Option<Arc<Value>> {
        self.request(|responder| Command::FeedObjectData {
            object_id: self.object_id,
            responder,
        })
        .await
        .ok()
        .flatten()
    }

    /// Closes this feed object.
    ///
    /// The object's `Closed(None)` event is the next event it observes,
    /// even if a termination or disconnect is in flight; this call resolves
    /// once the close has been dispatched.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.request(|responder| Command::FeedClose {
            object_id: self.object_id,
            responder,
        })
        .await?
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (responder, receiver) = oneshot::channel();
        self.commands
            .send(make(responder))
            .map_err(|_| ClientError::state("the client task is gone"))?;
        receiver
            .await
            .map_err(|_| ClientError::state("the client task is gone"))
    }
}

// =============================================================================
// Driver
// =============================================================================

struct Driver {
    coordinator: Coordinator,
    commands: mpsc::UnboundedReceiver<Command>,
    transport_events: EventWaker,
}

impl Driver {
    async fn run(mut self) {
        tracing::debug!("client driver started");
        loop {
            // Conversation events reach the queue in transport-delivery
            // order before anything else happens this iteration.
            self.coordinator.pump_transport();
            let deadline = self.coordinator.next_deadline();
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                _ = self.transport_events.ready() => {}
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                    self.coordinator.handle_deadline();
                }
                _ = std::future::ready(()), if self.coordinator.has_work() => {
                    if self.coordinator.run_one() {
                        // One observable invocation per macrotask.
                        tokio::task::yield_now().await;
                    }
                }
            }
        }
        tracing::debug!("client driver stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { responder } => self.coordinator.connect(responder),
            Command::Disconnect { responder } => self.coordinator.disconnect(responder),
            Command::Action {
                name,
                args,
                responder,
            } => self.coordinator.action(&name, args, responder),
            Command::FeedOpen { feed, responder } => self.coordinator.feed_open(feed, responder),
            Command::FeedClose {
                object_id,
                responder,
            } => self.coordinator.feed_close(object_id, responder),
            Command::FeedObjectState {
                object_id,
                responder,
            } => {
                let _ = responder.send(self.coordinator.feed_object_state(object_id));
            }
            Command::FeedObjectData {
                object_id,
                responder,
            } => {
                let _ = responder.send(self.coordinator.feed_object_data(object_id));
            }
            Command::State { responder } => {
                let _ = responder.send(self.coordinator.client_state());
            }
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365 * 30)
}
