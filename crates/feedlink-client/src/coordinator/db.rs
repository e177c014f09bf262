//! Indexed storage for the coordinator.
//!
//! A passive store with three kinds of content:
//!
//! - **Pending responders** - connect/disconnect/feed-object-close responder
//!   lists (append, drain-all) and action responders keyed by callback id.
//! - **Master feed table** - the coordinator's lagging view of each server
//!   feed, holding the last-acknowledged data snapshot while open.
//! - **Feed objects** - the app-visible handles, indexed by id and by
//!   `(serial, phase)` for O(1) enumeration. Ids are allocated monotonically,
//!   so the ordered id sets iterate in registration order.
//!
//! The store never invokes anything; deciding *when* responders fire is the
//! coordinator's job.

use crate::client::FeedEvent;
use crate::error::ClientError;
use feedlink_core::feed::{FeedIdentity, FeedSerial};
use feedlink_core::id::next_id;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Resolves a `connect()` call.
pub(crate) type ConnectResponder = oneshot::Sender<Result<(), ClientError>>;
/// Resolves a `disconnect()` call.
pub(crate) type DisconnectResponder = oneshot::Sender<Result<(), ClientError>>;
/// Resolves a feed object `close()` call.
pub(crate) type CloseResponder = oneshot::Sender<Result<(), ClientError>>;
/// Resolves an `action()` call.
pub(crate) type ActionResponder = oneshot::Sender<Result<Arc<Value>, ClientError>>;
/// Resolves a `feed()` call.
pub(crate) type OpenResponder = oneshot::Sender<Result<FeedOpened, ClientError>>;

/// Payload delivered when a feed object finishes opening.
#[derive(Debug)]
pub(crate) struct FeedOpened {
    /// Id of the feed object.
    pub(crate) object_id: u64,
    /// Feed data at open time.
    pub(crate) data: Arc<Value>,
    /// The object's event stream.
    pub(crate) events: mpsc::UnboundedReceiver<FeedEvent>,
}

/// Internal feed object lifecycle phase.
///
/// Externally an object is open iff it is `Open` or `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum FeedObjectPhase {
    /// Created; awaiting resolution of the open.
    Opening,
    /// Open with data.
    Open,
    /// The app asked to close it; the close event has not run yet.
    Closing,
}

struct MasterFeed {
    data: Arc<Value>,
}

struct FeedObject {
    identity: FeedIdentity,
    serial: FeedSerial,
    phase: FeedObjectPhase,
    opener: Option<OpenResponder>,
    pending_events: Option<mpsc::UnboundedReceiver<FeedEvent>>,
    data: Option<Arc<Value>>,
    events: mpsc::UnboundedSender<FeedEvent>,
}

/// The coordinator's passive store.
///
/// Closed feed objects are removed outright; an unknown id reads as closed.
#[derive(Default)]
pub(crate) struct CoordinatorDb {
    connect_callbacks: VecDeque<ConnectResponder>,
    disconnect_callbacks: VecDeque<DisconnectResponder>,
    close_callbacks: VecDeque<CloseResponder>,
    action_callbacks: BTreeMap<u64, ActionResponder>,
    masters: HashMap<FeedSerial, MasterFeed>,
    objects: HashMap<u64, FeedObject>,
    index: HashMap<(FeedSerial, FeedObjectPhase), BTreeSet<u64>>,
}

impl CoordinatorDb {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Responder lists
    // =========================================================================

    pub(crate) fn push_connect_callback(&mut self, responder: ConnectResponder) {
        self.connect_callbacks.push_back(responder);
    }

    pub(crate) fn pop_connect_callback(&mut self) -> Option<ConnectResponder> {
        self.connect_callbacks.pop_front()
    }

    pub(crate) fn connect_callback_count(&self) -> usize {
        self.connect_callbacks.len()
    }

    pub(crate) fn push_disconnect_callback(&mut self, responder: DisconnectResponder) {
        self.disconnect_callbacks.push_back(responder);
    }

    pub(crate) fn pop_disconnect_callback(&mut self) -> Option<DisconnectResponder> {
        self.disconnect_callbacks.pop_front()
    }

    pub(crate) fn disconnect_callback_count(&self) -> usize {
        self.disconnect_callbacks.len()
    }

    pub(crate) fn push_close_callback(&mut self, responder: CloseResponder) {
        self.close_callbacks.push_back(responder);
    }

    /// Removes and returns every stored feed-object-close responder.
    pub(crate) fn drain_close_callbacks(&mut self) -> Vec<CloseResponder> {
        self.close_callbacks.drain(..).collect()
    }

    pub(crate) fn insert_action_callback(&mut self, callback_id: u64, responder: ActionResponder) {
        self.action_callbacks.insert(callback_id, responder);
    }

    pub(crate) fn pull_action_callback(&mut self, callback_id: u64) -> Option<ActionResponder> {
        self.action_callbacks.remove(&callback_id)
    }

    /// Ids of every pending action responder, in registration order.
    pub(crate) fn action_callback_ids(&self) -> Vec<u64> {
        self.action_callbacks.keys().copied().collect()
    }

    // =========================================================================
    // Master feed table
    // =========================================================================

    /// An entry in the master table means the server feed is open; absence
    /// means closed.
    pub(crate) fn master_data(&self, serial: &FeedSerial) -> Option<Arc<Value>> {
        self.masters.get(serial).map(|master| Arc::clone(&master.data))
    }

    /// Marks a server feed open with its acknowledged snapshot.
    pub(crate) fn set_master_open(&mut self, serial: FeedSerial, data: Arc<Value>) {
        debug_assert!(
            !self.masters.contains_key(&serial),
            "master feed opened twice"
        );
        self.masters.insert(serial, MasterFeed { data });
    }

    /// Replaces an open server feed's snapshot.
    pub(crate) fn set_master_data(&mut self, serial: &FeedSerial, data: Arc<Value>) {
        if let Some(master) = self.masters.get_mut(serial) {
            master.data = data;
        }
    }

    /// Marks a server feed closed, dropping its snapshot.
    pub(crate) fn set_master_closed(&mut self, serial: &FeedSerial) {
        self.masters.remove(serial);
    }

    /// Marks every server feed closed; used on disconnect.
    pub(crate) fn close_all_masters(&mut self) {
        self.masters.clear();
    }

    // =========================================================================
    // Feed objects
    // =========================================================================

    /// Creates a feed object in the opening phase and returns its id.
    pub(crate) fn new_feed_object(
        &mut self,
        identity: FeedIdentity,
        opener: OpenResponder,
    ) -> u64 {
        let object_id = next_id();
        let serial = identity.serial();
        let (events, pending_events) = mpsc::unbounded_channel();
        self.index
            .entry((serial.clone(), FeedObjectPhase::Opening))
            .or_default()
            .insert(object_id);
        self.objects.insert(
            object_id,
            FeedObject {
                identity,
                serial,
                phase: FeedObjectPhase::Opening,
                opener: Some(opener),
                pending_events: Some(pending_events),
                data: None,
                events,
            },
        );
        object_id
    }

    pub(crate) fn object_phase(&self, object_id: u64) -> Option<FeedObjectPhase> {
        self.objects.get(&object_id).map(|object| object.phase)
    }

    pub(crate) fn object_identity(&self, object_id: u64) -> Option<FeedIdentity> {
        self.objects.get(&object_id).map(|object| object.identity.clone())
    }

    pub(crate) fn object_serial(&self, object_id: u64) -> Option<FeedSerial> {
        self.objects.get(&object_id).map(|object| object.serial.clone())
    }

    pub(crate) fn object_data(&self, object_id: u64) -> Option<Arc<Value>> {
        self.objects
            .get(&object_id)
            .and_then(|object| object.data.clone())
    }

    /// The object's event channel, for emitting `FeedEvent`s.
    pub(crate) fn object_events(&self, object_id: u64) -> Option<mpsc::UnboundedSender<FeedEvent>> {
        self.objects.get(&object_id).map(|object| object.events.clone())
    }

    /// Transitions an opening object to open, returning its responder and
    /// event receiver. Fails (None) if the object is not opening.
    pub(crate) fn open_object(
        &mut self,
        object_id: u64,
        data: Arc<Value>,
    ) -> Option<(OpenResponder, mpsc::UnboundedReceiver<FeedEvent>)> {
        let object = self.objects.get_mut(&object_id)?;
        if object.phase != FeedObjectPhase::Opening {
            return None;
        }
        let opener = object.opener.take()?;
        let receiver = object.pending_events.take()?;
        object.data = Some(data);
        self.transition(object_id, FeedObjectPhase::Open);
        Some((opener, receiver))
    }

    /// Replaces an open object's data snapshot.
    pub(crate) fn set_object_data(&mut self, object_id: u64, data: Arc<Value>) {
        if let Some(object) = self.objects.get_mut(&object_id) {
            if object.phase == FeedObjectPhase::Open {
                object.data = Some(data);
            }
        }
    }

    /// Transitions an open object to closing.
    pub(crate) fn set_object_closing(&mut self, object_id: u64) -> bool {
        match self.objects.get(&object_id) {
            Some(object) if object.phase == FeedObjectPhase::Open => {
                self.transition(object_id, FeedObjectPhase::Closing);
                true
            }
            _ => false,
        }
    }

    /// Closes an object outright, removing it from the store. Returns its
    /// opener responder if the open never resolved.
    pub(crate) fn close_object(&mut self, object_id: u64) -> Option<OpenResponder> {
        let object = self.objects.remove(&object_id)?;
        if let Some(ids) = self.index.get_mut(&(object.serial.clone(), object.phase)) {
            ids.remove(&object_id);
        }
        object.opener
    }

    /// Ids of the serial's objects in the given phase, registration order.
    pub(crate) fn objects_in(&self, serial: &FeedSerial, phase: FeedObjectPhase) -> Vec<u64> {
        self.index
            .get(&(serial.clone(), phase))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ids of every object in the given phase, registration order.
    pub(crate) fn all_objects_in(&self, phase: FeedObjectPhase) -> Vec<u64> {
        let mut ids = BTreeSet::new();
        for ((_, indexed_phase), set) in &self.index {
            if *indexed_phase == phase {
                ids.extend(set.iter().copied());
            }
        }
        ids.into_iter().collect()
    }

    /// True if any of the serial's objects wants the server feed open.
    pub(crate) fn desired_open(&self, serial: &FeedSerial) -> bool {
        !self.objects_in(serial, FeedObjectPhase::Opening).is_empty()
            || !self.objects_in(serial, FeedObjectPhase::Open).is_empty()
    }

    fn transition(&mut self, object_id: u64, phase: FeedObjectPhase) {
        let Some(object) = self.objects.get_mut(&object_id) else {
            return;
        };
        let old_key = (object.serial.clone(), object.phase);
        object.phase = phase;
        let new_key = (object.serial.clone(), phase);
        if let Some(ids) = self.index.get_mut(&old_key) {
            ids.remove(&object_id);
        }
        self.index.entry(new_key).or_default().insert(object_id);
    }
}
