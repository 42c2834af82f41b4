//! World store module
//!
//! The authoritative local copy of the shared world:
//! - Known peers, keyed by id in first-seen order
//! - User-placed objects, creation-wins
//! - The local peer id and the camera-mode display flag
//! - Change notifications for readers
//!
//! The store has a single writer (the sync engine task) and is mutated
//! through `&mut self`; readers take snapshots or subscribe to events.

use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use super::object::{ObjectId, WorldObject};
use super::peer::{PeerId, PeerPatch, PeerState};

/// Capacity of the change notification channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Result of merging a patch into the peer table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new entry was created
    Created,
    /// An existing entry was merged
    Updated,
    /// Unknown id without a position; nothing changed
    Dropped,
}

/// Store change notification
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    PeerJoined(PeerId),
    PeerUpdated(PeerId),
    PeerLeft(PeerId),
    ObjectAdded(ObjectId),
    CameraModeChanged { third_person: bool },
}

/// Read-only copy of the store handed to rendering collaborators
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldSnapshot {
    pub local_peer_id: Option<PeerId>,
    pub peers: IndexMap<PeerId, PeerState>,
    pub objects: Vec<WorldObject>,
    pub third_person: bool,
}

/// Shared world store
#[derive(Debug)]
pub struct WorldStore {
    /// Our own id, set at join time
    local_peer_id: Option<PeerId>,
    /// Peer table in first-seen order
    peers: IndexMap<PeerId, PeerState>,
    /// Objects in first-seen order
    objects: IndexMap<ObjectId, WorldObject>,
    /// Camera display flag (not synchronized)
    third_person: bool,
    /// Change notifications
    events: broadcast::Sender<WorldEvent>,
}

impl WorldStore {
    /// Create an empty store
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            local_peer_id: None,
            peers: IndexMap::new(),
            objects: IndexMap::new(),
            third_person: true,
            events,
        }
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<WorldEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: WorldEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Get the local peer id, if joined
    pub fn local_peer_id(&self) -> Option<&PeerId> {
        self.local_peer_id.as_ref()
    }

    /// Check whether the local peer has joined
    pub fn is_joined(&self) -> bool {
        self.local_peer_id.is_some()
    }

    /// Install the local peer and its initial state
    pub fn join_local(&mut self, state: PeerState) {
        info!(peer_id = %state.id, name = %state.display_name, "Local peer joined");
        self.local_peer_id = Some(state.id.clone());
        self.insert_peer(state);
    }

    /// Forget the local peer; its own entry is removed
    pub fn leave_local(&mut self) -> Option<PeerId> {
        let id = self.local_peer_id.take()?;
        self.remove_peer(&id);
        info!(peer_id = %id, "Local peer left");
        Some(id)
    }

    /// Get the local peer state
    pub fn local_peer(&self) -> Option<&PeerState> {
        self.local_peer_id.as_ref().and_then(|id| self.peers.get(id))
    }

    /// Mutable access to the local peer state
    pub fn local_peer_mut(&mut self) -> Option<&mut PeerState> {
        match &self.local_peer_id {
            Some(id) => self.peers.get_mut(id),
            None => None,
        }
    }

    /// Insert or fully replace a peer entry
    pub fn insert_peer(&mut self, state: PeerState) -> UpsertOutcome {
        let id = state.id.clone();
        let outcome = match self.peers.insert(id.clone(), state) {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        };
        self.emit_upsert(id, outcome);
        outcome
    }

    /// Merge a partial update into the peer table
    ///
    /// Fields present in the patch overwrite the stored ones. An unknown id
    /// is only created when the patch carries a position.
    pub fn upsert_peer(&mut self, id: &PeerId, patch: &PeerPatch) -> UpsertOutcome {
        let outcome = match self.peers.get_mut(id) {
            Some(existing) => {
                existing.apply(patch);
                UpsertOutcome::Updated
            }
            None => match PeerState::from_patch(id.clone(), patch) {
                Some(state) => {
                    self.peers.insert(id.clone(), state);
                    UpsertOutcome::Created
                }
                None => {
                    debug!(peer_id = %id, "Dropping partial update for unknown peer");
                    return UpsertOutcome::Dropped;
                }
            },
        };
        self.emit_upsert(id.clone(), outcome);
        outcome
    }

    fn emit_upsert(&self, id: PeerId, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => {
                debug!(peer_id = %id, peers = self.peers.len(), "Peer added");
                self.emit(WorldEvent::PeerJoined(id));
            }
            UpsertOutcome::Updated => {
                trace!(peer_id = %id, "Peer updated");
                self.emit(WorldEvent::PeerUpdated(id));
            }
            UpsertOutcome::Dropped => {}
        }
    }

    /// Remove a peer entry
    pub fn remove_peer(&mut self, id: &PeerId) -> Option<PeerState> {
        let removed = self.peers.shift_remove(id);
        if removed.is_some() {
            debug!(peer_id = %id, peers = self.peers.len(), "Peer removed");
            self.emit(WorldEvent::PeerLeft(id.clone()));
        }
        removed
    }

    /// Get a peer by id
    pub fn peer(&self, id: &PeerId) -> Option<&PeerState> {
        self.peers.get(id)
    }

    /// All known peers, in first-seen order
    pub fn peers(&self) -> &IndexMap<PeerId, PeerState> {
        &self.peers
    }

    /// Every peer except the local one
    pub fn remote_peers(&self) -> impl Iterator<Item = &PeerState> {
        let local = self.local_peer_id.clone();
        self.peers
            .values()
            .filter(move |p| Some(&p.id) != local.as_ref())
    }

    /// Get the peer count (including the local peer)
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Append an object unless its id is already known
    ///
    /// Returns true if the object was added. A duplicate id is a no-op
    /// merge: the first-seen payload is kept.
    pub fn add_object(&mut self, object: WorldObject) -> bool {
        if let Some(existing) = self.objects.get(&object.id) {
            if existing != &object {
                debug!(
                    object_id = %object.id,
                    "Ignoring conflicting payload for known object"
                );
            }
            return false;
        }

        let id = object.id.clone();
        debug!(object_id = %id, kind = %object.kind, owner = %object.owner_id, "Object added");
        self.objects.insert(id.clone(), object);
        self.emit(WorldEvent::ObjectAdded(id));
        true
    }

    /// Merge a set of objects, keeping known ones untouched
    pub fn merge_objects<I>(&mut self, objects: I) -> usize
    where
        I: IntoIterator<Item = WorldObject>,
    {
        let mut added = 0;
        for object in objects {
            if self.add_object(object) {
                added += 1;
            }
        }
        added
    }

    /// Get an object by id
    pub fn object(&self, id: &ObjectId) -> Option<&WorldObject> {
        self.objects.get(id)
    }

    /// All objects in first-seen order
    pub fn objects(&self) -> impl Iterator<Item = &WorldObject> {
        self.objects.values()
    }

    /// Clone the object set
    pub fn objects_vec(&self) -> Vec<WorldObject> {
        self.objects.values().cloned().collect()
    }

    /// Get the object count
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Check the camera display flag
    pub fn is_third_person(&self) -> bool {
        self.third_person
    }

    /// Flip the camera display flag
    pub fn toggle_camera_mode(&mut self) -> bool {
        self.third_person = !self.third_person;
        self.emit(WorldEvent::CameraModeChanged {
            third_person: self.third_person,
        });
        self.third_person
    }

    /// Take a read-only copy
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            local_peer_id: self.local_peer_id.clone(),
            peers: self.peers.clone(),
            objects: self.objects_vec(),
            third_person: self.third_person,
        }
    }

    /// One-line summary for logs
    pub fn info(&self) -> String {
        format!(
            "{} peers - {} objects - local {}",
            self.peers.len(),
            self.objects.len(),
            self.local_peer_id
                .as_ref()
                .map(|id| id.as_str())
                .unwrap_or("<not joined>")
        )
    }
}

impl Default for WorldStore {
    fn default() -> Self {
        Self::new()
    }
}
