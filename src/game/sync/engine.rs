//! Sync engine
//!
//! Owns everything one peer process needs to take part in the shared world:
//! - The world store (single writer: this engine)
//! - The message bus and the protocol handlers registered on it
//! - The deferred action queue (delayed JOIN responses)
//! - The remote peer interpolator
//!
//! Inbound frames are forwarded by the transport callback into a channel and
//! handled one at a time on the engine task, so every handler runs to
//! completion before the next frame is looked at.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::config::PeerConfig;
use crate::error::{NetworkError, Result, WorldError};
use crate::game::object::{ObjectId, ObjectKind, WorldObject};
use crate::game::peer::{random_color, PeerId, PeerPatch, PeerState, Vec3};
use crate::game::world::{WorldEvent, WorldSnapshot, WorldStore};
use crate::net::bus::{DispatchOutcome, MessageBus, Publisher};
use crate::net::transport::Transport;
use crate::protocol::{Envelope, LeavePayload, Message, MessageKind, SyncResponsePayload};

use super::deferred::{DeferredAction, DeferredQueue};
use super::interpolation::Interpolator;

/// State handed to every protocol handler
#[derive(Debug)]
pub struct SyncContext {
    pub store: WorldStore,
    pub publisher: Publisher,
    pub deferred: DeferredQueue,
    /// Time of the frame being handled
    pub now: Instant,
    /// Delay before answering a JOIN with our own state
    pub join_response_delay: Duration,
}

impl SyncContext {
    /// Broadcast the full local state as UPDATE
    fn rebroadcast_own_state(&self) -> bool {
        match self.store.local_peer() {
            Some(state) => self.publisher.publish(Message::Update(PeerPatch::from(state))),
            None => false,
        }
    }
}

fn on_join(envelope: &Envelope, ctx: &mut SyncContext) {
    let Message::Join(state) = &envelope.message else {
        return;
    };

    // The envelope sender is authoritative for the entry key
    ctx.store.upsert_peer(&envelope.sender_id, &PeerPatch::from(state));
    info!(peer_id = %envelope.sender_id, name = %state.display_name, "Peer joined");

    if ctx.store.is_joined() {
        let due = ctx.now + ctx.join_response_delay;
        ctx.deferred.schedule(due, DeferredAction::RebroadcastOwnState);
        trace!(peer_id = %envelope.sender_id, "Scheduled join response");
    }
}

fn on_update(envelope: &Envelope, ctx: &mut SyncContext) {
    if let Message::Update(patch) = &envelope.message {
        ctx.store.upsert_peer(&envelope.sender_id, patch);
    }
}

fn on_leave(envelope: &Envelope, ctx: &mut SyncContext) {
    let Message::Leave(leave) = &envelope.message else {
        return;
    };

    if ctx.store.local_peer_id() == Some(&leave.id) {
        debug!(sender = %envelope.sender_id, "Ignoring LEAVE naming the local peer");
        return;
    }
    if ctx.store.remove_peer(&leave.id).is_some() {
        info!(peer_id = %leave.id, "Peer left");
    }
}

fn on_create_object(envelope: &Envelope, ctx: &mut SyncContext) {
    if let Message::CreateObject(object) = &envelope.message {
        ctx.store.add_object(object.clone());
    }
}

fn on_sync_request(envelope: &Envelope, ctx: &mut SyncContext) {
    debug!(peer_id = %envelope.sender_id, "Answering sync request");

    if ctx.store.object_count() > 0 {
        ctx.publisher.publish(Message::SyncResponse(SyncResponsePayload {
            objects: ctx.store.objects_vec(),
        }));
    }
    ctx.rebroadcast_own_state();
}

fn on_sync_response(envelope: &Envelope, ctx: &mut SyncContext) {
    if let Message::SyncResponse(response) = &envelope.message {
        let added = ctx.store.merge_objects(response.objects.iter().cloned());
        debug!(
            peer_id = %envelope.sender_id,
            received = response.objects.len(),
            added = added,
            "Merged sync response"
        );
    }
}

/// Peer-side synchronization engine
pub struct SyncEngine {
    config: PeerConfig,
    transport: Arc<dyn Transport>,
    bus: MessageBus<SyncContext>,
    ctx: SyncContext,
    interpolator: Interpolator,
    inbound_rx: mpsc::UnboundedReceiver<Bytes>,
}

impl SyncEngine {
    /// Create an engine on top of a transport
    pub fn new(transport: Arc<dyn Transport>, config: PeerConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        transport.on_receive(Box::new(move |frame: Bytes| {
            // Receiver gone means the engine was dropped
            let _ = inbound_tx.send(frame);
        }));

        let mut bus: MessageBus<SyncContext> = MessageBus::new(transport.clone());
        bus.subscribe(MessageKind::Join, on_join);
        bus.subscribe(MessageKind::Update, on_update);
        bus.subscribe(MessageKind::Leave, on_leave);
        bus.subscribe(MessageKind::CreateObject, on_create_object);
        bus.subscribe(MessageKind::SyncRequest, on_sync_request);
        bus.subscribe(MessageKind::SyncResponse, on_sync_response);

        let ctx = SyncContext {
            store: WorldStore::new(),
            publisher: bus.publisher().clone(),
            deferred: DeferredQueue::new(),
            now: Instant::now(),
            join_response_delay: config.join_response_delay(),
        };

        Self {
            interpolator: Interpolator::new(config.interpolation_rate),
            config,
            transport,
            bus,
            ctx,
            inbound_rx,
        }
    }

    /// Join with a display name, a random colour and an origin pose
    pub fn join(&mut self, display_name: &str) -> Result<PeerId> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(WorldError::InvalidDisplayName.into());
        }
        self.join_as(PeerState::new(PeerId::generate(), display_name, random_color()))
    }

    /// Join with a caller-built initial state
    ///
    /// Stores the state, then broadcasts JOIN followed by SYNC_REQUEST.
    pub fn join_as(&mut self, state: PeerState) -> Result<PeerId> {
        if let Some(id) = self.ctx.store.local_peer_id() {
            return Err(WorldError::AlreadyJoined(id.to_string()).into());
        }
        if self.transport.is_closed() {
            return Err(NetworkError::ChannelClosed.into());
        }

        let id = state.id.clone();
        self.ctx.publisher.set_local_id(Some(id.clone()));
        self.ctx.store.join_local(state.clone());

        self.bus.publish(Message::Join(state));
        self.bus.publish(Message::SyncRequest);

        Ok(id)
    }

    /// Broadcast LEAVE, release the transport and forget the local peer
    ///
    /// Pending deferred actions stay queued; they no longer publish anything.
    pub fn leave(&mut self) -> Result<()> {
        let Some(id) = self.ctx.store.local_peer_id().cloned() else {
            return Err(WorldError::NotJoined.into());
        };

        self.bus.publish(Message::Leave(LeavePayload { id: id.clone() }));
        self.ctx.publisher.set_local_id(None);
        self.transport.close();
        self.ctx.store.leave_local();
        self.interpolator.clear();

        info!(peer_id = %id, "Left the shared world");
        Ok(())
    }

    /// Record the local peer's pose for the next tick
    pub fn set_local_pose(&mut self, position: Vec3, heading: f64) -> Result<()> {
        let local = self
            .ctx
            .store
            .local_peer_mut()
            .ok_or(WorldError::NotJoined)?;
        local.position = position;
        local.heading = heading;
        Ok(())
    }

    /// Add an object locally and broadcast it
    ///
    /// The caller supplies the id. Returns false if the id was already known,
    /// in which case nothing is broadcast.
    pub fn create_object(&mut self, object: WorldObject) -> Result<bool> {
        if !self.ctx.store.is_joined() {
            return Err(WorldError::NotJoined.into());
        }

        if !self.ctx.store.add_object(object.clone()) {
            return Ok(false);
        }
        info!(object_id = %object.id, kind = %object.kind, "Object created");
        self.bus.publish(Message::CreateObject(object));
        Ok(true)
    }

    /// Create an object with a fresh id owned by the local peer
    pub fn spawn_object(
        &mut self,
        kind: ObjectKind,
        position: Vec3,
        color: impl Into<String>,
    ) -> Result<ObjectId> {
        let owner = self
            .ctx
            .store
            .local_peer_id()
            .cloned()
            .ok_or(WorldError::NotJoined)?;
        let object = WorldObject::new(kind, position, color, owner);
        let id = object.id.clone();
        self.create_object(object)?;
        Ok(id)
    }

    /// Flip the local camera flag (not synchronized)
    pub fn toggle_camera_mode(&mut self) -> bool {
        self.ctx.store.toggle_camera_mode()
    }

    pub fn is_third_person(&self) -> bool {
        self.ctx.store.is_third_person()
    }

    /// Broadcast one UPDATE carrying the local pose
    pub fn broadcast_tick(&self) -> bool {
        match self.ctx.store.local_peer() {
            Some(local) => self.bus.publish(Message::Update(local.pose_patch())),
            None => false,
        }
    }

    /// Handle one inbound frame
    pub fn handle_frame(&mut self, frame: &[u8], now: Instant) -> DispatchOutcome {
        self.ctx.now = now;
        let outcome = self.bus.dispatch(frame, &mut self.ctx);
        self.interpolator.sync_targets(&self.ctx.store);
        outcome
    }

    /// Run deferred actions whose deadline has passed
    pub fn run_due(&mut self, now: Instant) -> usize {
        self.ctx.now = now;
        let due = self.ctx.deferred.pop_due(now);
        for action in &due {
            match action {
                DeferredAction::RebroadcastOwnState => {
                    if self.ctx.rebroadcast_own_state() {
                        trace!("Sent delayed join response");
                    }
                }
            }
        }
        due.len()
    }

    /// Handle every queued inbound frame, then run due actions
    ///
    /// Returns the number of frames handled.
    pub fn pump(&mut self, now: Instant) -> usize {
        let mut handled = 0;
        while let Ok(frame) = self.inbound_rx.try_recv() {
            self.handle_frame(&frame, now);
            handled += 1;
        }
        self.run_due(now);
        handled
    }

    /// Advance remote peer interpolation by one frame
    pub fn advance_frame(&mut self, dt: Duration) {
        self.interpolator.sync_targets(&self.ctx.store);
        self.interpolator.advance(dt);
    }

    /// Drive the engine until shutdown, then leave
    pub async fn run(&mut self, shutdown_rx: &mut broadcast::Receiver<()>) {
        self.run_with(shutdown_rx, |_, _| {}).await
    }

    /// Drive the engine, calling `on_frame` once per interpolation frame
    ///
    /// The hook is where a collaborator writes the local pose.
    pub async fn run_with<F>(&mut self, shutdown_rx: &mut broadcast::Receiver<()>, mut on_frame: F)
    where
        F: FnMut(&mut SyncEngine, Duration),
    {
        let mut tick_interval = interval(self.config.broadcast_interval());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut frame_interval = interval(self.config.frame_interval());
        frame_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last_frame = Instant::now();
        let mut inbound_open = true;

        info!(
            broadcast_hz = self.config.broadcast_rate_hz,
            frame_hz = self.config.frame_rate_hz,
            "Sync engine running"
        );

        loop {
            let next_deadline = self.ctx.deferred.next_deadline();

            tokio::select! {
                frame = self.inbound_rx.recv(), if inbound_open => {
                    match frame {
                        Some(frame) => {
                            self.handle_frame(&frame, Instant::now());
                        }
                        None => {
                            debug!("Inbound channel closed");
                            inbound_open = false;
                        }
                    }
                }
                _ = tick_interval.tick() => {
                    if self.ctx.store.is_joined() {
                        self.broadcast_tick();
                    }
                }
                now = frame_interval.tick() => {
                    let dt = now.saturating_duration_since(last_frame);
                    last_frame = now;
                    on_frame(self, dt);
                    self.advance_frame(dt);
                }
                _ = sleep_until(next_deadline.unwrap_or_else(Instant::now)), if next_deadline.is_some() => {
                    self.run_due(Instant::now());
                }
                _ = shutdown_rx.recv() => {
                    info!("Sync engine shutting down");
                    break;
                }
            }
        }

        if self.ctx.store.is_joined() {
            if let Err(e) = self.leave() {
                debug!(error = %e, "Leave on shutdown failed");
            }
        }
    }

    /// Register an extra handler; it runs after the protocol handler
    pub fn on_message<F>(&mut self, kind: MessageKind, handler: F)
    where
        F: FnMut(&Envelope, &mut SyncContext) + Send + 'static,
    {
        self.bus.subscribe(kind, handler);
    }

    /// Read access to the world store
    pub fn store(&self) -> &WorldStore {
        &self.ctx.store
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        self.ctx.store.snapshot()
    }

    pub fn interpolator(&self) -> &Interpolator {
        &self.interpolator
    }

    pub fn local_peer_id(&self) -> Option<&PeerId> {
        self.ctx.store.local_peer_id()
    }

    /// Subscribe to store change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<WorldEvent> {
        self.ctx.store.subscribe()
    }

    /// Number of deferred actions still queued
    pub fn pending_actions(&self) -> usize {
        self.ctx.deferred.len()
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("store", &self.ctx.store.info())
            .field("pending_actions", &self.ctx.deferred.len())
            .field("tracks", &self.interpolator.len())
            .field("closed", &self.transport.is_closed())
            .finish()
    }
}
