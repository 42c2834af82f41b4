//! Message bus
//!
//! Typed publish/subscribe on top of a [`Transport`]:
//! - `publish` wraps a message in an envelope attributed to the local peer
//! - `dispatch` decodes an inbound frame and runs every handler registered
//!   for its kind, in registration order
//!
//! Frames whose sender is the local peer are discarded before any handler
//! runs. Publishing before a local id is established is a no-op.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::game::peer::PeerId;
use crate::protocol::{Envelope, Message, MessageKind};

use super::transport::Transport;

/// Handler invoked with the decoded envelope and the caller's context
pub type Handler<C> = Box<dyn FnMut(&Envelope, &mut C) + Send>;

/// Result of dispatching one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Number of handlers that ran
    Delivered(usize),
    /// The frame was our own
    SelfEcho,
    /// The frame could not be decoded
    Malformed,
    /// Decoded, but nobody subscribed to the kind
    Unhandled,
}

/// Outbound half of the bus; cheap to clone into handler contexts
#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
    local_id: Arc<RwLock<Option<PeerId>>>,
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            local_id: Arc::new(RwLock::new(None)),
        }
    }

    /// Get the id outbound envelopes are attributed to
    pub fn local_id(&self) -> Option<PeerId> {
        self.local_id.read().clone()
    }

    /// Set or clear the local id
    pub fn set_local_id(&self, id: Option<PeerId>) {
        *self.local_id.write() = id;
    }

    /// Broadcast a message
    ///
    /// Returns true if the frame was handed to the transport. Publishing
    /// while unjoined, after the transport closed, or with an unencodable
    /// payload does nothing.
    pub fn publish(&self, message: Message) -> bool {
        let Some(sender_id) = self.local_id() else {
            trace!(kind = %message.kind(), "Not joined, publish skipped");
            return false;
        };

        let envelope = Envelope::new(sender_id, message);
        let frame = match envelope.encode() {
            Ok(frame) => frame,
            Err(e) => {
                debug!(kind = %envelope.kind(), error = %e, "Failed to encode envelope");
                return false;
            }
        };

        match self.transport.send(frame) {
            Ok(()) => {
                trace!(kind = %envelope.kind(), "Published");
                true
            }
            Err(e) => {
                debug!(kind = %envelope.kind(), error = %e, "Publish dropped");
                false
            }
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("local_id", &self.local_id())
            .field("closed", &self.transport.is_closed())
            .finish()
    }
}

/// Publish/subscribe bus with handlers over a context `C`
pub struct MessageBus<C> {
    publisher: Publisher,
    handlers: HashMap<MessageKind, Vec<Handler<C>>>,
}

impl<C> MessageBus<C> {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            publisher: Publisher::new(transport),
            handlers: HashMap::new(),
        }
    }

    /// Get a handle for publishing
    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Register a handler for one kind; handlers run in registration order
    pub fn subscribe<F>(&mut self, kind: MessageKind, handler: F)
    where
        F: FnMut(&Envelope, &mut C) + Send + 'static,
    {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
    }

    /// Number of handlers registered for a kind
    pub fn handler_count(&self, kind: MessageKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Broadcast a message attributed to the local peer
    pub fn publish(&self, message: Message) -> bool {
        self.publisher.publish(message)
    }

    /// Decode an inbound frame and run its handlers
    pub fn dispatch(&mut self, frame: &[u8], ctx: &mut C) -> DispatchOutcome {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, len = frame.len(), "Dropping undecodable frame");
                return DispatchOutcome::Malformed;
            }
        };

        if self.publisher.local_id().as_ref() == Some(&envelope.sender_id) {
            trace!(kind = %envelope.kind(), "Discarding self echo");
            return DispatchOutcome::SelfEcho;
        }

        let Some(handlers) = self.handlers.get_mut(&envelope.kind()) else {
            trace!(kind = %envelope.kind(), sender = %envelope.sender_id, "No handler for kind");
            return DispatchOutcome::Unhandled;
        };

        for handler in handlers.iter_mut() {
            handler(&envelope, &mut *ctx);
        }
        DispatchOutcome::Delivered(handlers.len())
    }
}

impl<C> std::fmt::Debug for MessageBus<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("publisher", &self.publisher)
            .field("kinds", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::peer::{PeerPatch, Vec3};
    use crate::net::transport::LocalHub;
    use crate::protocol::LeavePayload;
    use bytes::Bytes;
    use std::sync::Mutex;

    fn frame_of(sender: &str, message: Message) -> Bytes {
        Envelope::new(sender.into(), message).encode().unwrap()
    }

    #[test]
    fn test_publish_without_id_is_noop() {
        let hub = LocalHub::new();
        let a = hub.connect();
        let b = hub.connect();
        let received = Arc::new(Mutex::new(0usize));
        let sink = received.clone();
        b.on_receive(Box::new(move |_: Bytes| *sink.lock().unwrap() += 1));

        let bus: MessageBus<()> = MessageBus::new(Arc::new(a));
        assert!(!bus.publish(Message::SyncRequest));
        assert_eq!(*received.lock().unwrap(), 0);

        bus.publisher().set_local_id(Some("x1".into()));
        assert!(bus.publish(Message::SyncRequest));
        assert_eq!(*received.lock().unwrap(), 1);
    }

    #[test]
    fn test_publish_after_close_is_dropped() {
        let hub = LocalHub::new();
        let transport = Arc::new(hub.connect());
        let bus: MessageBus<()> = MessageBus::new(transport.clone());
        bus.publisher().set_local_id(Some("x1".into()));

        transport.close();
        assert!(!bus.publish(Message::SyncRequest));
    }

    #[test]
    fn test_handlers_run_in_order() {
        let hub = LocalHub::new();
        let mut bus: MessageBus<Vec<&'static str>> = MessageBus::new(Arc::new(hub.connect()));
        bus.subscribe(MessageKind::Update, |_, log| log.push("first"));
        bus.subscribe(MessageKind::Update, |_, log| log.push("second"));
        bus.subscribe(MessageKind::Leave, |_, log| log.push("leave"));
        assert_eq!(bus.handler_count(MessageKind::Update), 2);

        let mut log = Vec::new();
        let update = frame_of(
            "y1",
            Message::Update(PeerPatch::default().with_position(Vec3::ZERO)),
        );
        assert_eq!(bus.dispatch(&update, &mut log), DispatchOutcome::Delivered(2));
        assert_eq!(log, vec!["first", "second"]);
    }

    #[test]
    fn test_self_echo_discarded() {
        let hub = LocalHub::new();
        let mut bus: MessageBus<usize> = MessageBus::new(Arc::new(hub.connect()));
        bus.publisher().set_local_id(Some("x1".into()));
        for kind in MessageKind::ALL {
            bus.subscribe(kind, |_, count| *count += 1);
        }

        let mut count = 0;
        let own = frame_of("x1", Message::Leave(LeavePayload { id: "x1".into() }));
        assert_eq!(bus.dispatch(&own, &mut count), DispatchOutcome::SelfEcho);
        assert_eq!(count, 0);

        let other = frame_of("y1", Message::Leave(LeavePayload { id: "y1".into() }));
        assert_eq!(bus.dispatch(&other, &mut count), DispatchOutcome::Delivered(1));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_malformed_and_unhandled() {
        let hub = LocalHub::new();
        let mut bus: MessageBus<()> = MessageBus::new(Arc::new(hub.connect()));

        assert_eq!(bus.dispatch(b"{", &mut ()), DispatchOutcome::Malformed);
        assert_eq!(
            bus.dispatch(&frame_of("y1", Message::SyncRequest), &mut ()),
            DispatchOutcome::Unhandled
        );
    }
}
