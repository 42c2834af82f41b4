//! Transport abstraction module
//!
//! A transport is a broadcast medium: every frame sent by one endpoint is
//! delivered, best-effort, to every other endpoint in the same domain and
//! never back to the sender. There is no acknowledgement, retry or ordering
//! across senders.
//!
//! [`LocalHub`] is the in-process medium (several peers inside one process,
//! used by tests and embedded setups); the LAN medium lives in
//! [`crate::net::udp`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::error::{CoworldError, NetworkError, Result};

/// Callback invoked once per inbound frame
pub type ReceiveHandler = Box<dyn Fn(Bytes) + Send + Sync>;

/// Broadcast transport contract
pub trait Transport: Send + Sync {
    /// Deliver a frame to every other endpoint
    ///
    /// Returns `NetworkError::ChannelClosed` after [`Transport::close`].
    /// A frame the medium fails to carry is silently lost.
    fn send(&self, frame: Bytes) -> Result<()>;

    /// Register a receive callback; every registered callback sees every frame
    fn on_receive(&self, handler: ReceiveHandler);

    /// Release the channel
    fn close(&self);

    /// Check whether the channel was released
    fn is_closed(&self) -> bool;
}

/// Registered receive callbacks of one endpoint
#[derive(Default)]
pub(crate) struct HandlerSet {
    handlers: RwLock<Vec<ReceiveHandler>>,
}

impl HandlerSet {
    pub(crate) fn push(&self, handler: ReceiveHandler) {
        self.handlers.write().push(handler);
    }

    pub(crate) fn deliver(&self, frame: &Bytes) {
        for handler in self.handlers.read().iter() {
            handler(frame.clone());
        }
    }

    pub(crate) fn clear(&self) {
        self.handlers.write().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.read().len()
    }
}

/// Endpoint identifier within a [`LocalHub`]
pub type EndpointId = u64;

struct HubInner {
    endpoints: DashMap<EndpointId, Arc<HandlerSet>>,
    next_id: AtomicU64,
}

/// In-process broadcast domain
#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl LocalHub {
    /// Create an empty domain
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                endpoints: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Attach a new endpoint to the domain
    pub fn connect(&self) -> LocalTransport {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let handlers = Arc::new(HandlerSet::default());
        self.inner.endpoints.insert(id, handlers.clone());

        debug!(endpoint = id, endpoints = self.endpoint_count(), "Local endpoint connected");

        LocalTransport {
            id,
            hub: self.clone(),
            handlers,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of attached endpoints
    pub fn endpoint_count(&self) -> usize {
        self.inner.endpoints.len()
    }

    fn broadcast(&self, from: EndpointId, frame: Bytes) -> usize {
        // Collect first so no map guard is held while callbacks run
        let targets: Vec<Arc<HandlerSet>> = self
            .inner
            .endpoints
            .iter()
            .filter(|entry| *entry.key() != from)
            .map(|entry| entry.value().clone())
            .collect();

        for target in &targets {
            target.deliver(&frame);
        }

        targets.len()
    }

    fn detach(&self, id: EndpointId) {
        if self.inner.endpoints.remove(&id).is_some() {
            debug!(endpoint = id, endpoints = self.endpoint_count(), "Local endpoint closed");
        }
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalHub")
            .field("endpoints", &self.endpoint_count())
            .finish()
    }
}

/// One endpoint of a [`LocalHub`]
pub struct LocalTransport {
    id: EndpointId,
    hub: LocalHub,
    handlers: Arc<HandlerSet>,
    closed: AtomicBool,
}

impl LocalTransport {
    pub fn id(&self) -> EndpointId {
        self.id
    }
}

impl Transport for LocalTransport {
    fn send(&self, frame: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(CoworldError::Network(NetworkError::ChannelClosed));
        }

        let delivered = self.hub.broadcast(self.id, frame);
        trace!(endpoint = self.id, delivered = delivered, "Frame broadcast");
        Ok(())
    }

    fn on_receive(&self, handler: ReceiveHandler) {
        self.handlers.push(handler);
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.hub.detach(self.id);
            self.handlers.clear();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("id", &self.id)
            .field("handlers", &self.handlers.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(transport: &LocalTransport) -> Arc<Mutex<Vec<Bytes>>> {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        transport.on_receive(Box::new(move |frame: Bytes| sink.lock().unwrap().push(frame)));
        received
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let hub = LocalHub::new();
        let a = hub.connect();
        let b = hub.connect();
        let c = hub.connect();

        let got_a = recorder(&a);
        let got_b = recorder(&b);
        let got_c = recorder(&c);

        a.send(Bytes::from_static(b"hello")).unwrap();

        assert!(got_a.lock().unwrap().is_empty());
        assert_eq!(got_b.lock().unwrap().as_slice(), &[Bytes::from_static(b"hello")]);
        assert_eq!(got_c.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_multiple_handlers_all_invoked() {
        let hub = LocalHub::new();
        let a = hub.connect();
        let b = hub.connect();

        let first = recorder(&b);
        let second = recorder(&b);

        a.send(Bytes::from_static(b"x")).unwrap();
        assert_eq!(first.lock().unwrap().len(), 1);
        assert_eq!(second.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_send_after_close_fails() {
        let hub = LocalHub::new();
        let a = hub.connect();
        let b = hub.connect();
        let got_b = recorder(&b);

        a.close();
        assert!(a.is_closed());
        let err = a.send(Bytes::from_static(b"late")).unwrap_err();
        assert!(matches!(err, CoworldError::Network(NetworkError::ChannelClosed)));
        assert!(got_b.lock().unwrap().is_empty());
        assert_eq!(hub.endpoint_count(), 1);
    }

    #[test]
    fn test_closed_endpoint_receives_nothing() {
        let hub = LocalHub::new();
        let a = hub.connect();
        let b = hub.connect();
        let got_b = recorder(&b);

        b.close();
        a.send(Bytes::from_static(b"x")).unwrap();
        assert!(got_b.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drop_detaches() {
        let hub = LocalHub::new();
        {
            let _a = hub.connect();
            assert_eq!(hub.endpoint_count(), 1);
        }
        assert_eq!(hub.endpoint_count(), 0);
    }
}
