//! UDP multicast transport
//!
//! Carries frames between peers on the same LAN segment. Every datagram is
//! prefixed with the channel name and a random per-endpoint nonce:
//!
//! ```text
//! [channel_len: u8][channel: utf-8][nonce: 16 bytes][frame ...]
//! ```
//!
//! Datagrams from another channel or carrying our own nonce (multicast
//! loopback) are dropped before any callback runs.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::PeerConfig;
use crate::error::{CoworldError, NetworkError, Result};

use super::transport::{HandlerSet, ReceiveHandler, Transport};

/// Largest payload a single IPv4 UDP datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Length of the endpoint nonce
pub const NONCE_LEN: usize = 16;

/// Multicast TTL; 1 keeps frames on the local segment
const MULTICAST_TTL: u32 = 1;

/// Prefix a frame with the channel header
pub fn encode_datagram(channel: &str, nonce: &[u8; NONCE_LEN], frame: &[u8]) -> Option<Bytes> {
    let channel = channel.as_bytes();
    if channel.len() > u8::MAX as usize {
        return None;
    }

    let mut buf = BytesMut::with_capacity(1 + channel.len() + NONCE_LEN + frame.len());
    buf.put_u8(channel.len() as u8);
    buf.put_slice(channel);
    buf.put_slice(nonce);
    buf.put_slice(frame);

    if buf.len() > MAX_DATAGRAM_SIZE {
        return None;
    }
    Some(buf.freeze())
}

/// A parsed datagram header and its frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub channel: String,
    pub nonce: [u8; NONCE_LEN],
    pub frame: Bytes,
}

/// Split a datagram into header and frame
pub fn decode_datagram(mut data: Bytes) -> Option<Datagram> {
    if !data.has_remaining() {
        return None;
    }
    let channel_len = data.get_u8() as usize;
    if data.remaining() < channel_len + NONCE_LEN {
        return None;
    }

    let channel = String::from_utf8(data.split_to(channel_len).to_vec()).ok()?;
    let mut nonce = [0u8; NONCE_LEN];
    data.copy_to_slice(&mut nonce);

    Some(Datagram {
        channel,
        nonce,
        frame: data,
    })
}

/// UDP multicast broadcast domain endpoint
///
/// Receives through a tokio socket and sends through a non-blocking clone of
/// the same descriptor, so every send attempts the syscall immediately rather
/// than waiting on the reactor to observe write readiness.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    sender: std::net::UdpSocket,
    group: SocketAddrV4,
    channel: String,
    nonce: [u8; NONCE_LEN],
    handlers: Arc<HandlerSet>,
    closed: Arc<AtomicBool>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Join the multicast group described by the config
    ///
    /// Must be called from within a tokio runtime; the receive loop is spawned
    /// onto it.
    pub fn open(config: &PeerConfig) -> Result<Self> {
        let group = SocketAddrV4::new(config.multicast_addr, config.port);
        let (socket, sender) = Self::bind_socket(group)?;
        let nonce = *Uuid::new_v4().as_bytes();

        let transport = Self {
            socket: Arc::new(socket),
            sender,
            group,
            channel: config.channel.clone(),
            nonce,
            handlers: Arc::new(HandlerSet::default()),
            closed: Arc::new(AtomicBool::new(false)),
            recv_task: Mutex::new(None),
        };

        let task = tokio::spawn(Self::receive_loop(
            transport.socket.clone(),
            transport.channel.clone(),
            nonce,
            transport.handlers.clone(),
            transport.closed.clone(),
        ));
        *transport.recv_task.lock() = Some(task);

        info!(
            group = %group,
            channel = %transport.channel,
            "UDP transport joined multicast group"
        );

        Ok(transport)
    }

    fn bind_socket(group: SocketAddrV4) -> Result<(UdpSocket, std::net::UdpSocket)> {
        let bind_err = |e: io::Error| CoworldError::Network(NetworkError::Bind(e.to_string()));

        let socket =
            Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
        // Several peers may share one host
        socket.set_reuse_address(true).map_err(bind_err)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;

        let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port()));
        socket.bind(&bind_addr.into()).map_err(bind_err)?;
        socket
            .join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)
            .map_err(bind_err)?;
        socket.set_multicast_loop_v4(true).map_err(bind_err)?;
        socket
            .set_multicast_ttl_v4(MULTICAST_TTL)
            .map_err(bind_err)?;

        let sender: std::net::UdpSocket = socket.try_clone().map_err(bind_err)?.into();
        let receiver = UdpSocket::from_std(socket.into()).map_err(bind_err)?;
        Ok((receiver, sender))
    }

    /// Write one encoded datagram to the group
    fn transmit(&self, datagram: &[u8]) -> io::Result<usize> {
        self.sender.send_to(datagram, SocketAddr::V4(self.group))
    }

    async fn receive_loop(
        socket: Arc<UdpSocket>,
        channel: String,
        nonce: [u8; NONCE_LEN],
        handlers: Arc<HandlerSet>,
        closed: Arc<AtomicBool>,
    ) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        while !closed.load(Ordering::SeqCst) {
            let (len, from) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "UDP receive failed");
                    continue;
                }
            };

            let Some(datagram) = decode_datagram(Bytes::copy_from_slice(&buf[..len])) else {
                trace!(from = %from, len = len, "Dropping undecodable datagram");
                continue;
            };

            if datagram.nonce == nonce {
                continue;
            }
            if datagram.channel != channel {
                trace!(from = %from, channel = %datagram.channel, "Dropping datagram for other channel");
                continue;
            }

            handlers.deliver(&datagram.frame);
        }

        debug!("UDP receive loop stopped");
    }
}

impl Transport for UdpTransport {
    fn send(&self, frame: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(CoworldError::Network(NetworkError::ChannelClosed));
        }

        let Some(datagram) = encode_datagram(&self.channel, &self.nonce, &frame) else {
            warn!(len = frame.len(), "Frame too large for one datagram, dropped");
            return Ok(());
        };

        // Best-effort: a full socket buffer or unreachable network loses the frame
        if let Err(e) = self.transmit(&datagram) {
            debug!(error = %e, "UDP send failed, frame dropped");
        }
        Ok(())
    }

    fn on_receive(&self, handler: ReceiveHandler) {
        self.handlers.push(handler);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.recv_task.lock().take() {
            task.abort();
        }
        if let Err(e) = self
            .socket
            .leave_multicast_v4(*self.group.ip(), Ipv4Addr::UNSPECIFIED)
        {
            debug!(error = %e, "Failed to leave multicast group");
        }
        self.handlers.clear();
        info!(group = %self.group, "UDP transport closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    fn test_config(port: u16, channel: &str) -> PeerConfig {
        PeerConfig {
            port,
            channel: channel.to_string(),
            ..PeerConfig::default()
        }
    }

    fn random_port() -> u16 {
        rand::thread_rng().gen_range(40_000..60_000)
    }

    /// Open an endpoint, or `None` when the host cannot do multicast
    fn open_or_skip(config: &PeerConfig) -> Option<UdpTransport> {
        match UdpTransport::open(config) {
            Ok(transport) => Some(transport),
            Err(e) => {
                eprintln!("skipping: multicast unavailable ({e})");
                None
            }
        }
    }

    fn recorder(transport: &UdpTransport) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        transport.on_receive(Box::new(move |frame: Bytes| {
            let _ = tx.send(frame);
        }));
        rx
    }

    #[test]
    fn test_datagram_header() {
        let nonce = [7u8; NONCE_LEN];
        let datagram = encode_datagram("co-world-channel", &nonce, b"{\"kind\":\"LEAVE\"}").unwrap();

        let parsed = decode_datagram(datagram).unwrap();
        assert_eq!(parsed.channel, "co-world-channel");
        assert_eq!(parsed.nonce, nonce);
        assert_eq!(&parsed.frame[..], b"{\"kind\":\"LEAVE\"}");
    }

    #[test]
    fn test_truncated_datagram_rejected() {
        assert!(decode_datagram(Bytes::new()).is_none());
        assert!(decode_datagram(Bytes::from_static(&[5, b'a', b'b'])).is_none());

        // Header present but nonce short
        let mut short = BytesMut::new();
        short.put_u8(1);
        short.put_u8(b'c');
        short.put_slice(&[0u8; 4]);
        assert!(decode_datagram(short.freeze()).is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let nonce = [0u8; NONCE_LEN];
        let frame = vec![0u8; MAX_DATAGRAM_SIZE];
        assert!(encode_datagram("c", &nonce, &frame).is_none());

        let long_channel = "x".repeat(300);
        assert!(encode_datagram(&long_channel, &nonce, b"").is_none());
    }

    #[tokio::test]
    async fn test_send_right_after_open() {
        let Some(transport) = open_or_skip(&test_config(random_port(), "co-world-channel")) else {
            return;
        };

        let datagram = encode_datagram(&transport.channel, &transport.nonce, b"{}").unwrap();
        match transport.transmit(&datagram) {
            Ok(sent) => assert_eq!(sent, datagram.len()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                panic!("first send after open was not attempted: {e}")
            }
            Err(e) => eprintln!("skipping: no multicast route ({e})"),
        }
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let Some(transport) = open_or_skip(&test_config(random_port(), "co-world-channel")) else {
            return;
        };

        transport.close();
        assert!(transport.is_closed());
        assert!(matches!(
            transport.send(Bytes::from_static(b"{}")),
            Err(CoworldError::Network(NetworkError::ChannelClosed))
        ));
    }

    #[tokio::test]
    async fn test_multicast_delivery() {
        let port = random_port();
        let Some(a) = open_or_skip(&test_config(port, "co-world-channel")) else {
            return;
        };
        let Some(b) = open_or_skip(&test_config(port, "co-world-channel")) else {
            return;
        };
        let Some(other) = open_or_skip(&test_config(port, "another-channel")) else {
            return;
        };

        let mut a_rx = recorder(&a);
        let mut b_rx = recorder(&b);
        let mut other_rx = recorder(&other);

        tokio_test::assert_ok!(a.send(Bytes::from_static(b"{\"kind\":\"SYNC_REQUEST\"}")));

        let frame = match timeout(Duration::from_secs(2), b_rx.recv()).await {
            Ok(Some(frame)) => frame,
            _ => {
                eprintln!("skipping: multicast loopback not delivered");
                return;
            }
        };
        assert_eq!(&frame[..], b"{\"kind\":\"SYNC_REQUEST\"}");

        // Give any stray deliveries time to land
        sleep(Duration::from_millis(200)).await;
        assert!(a_rx.try_recv().is_err(), "sender received its own frame");
        assert!(other_rx.try_recv().is_err(), "frame crossed channels");

        // And the other direction
        tokio_test::assert_ok!(b.send(Bytes::from_static(b"{}")));
        let frame = timeout(Duration::from_secs(2), a_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&frame[..], b"{}");
    }
}
