//! Networking module
//!
//! Moves frames between peers and routes them to handlers:
//! - The transport contract and the in-process hub
//! - UDP multicast for peers on the same LAN
//! - The typed message bus with self-echo suppression

pub mod bus;
pub mod transport;
pub mod udp;

pub use bus::{DispatchOutcome, MessageBus, Publisher};
pub use transport::{LocalHub, LocalTransport, Transport};
pub use udp::UdpTransport;
