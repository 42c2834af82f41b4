//! Coworld Peer Library
//!
//! Serverless peer-to-peer state synchronization for a small shared 3D world.
//! Every peer keeps its own copy of the world and converges with the others
//! by broadcasting JSON messages over a shared transport.
//!
//! ## Modules
//!
//! - `config` - Peer configuration management
//! - `error` - Error types and result definitions
//! - `game` - World store, data model, sync engine and interpolation
//! - `net` - Transports and the message bus
//! - `protocol` - Message kinds and the envelope codec

pub mod config;
pub mod error;
pub mod game;
pub mod net;
pub mod protocol;

// Re-export commonly used types
pub use config::PeerConfig;
pub use error::{CoworldError, Result};
pub use game::sync::SyncEngine;
pub use game::{ObjectKind, PeerId, PeerState, Vec3, WorldObject, WorldStore};
pub use net::{LocalHub, Transport, UdpTransport};
pub use protocol::PROTOCOL_VERSION;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
