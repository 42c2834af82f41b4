//! Game module
//!
//! The shared world and everything that keeps it in sync:
//! - Peer and object data model
//! - The world store (single writer, change notifications)
//! - Local motion for the peer this process drives
//! - Synchronization engine, deferred actions and interpolation

pub mod motion;
pub mod object;
pub mod peer;
pub mod sync;
pub mod world;

pub use motion::{LocalMotion, MoveIntent};
pub use object::{ObjectId, ObjectKind, WorldObject};
pub use peer::{PeerId, PeerPatch, PeerState, Vec3};
pub use world::{UpsertOutcome, WorldEvent, WorldSnapshot, WorldStore};
