//! Protocol module
//!
//! Wire-level definitions shared by every peer:
//! - Message kinds and typed payloads
//! - The versioned JSON envelope codec

pub mod envelope;
pub mod message;

pub use envelope::{Envelope, PROTOCOL_VERSION};
pub use message::{LeavePayload, Message, MessageKind, SyncResponsePayload};
