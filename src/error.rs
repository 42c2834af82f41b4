//! Error handling module
//!
//! Defines custom error types for the Coworld peer.

use thiserror::Error;

/// Main error type for the Coworld peer
#[derive(Error, Debug)]
pub enum CoworldError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Shared world errors
    #[error("World error: {0}")]
    World(#[from] WorldError),
}

/// Network-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Bind failed: {0}")]
    Bind(String),
}

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to encode envelope: {0}")]
    Encode(serde_json::Error),

    #[error("Failed to decode envelope: {0}")]
    Decode(serde_json::Error),

    #[error("Unsupported protocol version: expected {expected}, got {actual}")]
    UnsupportedVersion { expected: u8, actual: u8 },

    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    #[error("Malformed {kind} payload: {reason}")]
    MalformedPayload { kind: String, reason: String },
}

/// Local world errors (API misuse by the embedding application)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    #[error("Local peer has not joined")]
    NotJoined,

    #[error("Local peer already joined as {0}")]
    AlreadyJoined(String),

    #[error("Invalid display name")]
    InvalidDisplayName,
}

/// Result type alias for Coworld operations
pub type Result<T> = std::result::Result<T, CoworldError>;
