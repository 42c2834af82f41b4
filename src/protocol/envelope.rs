//! Envelope codec
//!
//! Every frame on the wire is a JSON envelope:
//!
//! ```json
//! {"v": 1, "kind": "UPDATE", "payload": {"position": [0, 0, 0]}, "senderId": "..."}
//! ```
//!
//! `v` is the schema version. Frames without it are treated as version 1.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::game::peer::PeerId;

use super::message::{Message, MessageKind};

/// Current envelope schema version
pub const PROTOCOL_VERSION: u8 = 1;

fn default_version() -> u8 {
    PROTOCOL_VERSION
}

/// Wire representation
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    #[serde(rename = "v", default = "default_version")]
    version: u8,
    kind: String,
    #[serde(default)]
    payload: Value,
    sender_id: PeerId,
}

/// A message attributed to its sender
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sender_id: PeerId,
    pub message: Message,
}

impl Envelope {
    pub fn new(sender_id: PeerId, message: Message) -> Self {
        Self { sender_id, message }
    }

    pub fn kind(&self) -> MessageKind {
        self.message.kind()
    }

    /// Serialize to a frame
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let raw = RawEnvelope {
            version: PROTOCOL_VERSION,
            kind: self.kind().name().to_string(),
            payload: self.message.payload()?,
            sender_id: self.sender_id.clone(),
        };
        serde_json::to_vec(&raw)
            .map(Bytes::from)
            .map_err(ProtocolError::Encode)
    }

    /// Parse a frame
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_slice(frame).map_err(ProtocolError::Decode)?;

        if raw.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                expected: PROTOCOL_VERSION,
                actual: raw.version,
            });
        }

        let kind = MessageKind::from_name(&raw.kind)
            .ok_or_else(|| ProtocolError::UnknownKind(raw.kind.clone()))?;
        let message = Message::from_parts(kind, raw.payload)?;

        Ok(Self {
            sender_id: raw.sender_id,
            message,
        })
    }
}
