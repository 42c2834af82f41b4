//! Message definitions
//!
//! The six message kinds exchanged between peers and their typed payloads.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::game::object::WorldObject;
use crate::game::peer::{PeerId, PeerPatch, PeerState};

/// Message kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Full state of a newly joined peer
    Join,
    /// Partial state of the sender
    Update,
    /// Sender is leaving
    Leave,
    /// A new world object
    CreateObject,
    /// Late joiner asking for the object set
    SyncRequest,
    /// Object set sent in reply to a sync request
    SyncResponse,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        MessageKind::Join,
        MessageKind::Update,
        MessageKind::Leave,
        MessageKind::CreateObject,
        MessageKind::SyncRequest,
        MessageKind::SyncResponse,
    ];

    /// Wire name of the kind
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Join => "JOIN",
            MessageKind::Update => "UPDATE",
            MessageKind::Leave => "LEAVE",
            MessageKind::CreateObject => "CREATE_OBJECT",
            MessageKind::SyncRequest => "SYNC_REQUEST",
            MessageKind::SyncResponse => "SYNC_RESPONSE",
        }
    }

    /// Parse a wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// LEAVE payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeavePayload {
    pub id: PeerId,
}

/// SYNC_RESPONSE payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResponsePayload {
    #[serde(default)]
    pub objects: Vec<WorldObject>,
}

/// A decoded message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Join(PeerState),
    Update(PeerPatch),
    Leave(LeavePayload),
    CreateObject(WorldObject),
    SyncRequest,
    SyncResponse(SyncResponsePayload),
}

impl Message {
    /// Get the kind tag
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Join(_) => MessageKind::Join,
            Message::Update(_) => MessageKind::Update,
            Message::Leave(_) => MessageKind::Leave,
            Message::CreateObject(_) => MessageKind::CreateObject,
            Message::SyncRequest => MessageKind::SyncRequest,
            Message::SyncResponse(_) => MessageKind::SyncResponse,
        }
    }

    /// Serialize the payload alone
    pub fn payload(&self) -> Result<Value, ProtocolError> {
        let value = match self {
            Message::Join(state) => serde_json::to_value(state),
            Message::Update(patch) => serde_json::to_value(patch),
            Message::Leave(leave) => serde_json::to_value(leave),
            Message::CreateObject(object) => serde_json::to_value(object),
            Message::SyncRequest => Ok(Value::Object(Default::default())),
            Message::SyncResponse(response) => serde_json::to_value(response),
        };
        value.map_err(ProtocolError::Encode)
    }

    /// Rebuild a message from its kind and payload
    pub fn from_parts(kind: MessageKind, payload: Value) -> Result<Self, ProtocolError> {
        let malformed = |e: serde_json::Error| ProtocolError::MalformedPayload {
            kind: kind.name().to_string(),
            reason: e.to_string(),
        };

        let message = match kind {
            MessageKind::Join => Message::Join(serde_json::from_value(payload).map_err(malformed)?),
            MessageKind::Update => {
                Message::Update(serde_json::from_value(payload).map_err(malformed)?)
            }
            MessageKind::Leave => Message::Leave(serde_json::from_value(payload).map_err(malformed)?),
            MessageKind::CreateObject => {
                Message::CreateObject(serde_json::from_value(payload).map_err(malformed)?)
            }
            // Payload is ignored
            MessageKind::SyncRequest => Message::SyncRequest,
            MessageKind::SyncResponse => {
                Message::SyncResponse(serde_json::from_value(payload).map_err(malformed)?)
            }
        };
        Ok(message)
    }
}
