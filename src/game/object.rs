//! World objects module
//!
//! User-placed static entities. Objects are immutable once created and are
//! never deleted; ids are random so independent peers never collide.

use std::fmt;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::peer::{PeerId, Vec3};

/// Palette used by [`WorldObject::random_at`]
pub const OBJECT_PALETTE: [&str; 5] = ["#ef4444", "#3b82f6", "#22c55e", "#eab308", "#a855f7"];

/// Globally unique object identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random, high-entropy identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Shape tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Cube,
    Sphere,
    Pyramid,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 3] = [ObjectKind::Cube, ObjectKind::Sphere, ObjectKind::Pyramid];

    pub fn name(&self) -> &'static str {
        match self {
            ObjectKind::Cube => "cube",
            ObjectKind::Sphere => "sphere",
            ObjectKind::Pyramid => "pyramid",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A user-placed static entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldObject {
    pub id: ObjectId,
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    pub position: Vec3,
    pub color: String,
    #[serde(rename = "ownerId")]
    pub owner_id: PeerId,
}

impl WorldObject {
    /// Create an object with a freshly generated id
    pub fn new(kind: ObjectKind, position: Vec3, color: impl Into<String>, owner_id: PeerId) -> Self {
        Self {
            id: ObjectId::generate(),
            kind,
            position,
            color: color.into(),
            owner_id,
        }
    }

    /// Random shape and palette colour at a position
    pub fn random_at(position: Vec3, owner_id: PeerId) -> Self {
        let mut rng = rand::thread_rng();
        let kind = *ObjectKind::ALL.choose(&mut rng).unwrap_or(&ObjectKind::Cube);
        let color = *OBJECT_PALETTE.choose(&mut rng).unwrap_or(&OBJECT_PALETTE[0]);
        Self::new(kind, position, color, owner_id)
    }
}
