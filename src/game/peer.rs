//! Peer module
//!
//! Per-participant state shared across the broadcast domain:
//! - Peer identity (opaque, session-scoped)
//! - Position and heading
//! - Partial updates merged field by field

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display name used when a peer is first seen through a partial update
pub const DEFAULT_DISPLAY_NAME: &str = "Guest";

/// Colour used when a peer is first seen through a partial update
pub const DEFAULT_COLOR: &str = "#cccccc";

/// Opaque peer identifier, stable for the lifetime of one session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// 3-component position, serialized as `[x, y, z]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Move `alpha` of the way towards `target`
    pub fn lerp(self, target: Vec3, alpha: f64) -> Vec3 {
        Vec3 {
            x: self.x + (target.x - self.x) * alpha,
            y: self.y + (target.y - self.y) * alpha,
            z: self.z + (target.z - self.z) * alpha,
        }
    }

    pub fn distance_to(&self, other: &Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl From<[f64; 3]> for Vec3 {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<Vec3> for [f64; 3] {
    fn from(v: Vec3) -> Self {
        [v.x, v.y, v.z]
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// Generate a random `#rrggbb` presentation colour
pub fn random_color() -> String {
    let value: u32 = rand::thread_rng().gen_range(0..=0xFF_FFFF);
    format!("#{:06x}", value)
}

/// Full state of one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerState {
    pub id: PeerId,
    /// Human-readable label, set at join
    #[serde(rename = "username", alias = "displayName")]
    pub display_name: String,
    /// Presentation tag, set at join
    pub color: String,
    pub position: Vec3,
    /// Y-axis rotation in radians (any range)
    #[serde(rename = "rotation", alias = "heading")]
    pub heading: f64,
}

impl PeerState {
    /// Create the initial state for a freshly joined peer
    pub fn new(id: PeerId, display_name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            color: color.into(),
            position: Vec3::ZERO,
            heading: 0.0,
        }
    }

    /// Build an entry from a patch; requires at least a position
    pub fn from_patch(id: PeerId, patch: &PeerPatch) -> Option<Self> {
        let position = patch.position?;
        let mut state = Self {
            id,
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            color: DEFAULT_COLOR.to_string(),
            position,
            heading: 0.0,
        };
        state.apply(patch);
        Some(state)
    }

    /// Field-level last-write-wins merge; the id is never reassigned
    ///
    /// Name and color are merged like any other field, so a peer that
    /// re-sends them in an UPDATE renames itself everywhere.
    pub fn apply(&mut self, patch: &PeerPatch) {
        if let Some(name) = &patch.display_name {
            self.display_name = name.clone();
        }
        if let Some(color) = &patch.color {
            self.color = color.clone();
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
        if let Some(heading) = patch.heading {
            self.heading = heading;
        }
    }

    /// Pose-only patch used by the periodic tick
    pub fn pose_patch(&self) -> PeerPatch {
        PeerPatch {
            position: Some(self.position),
            heading: Some(self.heading),
            ..Default::default()
        }
    }
}

/// Partial peer state; absent fields are left untouched on merge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PeerId>,
    #[serde(
        default,
        rename = "username",
        alias = "displayName",
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3>,
    #[serde(
        default,
        rename = "rotation",
        alias = "heading",
        skip_serializing_if = "Option::is_none"
    )]
    pub heading: Option<f64>,
}

impl PeerPatch {
    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.color.is_none()
            && self.position.is_none()
            && self.heading.is_none()
    }
}

impl From<&PeerState> for PeerPatch {
    fn from(state: &PeerState) -> Self {
        Self {
            id: Some(state.id.clone()),
            display_name: Some(state.display_name.clone()),
            color: Some(state.color.clone()),
            position: Some(state.position),
            heading: Some(state.heading),
        }
    }
}
