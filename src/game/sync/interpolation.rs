//! Remote peer interpolation
//!
//! Incoming poses are never applied directly. Each remote peer has a track
//! holding the latest received pose (the target) and the rendered pose, which
//! is advanced toward the target every frame by exponential smoothing.
//! Heading takes the shortest angular path across the ±π boundary.
//!
//! Tracks are keyed by peer id: created when a remote peer appears, removed
//! when it leaves, after which it is never advanced again.

use std::collections::HashMap;
use std::f64::consts::{PI, TAU};
use std::time::Duration;

use tracing::trace;

use crate::game::peer::{PeerId, Vec3};
use crate::game::world::WorldStore;

/// Map an angle into (-π, π]
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Fraction of the remaining distance covered in `dt` at `rate` per second
pub fn smoothing_factor(rate: f64, dt: Duration) -> f64 {
    (1.0 - (-rate * dt.as_secs_f64()).exp()).clamp(0.0, 1.0)
}

/// Move `current` toward `target` by `alpha` along the shorter arc
pub fn step_heading(current: f64, target: f64, alpha: f64) -> f64 {
    normalize_angle(current + normalize_angle(target - current) * alpha)
}

/// Pose as drawn on screen
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedPose {
    pub position: Vec3,
    pub heading: f64,
}

#[derive(Debug, Clone, Copy)]
struct Track {
    rendered: RenderedPose,
    target: RenderedPose,
}

/// Per-peer smoothing tracks
#[derive(Debug)]
pub struct Interpolator {
    rate: f64,
    tracks: HashMap<PeerId, Track>,
}

impl Interpolator {
    /// Create an interpolator with a smoothing rate (per second)
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            tracks: HashMap::new(),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Set the target of a peer; a new track starts at the target
    pub fn set_target(&mut self, id: &PeerId, position: Vec3, heading: f64) {
        let target = RenderedPose { position, heading };
        match self.tracks.get_mut(id) {
            Some(track) => track.target = target,
            None => {
                trace!(peer_id = %id, "Interpolation track started");
                self.tracks.insert(
                    id.clone(),
                    Track {
                        rendered: target,
                        target,
                    },
                );
            }
        }
    }

    /// Stop interpolating a peer
    pub fn remove(&mut self, id: &PeerId) -> bool {
        let removed = self.tracks.remove(id).is_some();
        if removed {
            trace!(peer_id = %id, "Interpolation track stopped");
        }
        removed
    }

    /// Align tracks with the store's remote peers
    ///
    /// Targets follow the latest stored pose; tracks of departed peers are
    /// dropped.
    pub fn sync_targets(&mut self, store: &WorldStore) {
        for peer in store.remote_peers() {
            self.set_target(&peer.id, peer.position, peer.heading);
        }

        let local = store.local_peer_id();
        let departed: Vec<PeerId> = self
            .tracks
            .keys()
            .filter(|id| store.peer(id).is_none() || Some(*id) == local)
            .cloned()
            .collect();
        for id in departed {
            self.remove(&id);
        }
    }

    /// Advance every rendered pose by one frame
    pub fn advance(&mut self, dt: Duration) {
        let alpha = smoothing_factor(self.rate, dt);
        for track in self.tracks.values_mut() {
            track.rendered.position = track.rendered.position.lerp(track.target.position, alpha);
            track.rendered.heading =
                step_heading(track.rendered.heading, track.target.heading, alpha);
        }
    }

    /// Rendered pose of a peer
    pub fn pose(&self, id: &PeerId) -> Option<RenderedPose> {
        self.tracks.get(id).map(|track| track.rendered)
    }

    /// Latest received pose of a peer
    pub fn target(&self, id: &PeerId) -> Option<RenderedPose> {
        self.tracks.get(id).map(|track| track.target)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.tracks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}
