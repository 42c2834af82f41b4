//! Local motion model
//!
//! Kinematic movement for the local peer: camera-relative walking at a fixed
//! speed, facing the direction of travel, with a jump impulse, gravity and a
//! ground clamp at `y = 0`. Only its output (position and heading) is
//! synchronized.

use std::time::Duration;

use super::peer::Vec3;

/// Horizontal speed in units per second
pub const SPEED: f64 = 5.0;

/// Vertical velocity applied by a jump
pub const JUMP_FORCE: f64 = 8.0;

/// Downward acceleration
pub const GRAVITY: f64 = 20.0;

/// Ground plane height
pub const GROUND_LEVEL: f64 = 0.0;

/// Movement intent for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveIntent {
    /// Forward/backward axis in [-1, 1]
    pub forward: f64,
    /// Right/left axis in [-1, 1]
    pub right: f64,
    pub jump: bool,
    /// Camera yaw in radians; movement is relative to it
    pub yaw: f64,
}

/// Local peer kinematics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalMotion {
    pub position: Vec3,
    pub heading: f64,
    /// Vertical velocity
    pub velocity: f64,
    pub grounded: bool,
}

impl Default for LocalMotion {
    fn default() -> Self {
        Self::new(Vec3::ZERO, 0.0)
    }
}

impl LocalMotion {
    pub fn new(position: Vec3, heading: f64) -> Self {
        Self {
            position,
            heading,
            velocity: 0.0,
            grounded: position.y <= GROUND_LEVEL,
        }
    }

    /// Advance by one frame
    pub fn step(&mut self, intent: &MoveIntent, dt: Duration) {
        let dt = dt.as_secs_f64();

        let (fx, fz) = (intent.yaw.sin(), intent.yaw.cos());
        let (rx, rz) = (-fz, fx);
        let mut dx = fx * intent.forward + rx * intent.right;
        let mut dz = fz * intent.forward + rz * intent.right;

        let length = (dx * dx + dz * dz).sqrt();
        if length > f64::EPSILON {
            // Diagonal input is no faster than straight input
            if length > 1.0 {
                dx /= length;
                dz /= length;
            }
            self.position.x += dx * SPEED * dt;
            self.position.z += dz * SPEED * dt;
            self.heading = dx.atan2(dz);
        }

        if intent.jump && self.grounded {
            self.velocity = JUMP_FORCE;
            self.grounded = false;
        }

        self.velocity -= GRAVITY * dt;
        self.position.y += self.velocity * dt;

        if self.position.y <= GROUND_LEVEL {
            self.position.y = GROUND_LEVEL;
            self.velocity = 0.0;
            self.grounded = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    const FRAME: Duration = Duration::from_millis(16);

    #[test]
    fn test_walk_forward() {
        let mut motion = LocalMotion::default();
        let intent = MoveIntent {
            forward: 1.0,
            ..Default::default()
        };
        for _ in 0..10 {
            motion.step(&intent, Duration::from_millis(100));
        }
        assert!((motion.position.z - SPEED).abs() < 1e-9);
        assert!(motion.position.x.abs() < 1e-9);
        assert_eq!(motion.position.y, 0.0);
        assert!(motion.heading.abs() < 1e-9);
    }

    #[test]
    fn test_heading_faces_travel_direction() {
        let mut motion = LocalMotion::default();
        let intent = MoveIntent {
            forward: 1.0,
            yaw: FRAC_PI_2,
            ..Default::default()
        };
        motion.step(&intent, FRAME);
        assert!(motion.position.x > 0.0);
        assert!((motion.heading - FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn test_diagonal_is_normalized() {
        let mut motion = LocalMotion::default();
        let intent = MoveIntent {
            forward: 1.0,
            right: 1.0,
            ..Default::default()
        };
        motion.step(&intent, Duration::from_secs(1));
        let travelled = (motion.position.x.powi(2) + motion.position.z.powi(2)).sqrt();
        assert!((travelled - SPEED).abs() < 1e-9);
    }

    #[test]
    fn test_jump_and_land() {
        let mut motion = LocalMotion::default();
        let jump = MoveIntent {
            jump: true,
            ..Default::default()
        };
        motion.step(&jump, FRAME);
        assert!(!motion.grounded);
        assert!(motion.position.y > 0.0);

        // No double jump while airborne
        let apex_velocity = motion.velocity;
        motion.step(&jump, FRAME);
        assert!(motion.velocity < apex_velocity);

        for _ in 0..200 {
            motion.step(&MoveIntent::default(), FRAME);
        }
        assert!(motion.grounded);
        assert_eq!(motion.position.y, GROUND_LEVEL);
        assert_eq!(motion.velocity, 0.0);
    }

    #[test]
    fn test_idle_keeps_heading() {
        let mut motion = LocalMotion::new(Vec3::ZERO, 1.25);
        motion.step(&MoveIntent::default(), FRAME);
        assert_eq!(motion.heading, 1.25);
        assert_eq!(motion.position, Vec3::ZERO);
    }
}
