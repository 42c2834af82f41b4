//! Synchronization module
//!
//! Keeps the local world store converged with every other peer:
//! - Protocol handlers for the six message kinds
//! - Delayed one-shot responses to JOIN
//! - Smoothing of remote peer poses between updates
//! - The engine loop tying inbound frames, ticks and frames together

pub mod deferred;
pub mod engine;
pub mod interpolation;

pub use deferred::{DeferredAction, DeferredQueue};
pub use engine::{SyncContext, SyncEngine};
pub use interpolation::{normalize_angle, Interpolator, RenderedPose};
