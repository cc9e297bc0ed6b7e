//! Presence detection on top of the distance sensor.
//!
//! [`PresenceTracker`] is the pure hysteresis state machine; [`PresenceDetector`]
//! owns the polling loop and forwards transitions over an mpsc queue.

mod detector;
mod tracker;
#[cfg(test)]
mod tests;

pub use detector::{DetectorStats, DetectorStatsSnapshot, PresenceDetector};
pub use tracker::{PresenceEvent, PresenceState, PresenceTracker, Thresholds};
