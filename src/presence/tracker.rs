use crate::config::{PresenceConfig, SensorConfig};
use crate::sensor::DistanceSample;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Last state the detector reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceState {
    Unknown,
    Present,
    Absent,
}

/// Transition emitted by the detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PresenceEvent {
    Approached { distance_cm: f64 },
    Left { distance_cm: f64 },
}

impl PresenceEvent {
    pub fn is_approach(&self) -> bool {
        matches!(self, PresenceEvent::Approached { .. })
    }

    pub fn distance_cm(&self) -> f64 {
        match self {
            PresenceEvent::Approached { distance_cm } | PresenceEvent::Left { distance_cm } => {
                *distance_cm
            }
        }
    }
}

/// Hysteresis thresholds applied to every reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub show_cm: f64,
    pub noshow_cm: f64,
    pub implausible_cm: f64,
    pub debounce_count: u32,
}

impl Thresholds {
    pub fn from_config(presence: &PresenceConfig, sensor: &SensorConfig) -> Self {
        Self {
            show_cm: presence.show_threshold_cm,
            noshow_cm: presence.noshow_threshold_cm,
            implausible_cm: sensor.implausible_cm,
            debounce_count: presence.debounce_count,
        }
    }

    /// Consecutive readings after which the opposing counter is forgotten
    fn clear_after(&self) -> u32 {
        self.debounce_count.saturating_sub(2).max(1)
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from_config(&PresenceConfig::default(), &SensorConfig::default())
    }
}

/// Counter-based presence hysteresis.
///
/// Readings below `show_cm` build toward an approach and readings above
/// `noshow_cm` toward a departure; the band between touches neither. Only
/// plausible readings may reset the approach counter, so one echo glitch
/// cannot cancel an approach in progress.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    thresholds: Thresholds,
    state: PresenceState,
    show_count: u32,
    noshow_count: u32,
}

impl PresenceTracker {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: PresenceState::Unknown,
            show_count: 0,
            noshow_count: 0,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn show_count(&self) -> u32 {
        self.show_count
    }

    pub fn noshow_count(&self) -> u32 {
        self.noshow_count
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Feed one sample; returns the transition it completes, if any
    pub fn observe(&mut self, sample: &DistanceSample) -> Option<PresenceEvent> {
        let d = sample.distance_cm;
        let t = self.thresholds;
        let plausible = sample.valid && d < t.implausible_cm;

        if plausible && d < t.show_cm {
            self.show_count = self.show_count.saturating_add(1);
            if self.show_count > t.clear_after() {
                self.noshow_count = 0;
            }
            trace!("Near reading {:.1}cm (show_count={})", d, self.show_count);

            if self.show_count >= t.debounce_count && self.state != PresenceState::Present {
                self.state = PresenceState::Present;
                self.noshow_count = 0;
                debug!("Presence confirmed at {:.1}cm", d);
                return Some(PresenceEvent::Approached { distance_cm: d });
            }
        } else if !plausible || d > t.noshow_cm {
            self.noshow_count = self.noshow_count.saturating_add(1);
            if plausible && self.noshow_count > t.clear_after() {
                self.show_count = 0;
            }
            trace!("Far reading {:.1}cm (noshow_count={})", d, self.noshow_count);

            if self.noshow_count >= t.debounce_count {
                match self.state {
                    PresenceState::Present => {
                        self.state = PresenceState::Absent;
                        self.show_count = 0;
                        debug!("Absence confirmed at {:.1}cm", d);
                        return Some(PresenceEvent::Left { distance_cm: d });
                    }
                    PresenceState::Unknown => {
                        // Nobody was there to leave
                        self.state = PresenceState::Absent;
                        debug!("Settled into absent without an event");
                    }
                    PresenceState::Absent => {}
                }
            }
        }

        None
    }

    /// Forget counters and the last reported state
    pub fn reset(&mut self) {
        self.state = PresenceState::Unknown;
        self.show_count = 0;
        self.noshow_count = 0;
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}
