use std::time::SystemTime;

/// One distance reading. Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceSample {
    pub distance_cm: f64,
    pub timestamp: SystemTime,
    pub valid: bool,
}

impl DistanceSample {
    /// Build a sample, flagging values at or above `implausible_cm` as invalid
    pub fn new(distance_cm: f64, implausible_cm: f64) -> Self {
        Self {
            distance_cm,
            timestamp: SystemTime::now(),
            valid: distance_cm.is_finite() && distance_cm >= 0.0 && distance_cm < implausible_cm,
        }
    }
}
