mod distance;
mod sample;

pub use distance::{DistanceSensor, HALF_SPEED_OF_SOUND_CM_PER_S};
pub use sample::DistanceSample;

use crate::error::SensorError;
use async_trait::async_trait;
use std::time::Duration;

/// Anything that can produce one distance reading on request
#[async_trait]
pub trait DistanceSource: Send + Sync {
    async fn measure(&self, timeout: Duration) -> Result<DistanceSample, SensorError>;
}
