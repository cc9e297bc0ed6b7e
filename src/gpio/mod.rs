mod cache;
mod simulated;
mod sysfs;
mod types;

pub use cache::PinCache;
pub use simulated::{EchoBehavior, PinWrite, SimulatedGpio};
pub use sysfs::SysfsGpio;
pub use types::{DigitalIo, Level, PinHandle, PinMode};

use crate::config::{GpioBackend, SystemConfig};
use std::sync::Arc;
use tracing::{info, warn};

/// Open the configured GPIO backend, or `None` when no controller is present
pub fn open_backend(config: &SystemConfig) -> Option<Arc<dyn DigitalIo>> {
    match config.gpio_backend {
        GpioBackend::Simulated => {
            info!("Using simulated GPIO backend");
            Some(Arc::new(SimulatedGpio::new()))
        }
        GpioBackend::Sysfs => match SysfsGpio::open(&config.gpio_root) {
            Ok(gpio) => {
                info!("Using sysfs GPIO backend at {}", config.gpio_root);
                Some(Arc::new(gpio))
            }
            Err(e) => {
                warn!("GPIO not available ({}), hardware features disabled", e);
                None
            }
        },
    }
}
