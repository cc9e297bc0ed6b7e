use super::color::Rgb;
use super::output::{ColorOutput, NullColorOutput};
use super::pwm::SoftPwmColor;
use crate::config::LightsConfig;
use crate::gpio::{DigitalIo, Level, PinCache};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct DriverInner {
    rows: Option<Arc<PinCache>>,
    row_pins: Vec<u8>,
    color: Arc<dyn ColorOutput>,
    rows_on: AtomicBool,
    degraded: AtomicBool,
}

/// The row lights and the RGB LED of one light resource.
///
/// Cheap to clone; clones drive the same pins. Write failures are logged
/// once and otherwise ignored, so a board without GPIO runs as a no-op.
#[derive(Clone)]
pub struct LightDriver {
    inner: Arc<DriverInner>,
}

impl LightDriver {
    /// Drive real pins, or run as a no-op when `gpio` is `None`
    pub fn new(gpio: Option<Arc<dyn DigitalIo>>, config: &LightsConfig) -> Self {
        let Some(gpio) = gpio else {
            warn!("No GPIO for lights, light output disabled");
            return Self::disabled();
        };

        let pins = Arc::new(PinCache::new(gpio));
        let rgb_pins = [config.red_pin, config.green_pin, config.blue_pin];
        let color: Arc<dyn ColorOutput> =
            match SoftPwmColor::start(Arc::clone(&pins), rgb_pins, config.pwm_frequency_hz) {
                Ok(pwm) => Arc::new(pwm),
                Err(e) => {
                    warn!("RGB LED unavailable ({}), colour output disabled", e);
                    Arc::new(NullColorOutput::new())
                }
            };

        info!(
            "Light driver ready (rows {:?}, rgb {:?})",
            config.row_pins, rgb_pins
        );
        Self::with_output(Some(pins), config.row_pins.clone(), color)
    }

    pub fn with_output(
        rows: Option<Arc<PinCache>>,
        row_pins: Vec<u8>,
        color: Arc<dyn ColorOutput>,
    ) -> Self {
        Self {
            inner: Arc::new(DriverInner {
                rows,
                row_pins,
                color,
                rows_on: AtomicBool::new(false),
                degraded: AtomicBool::new(false),
            }),
        }
    }

    pub fn disabled() -> Self {
        Self::with_output(None, Vec::new(), Arc::new(NullColorOutput::new()))
    }

    pub fn set_rows(&self, on: bool) {
        self.inner.rows_on.store(on, Ordering::Relaxed);
        let Some(rows) = &self.inner.rows else {
            return;
        };
        for pin in &self.inner.row_pins {
            if let Err(e) = rows.write(*pin, Level::from_bool(on)) {
                self.degrade(&e.to_string());
            }
        }
    }

    pub fn rows_on(&self) -> bool {
        self.inner.rows_on.load(Ordering::Relaxed)
    }

    pub fn set_color(&self, color: Rgb) {
        if let Err(e) = self.inner.color.set_color(color) {
            self.degrade(&e.to_string());
        }
    }

    pub fn color(&self) -> Rgb {
        self.inner.color.color()
    }

    /// Rows off, LED black
    pub fn reset(&self) {
        debug!("Resetting lights");
        self.set_rows(false);
        self.set_color(Rgb::BLACK);
    }

    /// Show `color` briefly, then go dark
    pub async fn flash(&self, color: Rgb, duration: Duration) {
        self.set_color(color);
        tokio::time::sleep(duration).await;
        self.set_color(Rgb::BLACK);
    }

    fn degrade(&self, reason: &str) {
        if !self.inner.degraded.swap(true, Ordering::Relaxed) {
            warn!("Light output failing, continuing without it: {}", reason);
        }
    }
}
