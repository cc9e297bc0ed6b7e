use super::color::Rgb;
use super::output::ColorOutput;
use crate::error::GpioError;
use crate::gpio::{Level, PinCache};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// RGB LED on three plain digital pins, driven by a software PWM thread.
///
/// Each period raises every non-zero channel, then drops each one once its
/// share of the period has passed.
pub struct SoftPwmColor {
    pins: Arc<PinCache>,
    rgb_pins: [u8; 3],
    duty: Arc<Mutex<Rgb>>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl SoftPwmColor {
    pub fn start(pins: Arc<PinCache>, rgb_pins: [u8; 3], frequency_hz: u32) -> Result<Self, GpioError> {
        for pin in rgb_pins {
            pins.write(pin, Level::Low)?;
        }

        let duty = Arc::new(Mutex::new(Rgb::BLACK));
        let cancel = CancellationToken::new();
        let period = Duration::from_secs(1) / frequency_hz.max(1);

        let worker = {
            let duty = Arc::clone(&duty);
            let cancel = cancel.clone();
            let pins = Arc::clone(&pins);
            std::thread::Builder::new()
                .name("soft-pwm".to_string())
                .spawn(move || pwm_loop(&pins, rgb_pins, period, &duty, &cancel))
                .map_err(|e| GpioError::Open {
                    pin: rgb_pins[0],
                    details: format!("failed to start PWM thread: {}", e),
                })?
        };

        debug!("Software PWM running at {}Hz on pins {:?}", frequency_hz, rgb_pins);
        Ok(Self {
            pins,
            rgb_pins,
            duty,
            cancel,
            worker: Some(worker),
        })
    }

    /// Stop the PWM thread and leave the LED dark
    pub fn stop(&mut self) {
        self.cancel.cancel();
        let Some(worker) = self.worker.take() else {
            return;
        };
        if worker.join().is_err() {
            warn!("Software PWM thread panicked");
            for pin in self.rgb_pins {
                let _ = self.pins.write(pin, Level::Low);
            }
        }
    }
}

impl ColorOutput for SoftPwmColor {
    fn set_color(&self, color: Rgb) -> Result<(), GpioError> {
        *self.duty.lock() = color;
        Ok(())
    }

    fn color(&self) -> Rgb {
        *self.duty.lock()
    }
}

impl Drop for SoftPwmColor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pwm_loop(
    pins: &PinCache,
    rgb_pins: [u8; 3],
    period: Duration,
    duty: &Mutex<Rgb>,
    cancel: &CancellationToken,
) {
    // Only level changes reach the pins
    let mut levels: [Option<Level>; 3] = [None; 3];
    let mut failed = false;
    let mut set = |channel: usize, level: Level| {
        if levels[channel] == Some(level) {
            return;
        }
        levels[channel] = Some(level);
        if let Err(e) = pins.write(rgb_pins[channel], level) {
            if !failed {
                warn!("Software PWM write failed: {}", e);
                failed = true;
            }
        }
    };

    while !cancel.is_cancelled() {
        let started = Instant::now();
        let channels = duty.lock().channels();

        let mut off_at: Vec<(Duration, usize)> = Vec::with_capacity(3);
        for (channel, value) in channels.into_iter().enumerate() {
            match value {
                0 => set(channel, Level::Low),
                u8::MAX => set(channel, Level::High),
                partial => {
                    set(channel, Level::High);
                    off_at.push((period * u32::from(partial) / 255, channel));
                }
            }
        }
        off_at.sort_unstable();

        for (at, channel) in off_at {
            if let Some(wait) = at.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
            set(channel, Level::Low);
        }

        if let Some(rest) = period.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    for channel in 0..3 {
        set(channel, Level::Low);
    }
}
