use super::{DistanceSample, DistanceSource};
use crate::config::SensorConfig;
use crate::error::{EchoPhase, SensorError};
use crate::gpio::{DigitalIo, Level, PinCache, PinHandle, PinMode};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, trace};

/// Half the speed of sound in cm/s; the pulse covers the distance twice
pub const HALF_SPEED_OF_SOUND_CM_PER_S: f64 = 17150.0;

#[derive(Debug, Clone, Copy)]
struct SensorLines {
    trigger: PinHandle,
    echo: PinHandle,
}

/// HC-SR04 style ultrasonic sensor on a trigger/echo pin pair
pub struct DistanceSensor {
    config: SensorConfig,
    pins: Arc<PinCache>,
    lines: OnceCell<SensorLines>,
    /// Held by the blocking worker, so it outlives a dropped caller
    in_flight: Arc<Mutex<()>>,
}

impl DistanceSensor {
    pub fn new(config: SensorConfig, gpio: Arc<dyn DigitalIo>) -> Self {
        Self {
            config,
            pins: Arc::new(PinCache::new(gpio)),
            lines: OnceCell::new(),
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Open and configure the pins, then let the trigger settle low.
    ///
    /// Runs once; later and concurrent calls wait for the first to finish.
    pub async fn initialize(&self) -> Result<(), SensorError> {
        self.lines().await.map(|_| ())
    }

    pub fn is_initialized(&self) -> bool {
        self.lines.initialized()
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    async fn lines(&self) -> Result<SensorLines, SensorError> {
        let lines = self
            .lines
            .get_or_try_init(|| async {
                info!(
                    "Initializing distance sensor (trigger={}, echo={})",
                    self.config.trigger_pin, self.config.echo_pin
                );
                let trigger = self
                    .pins
                    .get_or_open(self.config.trigger_pin, PinMode::Output)?;
                let echo = self.pins.get_or_open(self.config.echo_pin, PinMode::Input)?;

                self.pins.write_handle(&trigger, Level::Low)?;
                tokio::time::sleep(self.config.settle()).await;

                debug!("Distance sensor settled after {:?}", self.config.settle());
                Ok::<_, SensorError>(SensorLines { trigger, echo })
            })
            .await?;
        Ok(*lines)
    }

    /// Trigger one ping and time the echo.
    ///
    /// Busy-polls on a blocking worker: echo widths are microseconds to a few
    /// milliseconds, far below what a timer-driven wait can resolve.
    fn measure_blocking(
        pins: &PinCache,
        lines: SensorLines,
        pulse: Duration,
        timeout: Duration,
    ) -> Result<f64, SensorError> {
        let _boost = PriorityBoost::engage();

        pins.write_handle(&lines.trigger, Level::High)?;
        spin_for(pulse);
        pins.write_handle(&lines.trigger, Level::Low)?;

        let waiting_since = Instant::now();
        while !pins.read_handle(&lines.echo)?.is_high() {
            if waiting_since.elapsed() > timeout {
                return Err(SensorError::timeout(EchoPhase::NoEchoStart, timeout));
            }
            std::hint::spin_loop();
        }

        let pulse_start = Instant::now();
        loop {
            let elapsed = pulse_start.elapsed();
            let distance_cm = elapsed.as_secs_f64() * HALF_SPEED_OF_SOUND_CM_PER_S;

            if !pins.read_handle(&lines.echo)?.is_high() {
                return Ok(distance_cm);
            }
            if elapsed > timeout {
                return Err(SensorError::timeout(EchoPhase::EchoHeldHigh, timeout));
            }
        }
    }
}

#[async_trait]
impl DistanceSource for DistanceSensor {
    async fn measure(&self, timeout: Duration) -> Result<DistanceSample, SensorError> {
        let lines = self.lines().await?;

        // The pin pair is one physical resource
        let guard = Arc::clone(&self.in_flight).lock_owned().await;

        let pins = Arc::clone(&self.pins);
        let pulse = self.config.trigger_pulse();
        let distance_cm = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            Self::measure_blocking(&pins, lines, pulse, timeout)
        })
        .await
        .map_err(|e| SensorError::Worker {
            details: e.to_string(),
        })??;

        trace!("Measured {:.1}cm", distance_cm);
        Ok(DistanceSample::new(distance_cm, self.config.implausible_cm))
    }
}

fn spin_for(duration: Duration) {
    let start = Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}

/// Best-effort scheduling boost for the calling thread while timing a pulse.
/// Restores the previous niceness on drop; silently does nothing without
/// the privilege to raise priority.
struct PriorityBoost {
    #[cfg(target_os = "linux")]
    previous: Option<libc::c_int>,
}

impl PriorityBoost {
    #[cfg(target_os = "linux")]
    fn engage() -> Self {
        use libc::{getpriority, setpriority, PRIO_PROCESS};
        let previous = unsafe { getpriority(PRIO_PROCESS as _, 0) };
        let raised = unsafe { setpriority(PRIO_PROCESS as _, 0, previous - 5) } == 0;
        Self {
            previous: raised.then_some(previous),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn engage() -> Self {
        Self {}
    }
}

impl Drop for PriorityBoost {
    fn drop(&mut self) {
        self.restore();
    }
}

impl PriorityBoost {
    #[cfg(target_os = "linux")]
    fn restore(&mut self) {
        use libc::{setpriority, PRIO_PROCESS};
        if let Some(previous) = self.previous.take() {
            let _ = unsafe { setpriority(PRIO_PROCESS as _, 0, previous) };
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn restore(&mut self) {}
}
