use super::types::{ensure_mode, DigitalIo, Level, PinHandle, PinMode};
use crate::error::GpioError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

/// Only the most recent writes are kept so long simulated runs stay bounded
const WRITE_LOG_CAPACITY: usize = 8192;

/// Delay between the trigger's falling edge and the echo rising
const ECHO_START_DELAY: Duration = Duration::from_micros(100);

/// How the simulated ultrasonic module answers a trigger pulse
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EchoBehavior {
    /// Echo pulse whose width matches the round trip to this distance
    Distance(f64),
    /// Echo line never rises
    NoResponse,
    /// Echo line is stuck high
    StuckHigh,
}

/// One recorded output write
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinWrite {
    pub pin: u8,
    pub level: Level,
    pub at: Instant,
}

#[derive(Debug)]
struct SimPin {
    mode: PinMode,
    level: Level,
}

#[derive(Debug)]
struct EchoModel {
    trigger_pin: u8,
    echo_pin: u8,
    behavior: EchoBehavior,
    fired_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct SimState {
    pins: HashMap<u8, SimPin>,
    writes: VecDeque<PinWrite>,
    echo: Option<EchoModel>,
    opens: HashMap<u8, u32>,
}

/// In-memory GPIO controller with an HC-SR04 style echo model
#[derive(Debug, Default)]
pub struct SimulatedGpio {
    state: Mutex<SimState>,
    unavailable: bool,
}

impl SimulatedGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// A controller that behaves like a board without GPIO
    pub fn unavailable() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            unavailable: true,
        }
    }

    /// Wire an echo model between a trigger and an echo pin
    pub fn attach_echo(&self, trigger_pin: u8, echo_pin: u8, behavior: EchoBehavior) {
        let mut state = self.state.lock();
        state.echo = Some(EchoModel {
            trigger_pin,
            echo_pin,
            behavior,
            fired_at: None,
        });
    }

    /// Change the echo answer for subsequent measurements
    pub fn set_echo_behavior(&self, behavior: EchoBehavior) {
        if let Some(echo) = self.state.lock().echo.as_mut() {
            debug!("Simulated echo behavior now {:?}", behavior);
            echo.behavior = behavior;
        }
    }

    pub fn echo_behavior(&self) -> Option<EchoBehavior> {
        self.state.lock().echo.as_ref().map(|e| e.behavior)
    }

    pub fn level(&self, pin: u8) -> Option<Level> {
        self.state.lock().pins.get(&pin).map(|p| p.level)
    }

    pub fn is_open(&self, pin: u8) -> bool {
        self.state.lock().pins.contains_key(&pin)
    }

    /// How many times a pin was opened
    pub fn open_count(&self, pin: u8) -> u32 {
        self.state.lock().opens.get(&pin).copied().unwrap_or(0)
    }

    pub fn writes(&self) -> Vec<PinWrite> {
        self.state.lock().writes.iter().copied().collect()
    }

    pub fn writes_to(&self, pin: u8) -> Vec<PinWrite> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| w.pin == pin)
            .copied()
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    fn echo_level(echo: &EchoModel, now: Instant) -> Level {
        match echo.behavior {
            EchoBehavior::NoResponse => Level::Low,
            EchoBehavior::StuckHigh => Level::High,
            EchoBehavior::Distance(cm) => {
                let Some(fired_at) = echo.fired_at else {
                    return Level::Low;
                };
                let width = Duration::from_secs_f64((cm.max(0.0)) / 17150.0);
                let elapsed = now.saturating_duration_since(fired_at);
                Level::from_bool(
                    elapsed >= ECHO_START_DELAY && elapsed < ECHO_START_DELAY + width,
                )
            }
        }
    }
}

impl DigitalIo for SimulatedGpio {
    fn open(&self, pin: u8, mode: PinMode) -> Result<PinHandle, GpioError> {
        if self.unavailable {
            return Err(GpioError::Unavailable);
        }

        let mut state = self.state.lock();
        let level = state.pins.get(&pin).map(|p| p.level).unwrap_or(Level::Low);
        state.pins.insert(pin, SimPin { mode, level });
        *state.opens.entry(pin).or_insert(0) += 1;
        Ok(PinHandle { pin, mode })
    }

    fn write(&self, handle: &PinHandle, level: Level) -> Result<(), GpioError> {
        ensure_mode(handle, PinMode::Output, "write")?;
        let now = Instant::now();
        let mut state = self.state.lock();

        let pin = state
            .pins
            .get_mut(&handle.pin)
            .ok_or(GpioError::NotOpen { pin: handle.pin })?;
        let previous = pin.level;
        pin.level = level;

        if let Some(echo) = state.echo.as_mut() {
            if echo.trigger_pin == handle.pin && previous.is_high() && !level.is_high() {
                echo.fired_at = Some(now);
            }
        }

        if state.writes.len() == WRITE_LOG_CAPACITY {
            state.writes.pop_front();
        }
        state.writes.push_back(PinWrite {
            pin: handle.pin,
            level,
            at: now,
        });
        Ok(())
    }

    fn read(&self, handle: &PinHandle) -> Result<Level, GpioError> {
        let now = Instant::now();
        let state = self.state.lock();

        if let Some(echo) = state.echo.as_ref() {
            if echo.echo_pin == handle.pin {
                return Ok(Self::echo_level(echo, now));
            }
        }

        state
            .pins
            .get(&handle.pin)
            .map(|p| p.level)
            .ok_or(GpioError::NotOpen { pin: handle.pin })
    }

    fn close(&self, handle: PinHandle) -> Result<(), GpioError> {
        let mut state = self.state.lock();
        if let Some(pin) = state.pins.get(&handle.pin) {
            if pin.mode == handle.mode {
                state.pins.remove(&handle.pin);
            }
        }
        Ok(())
    }
}
