use super::types::{DigitalIo, Level, PinHandle, PinMode};
use crate::error::GpioError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lazily opened, cached pin handles for one owning component
pub struct PinCache {
    gpio: Arc<dyn DigitalIo>,
    handles: Mutex<HashMap<u8, PinHandle>>,
}

impl PinCache {
    pub fn new(gpio: Arc<dyn DigitalIo>) -> Self {
        Self {
            gpio,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached handle, opening the pin on first use
    pub fn get_or_open(&self, pin: u8, mode: PinMode) -> Result<PinHandle, GpioError> {
        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(&pin) {
            if handle.mode != mode {
                return Err(GpioError::WrongMode {
                    pin,
                    mode: handle.mode.as_str(),
                    operation: "reopen with a different mode",
                });
            }
            return Ok(*handle);
        }

        let handle = self.gpio.open(pin, mode)?;
        debug!("Opened GPIO pin {} as {}", pin, mode.as_str());
        handles.insert(pin, handle);
        Ok(handle)
    }

    /// Drive an output pin, opening it lazily
    pub fn write(&self, pin: u8, level: Level) -> Result<(), GpioError> {
        let handle = self.get_or_open(pin, PinMode::Output)?;
        self.gpio.write(&handle, level)
    }

    pub fn write_handle(&self, handle: &PinHandle, level: Level) -> Result<(), GpioError> {
        self.gpio.write(handle, level)
    }

    pub fn read_handle(&self, handle: &PinHandle) -> Result<Level, GpioError> {
        self.gpio.read(handle)
    }

    pub fn is_open(&self, pin: u8) -> bool {
        self.handles.lock().contains_key(&pin)
    }

    /// Release every pin this cache opened
    pub fn close_all(&self) {
        let handles: Vec<PinHandle> = self.handles.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            if let Err(e) = self.gpio.close(handle) {
                warn!("Failed to close GPIO pin {}: {}", handle.pin, e);
            }
        }
    }
}

impl Drop for PinCache {
    fn drop(&mut self) {
        self.close_all();
    }
}
