use super::types::{ensure_mode, DigitalIo, Level, PinHandle, PinMode};
use crate::error::GpioError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// udev may need a moment to hand out permissions on a freshly exported pin
const EXPORT_WAIT: Duration = Duration::from_millis(500);

/// Linux sysfs GPIO (`/sys/class/gpio`)
pub struct SysfsGpio {
    root: PathBuf,
    values: Mutex<HashMap<u8, File>>,
}

impl SysfsGpio {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, GpioError> {
        let root = root.as_ref().to_path_buf();
        if !root.join("export").exists() {
            return Err(GpioError::Unavailable);
        }

        Ok(Self {
            root,
            values: Mutex::new(HashMap::new()),
        })
    }

    fn pin_dir(&self, pin: u8) -> PathBuf {
        self.root.join(format!("gpio{}", pin))
    }

    fn export(&self, pin: u8) -> Result<(), GpioError> {
        let dir = self.pin_dir(pin);
        if dir.exists() {
            return Ok(());
        }

        fs::write(self.root.join("export"), pin.to_string()).map_err(|e| GpioError::Open {
            pin,
            details: format!("export failed: {}", e),
        })?;

        let started = Instant::now();
        while !dir.join("value").exists() {
            if started.elapsed() > EXPORT_WAIT {
                return Err(GpioError::Open {
                    pin,
                    details: "exported pin never appeared".to_string(),
                });
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }

    fn set_direction(&self, pin: u8, mode: PinMode) -> Result<(), GpioError> {
        // "low" configures an output and drives it low in one step
        let direction = match mode {
            PinMode::Input => "in",
            PinMode::Output => "low",
        };

        let path = self.pin_dir(pin).join("direction");
        let started = Instant::now();
        loop {
            match fs::write(&path, direction) {
                Ok(()) => return Ok(()),
                Err(e)
                    if e.kind() == std::io::ErrorKind::PermissionDenied
                        && started.elapsed() < EXPORT_WAIT =>
                {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    return Err(GpioError::Open {
                        pin,
                        details: format!("setting direction failed: {}", e),
                    })
                }
            }
        }
    }
}

impl DigitalIo for SysfsGpio {
    fn open(&self, pin: u8, mode: PinMode) -> Result<PinHandle, GpioError> {
        self.export(pin)?;
        self.set_direction(pin, mode)?;

        let file = OpenOptions::new()
            .read(true)
            .write(mode == PinMode::Output)
            .open(self.pin_dir(pin).join("value"))
            .map_err(|e| GpioError::Open {
                pin,
                details: e.to_string(),
            })?;

        self.values.lock().insert(pin, file);
        debug!("sysfs GPIO {} opened as {}", pin, mode.as_str());
        Ok(PinHandle { pin, mode })
    }

    fn write(&self, handle: &PinHandle, level: Level) -> Result<(), GpioError> {
        ensure_mode(handle, PinMode::Output, "write")?;
        let mut values = self.values.lock();
        let file = values
            .get_mut(&handle.pin)
            .ok_or(GpioError::NotOpen { pin: handle.pin })?;

        let byte: &[u8] = if level.is_high() { b"1" } else { b"0" };
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.write_all(byte))
            .map_err(|e| GpioError::Io {
                pin: handle.pin,
                details: e.to_string(),
            })
    }

    fn read(&self, handle: &PinHandle) -> Result<Level, GpioError> {
        let mut values = self.values.lock();
        let file = values
            .get_mut(&handle.pin)
            .ok_or(GpioError::NotOpen { pin: handle.pin })?;

        let mut buf = [0u8; 1];
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|e| GpioError::Io {
                pin: handle.pin,
                details: e.to_string(),
            })?;

        Ok(Level::from_bool(buf[0] == b'1'))
    }

    fn close(&self, handle: PinHandle) -> Result<(), GpioError> {
        self.values.lock().remove(&handle.pin);
        if let Err(e) = fs::write(self.root.join("unexport"), handle.pin.to_string()) {
            warn!("Failed to unexport GPIO {}: {}", handle.pin, e);
        }
        Ok(())
    }
}
