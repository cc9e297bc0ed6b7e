use crate::error::GpioError;

/// Logic level of a digital pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn from_bool(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }

    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinMode {
    Input,
    Output,
}

impl PinMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PinMode::Input => "input",
            PinMode::Output => "output",
        }
    }
}

/// An opened pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PinHandle {
    pub pin: u8,
    pub mode: PinMode,
}

/// Digital pin capability supplied by the platform.
///
/// Reads sit on the sensor's busy-poll path, so implementations must not
/// block beyond the cost of the underlying register or file access.
pub trait DigitalIo: Send + Sync {
    fn open(&self, pin: u8, mode: PinMode) -> Result<PinHandle, GpioError>;
    fn write(&self, handle: &PinHandle, level: Level) -> Result<(), GpioError>;
    fn read(&self, handle: &PinHandle) -> Result<Level, GpioError>;
    fn close(&self, handle: PinHandle) -> Result<(), GpioError>;
}

pub(crate) fn ensure_mode(
    handle: &PinHandle,
    expected: PinMode,
    operation: &'static str,
) -> Result<(), GpioError> {
    if handle.mode != expected {
        return Err(GpioError::WrongMode {
            pin: handle.pin,
            mode: handle.mode.as_str(),
            operation,
        });
    }
    Ok(())
}
