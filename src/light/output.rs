use super::color::Rgb;
use crate::error::GpioError;
use parking_lot::Mutex;

/// Something that can show one RGB colour
pub trait ColorOutput: Send + Sync {
    fn set_color(&self, color: Rgb) -> Result<(), GpioError>;

    /// Colour most recently set
    fn color(&self) -> Rgb;
}

/// Remembers the colour without driving hardware
#[derive(Debug, Default)]
pub struct NullColorOutput {
    color: Mutex<Rgb>,
}

impl NullColorOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ColorOutput for NullColorOutput {
    fn set_color(&self, color: Rgb) -> Result<(), GpioError> {
        *self.color.lock() = color;
        Ok(())
    }

    fn color(&self) -> Rgb {
        *self.color.lock()
    }
}
