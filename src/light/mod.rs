//! Row lights and RGB LED: colours, the blink/breathing animation, and the
//! light device service that reacts to emotion readings.

mod animator;
mod color;
mod controller;
mod driver;
mod output;
mod pwm;
mod service;
#[cfg(test)]
mod tests;

pub use animator::{AnimationSlot, AnimationToken, BreathingCycle, LightAnimator};
pub use color::{emotion_color, Rgb};
pub use controller::LightController;
pub use driver::LightDriver;
pub use output::{ColorOutput, NullColorOutput};
pub use pwm::SoftPwmColor;
pub use service::{LightService, LightState};
