use serde::{Deserialize, Serialize};
use std::fmt;

/// 8-bit RGB colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const GREEN: Rgb = Rgb::new(0, 128, 0);
    pub const MAGENTA: Rgb = Rgb::new(255, 0, 255);
    pub const ORANGE_RED: Rgb = Rgb::new(255, 69, 0);
    pub const RED: Rgb = Rgb::new(255, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn is_black(&self) -> bool {
        *self == Rgb::BLACK
    }

    /// Divide every channel by `divisor`, truncating
    pub fn dimmed(&self, divisor: f64) -> Rgb {
        let dim = |c: u8| (f64::from(c) / divisor) as u8;
        Rgb::new(dim(self.r), dim(self.g), dim(self.b))
    }

    pub fn channels(&self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Colour shown for a classified emotion
pub fn emotion_color(emotion: &str) -> Rgb {
    match emotion {
        "Happiness" | "Surprise" => Rgb::GREEN,
        "Neutral" => Rgb::MAGENTA,
        "Sadness" => Rgb::ORANGE_RED,
        "Anger" | "Disgust" | "Contempt" | "Fear" => Rgb::RED,
        _ => Rgb::WHITE,
    }
}
