//! Emotion readings exchanged between the detector and the light device,
//! plus the inference capability that produces them.

mod control;
mod inference;
mod reading;
#[cfg(test)]
mod tests;

pub use control::{decode_inbound, Inbound, LightStateNotice, ResetCommand};
pub use inference::{
    inference_from_config, parse_classifier_output, select_nearest_face, CommandInference,
    EmotionInference, EmotionScores, FaceRectangle, FaceScores, FixedInference, InferenceResult,
};
pub use reading::{EmotionReading, Stage};

/// The eight categories reported by the classifier, in tie-break order
pub const EMOTIONS: [&str; 8] = [
    "Anger",
    "Contempt",
    "Disgust",
    "Fear",
    "Happiness",
    "Neutral",
    "Sadness",
    "Surprise",
];

pub const NEUTRAL: &str = "Neutral";
