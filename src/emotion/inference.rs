use super::EMOTIONS;
use crate::config::{InferenceConfig, InferenceMode};
use crate::error::DecodeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Outcome of one capture and classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub emotion: String,
    /// Confidence in percent
    pub score: u32,
    #[serde(default, alias = "heartrate")]
    pub heart_rate: Option<u32>,
}

/// Camera capture plus emotion classification
#[async_trait]
pub trait EmotionInference: Send + Sync {
    /// `None` when no face was found or the capture failed
    async fn capture_and_infer(&self) -> Option<InferenceResult>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct FaceRectangle {
    #[serde(default)]
    pub left: u32,
    #[serde(default)]
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRectangle {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Per-category confidence in `0.0..=1.0`
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmotionScores {
    pub anger: f64,
    pub contempt: f64,
    pub disgust: f64,
    pub fear: f64,
    pub happiness: f64,
    pub neutral: f64,
    pub sadness: f64,
    pub surprise: f64,
}

impl EmotionScores {
    fn values(&self) -> [f64; 8] {
        [
            self.anger,
            self.contempt,
            self.disgust,
            self.fear,
            self.happiness,
            self.neutral,
            self.sadness,
            self.surprise,
        ]
    }

    /// Highest scoring category; earlier categories win ties
    pub fn top(&self) -> (&'static str, f64) {
        let mut best = (EMOTIONS[0], f64::NEG_INFINITY);
        for (name, score) in EMOTIONS.iter().zip(self.values()) {
            if score > best.1 {
                best = (*name, score);
            }
        }
        best
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceScores {
    pub face_rectangle: FaceRectangle,
    pub scores: EmotionScores,
}

/// Pick the nearest face (largest rectangle, first on ties) and report its
/// top emotion with the score scaled to percent
pub fn select_nearest_face(faces: &[FaceScores]) -> Option<InferenceResult> {
    let nearest = faces.iter().fold(None::<&FaceScores>, |best, face| match best {
        Some(b) if b.face_rectangle.area() >= face.face_rectangle.area() => Some(b),
        _ => Some(face),
    })?;

    let (emotion, score) = nearest.scores.top();
    Some(InferenceResult {
        emotion: emotion.to_string(),
        score: (score.clamp(0.0, 1.0) * 100.0) as u32,
        heart_rate: None,
    })
}

/// Parse classifier stdout: either a finished result object or a list of
/// per-face score sets
pub fn parse_classifier_output(output: &str) -> Result<Option<InferenceResult>, DecodeError> {
    let malformed = |e: serde_json::Error| DecodeError::Malformed {
        details: e.to_string(),
    };

    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed).map_err(malformed)?;
    let single_face = value.get("faceRectangle").is_some();
    match value {
        Value::Array(_) => {
            let faces: Vec<FaceScores> = serde_json::from_value(value).map_err(malformed)?;
            Ok(select_nearest_face(&faces))
        }
        Value::Object(_) if single_face => {
            let face: FaceScores = serde_json::from_value(value).map_err(malformed)?;
            Ok(select_nearest_face(&[face]))
        }
        Value::Object(_) => serde_json::from_value(value).map(Some).map_err(malformed),
        Value::Null => Ok(None),
        other => Err(DecodeError::Malformed {
            details: format!("unexpected classifier output: {}", other),
        }),
    }
}

/// Reports the same configured emotion for every capture
#[derive(Debug, Clone)]
pub struct FixedInference {
    result: InferenceResult,
}

impl FixedInference {
    pub fn new(emotion: impl Into<String>, score: u32) -> Self {
        Self {
            result: InferenceResult {
                emotion: emotion.into(),
                score,
                heart_rate: None,
            },
        }
    }
}

#[async_trait]
impl EmotionInference for FixedInference {
    async fn capture_and_infer(&self) -> Option<InferenceResult> {
        debug!("Fixed inference: {}", self.result.emotion);
        Some(self.result.clone())
    }
}

/// Runs an external capture/classifier program per request
#[derive(Debug, Clone)]
pub struct CommandInference {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandInference {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl EmotionInference for CommandInference {
    async fn capture_and_infer(&self) -> Option<InferenceResult> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Failed to run classifier {}: {}", self.program, e);
                return None;
            }
            Err(_) => {
                warn!("Classifier {} timed out after {:?}", self.program, self.timeout);
                return None;
            }
        };

        if !output.status.success() {
            warn!(
                "Classifier {} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }

        match parse_classifier_output(&String::from_utf8_lossy(&output.stdout)) {
            Ok(Some(result)) => {
                debug!("Classifier reported {} ({}%)", result.emotion, result.score);
                Some(result)
            }
            Ok(None) => {
                debug!("Classifier found no face");
                None
            }
            Err(e) => {
                warn!("Unreadable classifier output: {}", e);
                None
            }
        }
    }
}

/// Build the configured inference backend
pub fn inference_from_config(config: &InferenceConfig) -> Arc<dyn EmotionInference> {
    match config.mode {
        InferenceMode::Fixed => {
            info!("Using fixed inference ({}, {}%)", config.emotion, config.score);
            Arc::new(FixedInference::new(config.emotion.clone(), config.score))
        }
        InferenceMode::Command => {
            info!("Using classifier command {}", config.program);
            Arc::new(CommandInference::new(
                config.program.clone(),
                config.args.clone(),
                Duration::from_millis(config.timeout_ms),
            ))
        }
    }
}
