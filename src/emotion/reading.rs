use crate::error::DecodeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Where a session is when a reading is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Stage {
    Detected,
    Confirmed,
    Gone,
}

impl TryFrom<u8> for Stage {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Stage::Detected),
            1 => Ok(Stage::Confirmed),
            2 => Ok(Stage::Gone),
            other => Err(DecodeError::UnknownStage(other)),
        }
    }
}

impl From<Stage> for u8 {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Detected => 0,
            Stage::Confirmed => 1,
            Stage::Gone => 2,
        }
    }
}

/// Flat JSON payload sent from the detector to the light device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionReading {
    #[serde(rename = "sessionid")]
    pub session_id: Uuid,
    pub stage: Stage,
    #[serde(default)]
    pub emotion: String,
    #[serde(default)]
    pub score: u32,
    #[serde(
        default,
        deserialize_with = "lenient_heart_rate",
        skip_serializing_if = "Option::is_none"
    )]
    pub heartrate: Option<u32>,
    #[serde(rename = "userpresent", default = "present")]
    pub user_present: bool,
    #[serde(default = "Utc::now")]
    pub date: DateTime<Utc>,
}

fn present() -> bool {
    true
}

/// Heart rate may arrive as a number, a numeric string, or not at all.
/// Anything unparseable counts as absent.
fn lenient_heart_rate<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
        Other(serde_json::Value),
    }

    let value = match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(n)) => Some(n),
        Some(Raw::Text(s)) => s.trim().parse::<f64>().ok(),
        Some(Raw::Other(_)) | None => None,
    };

    Ok(value
        .filter(|n| n.is_finite() && *n >= 0.0 && *n <= u32::MAX as f64)
        .map(|n| n.round() as u32))
}

impl EmotionReading {
    pub fn new(session_id: Uuid, stage: Stage, emotion: impl Into<String>, score: u32) -> Self {
        Self {
            session_id,
            stage,
            emotion: emotion.into(),
            score,
            heartrate: None,
            user_present: stage != Stage::Gone,
            date: Utc::now(),
        }
    }

    pub fn with_heart_rate(mut self, heart_rate: Option<u32>) -> Self {
        self.heartrate = heart_rate;
        self
    }

    /// Closing reading for a session
    pub fn gone(session_id: Uuid) -> Self {
        Self::new(session_id, Stage::Gone, "", 0)
    }

    /// Whether the light device should be showing anything for this reading
    pub fn wants_lights(&self) -> bool {
        self.user_present && self.stage != Stage::Gone
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(payload).map_err(|_| DecodeError::InvalidUtf8)?;
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed {
            details: e.to_string(),
        })
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, DecodeError> {
        serde_json::to_vec(self).map_err(|e| DecodeError::Malformed {
            details: e.to_string(),
        })
    }
}
