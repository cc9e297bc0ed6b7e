use super::reading::EmotionReading;
use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{"lightState":"On"}`, sent by the light device once it shows a colour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightStateNotice {
    #[serde(rename = "lightState")]
    pub light_state: String,
}

impl LightStateNotice {
    pub fn on() -> Self {
        Self {
            light_state: "On".to_string(),
        }
    }
}

/// `{"command":"reset"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetCommand {
    pub command: String,
}

impl ResetCommand {
    pub fn new() -> Self {
        Self {
            command: "reset".to_string(),
        }
    }
}

impl Default for ResetCommand {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything a device may receive
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Reading(EmotionReading),
    LightsOn,
    Reset,
    /// Well-formed JSON this system does not act on
    Unrecognized(String),
}

/// Classify an inbound payload by the fields it carries
pub fn decode_inbound(payload: &[u8]) -> Result<Inbound, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::InvalidUtf8)?;
    let value: Value = serde_json::from_str(text).map_err(|e| DecodeError::Malformed {
        details: e.to_string(),
    })?;

    let Some(object) = value.as_object() else {
        return Err(DecodeError::Malformed {
            details: "expected a JSON object".to_string(),
        });
    };

    if let Some(command) = object.get("command").and_then(Value::as_str) {
        if command.eq_ignore_ascii_case("reset") {
            return Ok(Inbound::Reset);
        }
        return Ok(Inbound::Unrecognized(format!("command {}", command)));
    }

    if let Some(state) = object.get("lightState").and_then(Value::as_str) {
        if state.eq_ignore_ascii_case("on") {
            return Ok(Inbound::LightsOn);
        }
        return Ok(Inbound::Unrecognized(format!("lightState {}", state)));
    }

    if object.contains_key("stage") || object.contains_key("sessionid") {
        return serde_json::from_value(value)
            .map(Inbound::Reading)
            .map_err(|e| DecodeError::Malformed {
                details: e.to_string(),
            });
    }

    Ok(Inbound::Unrecognized(text.chars().take(64).collect()))
}
