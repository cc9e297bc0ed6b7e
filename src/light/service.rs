use super::color::Rgb;
use super::controller::LightController;
use crate::channel::{ChannelSender, Message, MessageHandler};
use crate::emotion::{decode_inbound, EmotionReading, Inbound, LightStateNotice, Stage, NEUTRAL};
use crate::error::TreelightError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const STARTUP_FLASH: Duration = Duration::from_millis(50);

/// What the light device currently believes about the person in front of the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightState {
    pub emotion: String,
    pub heart_rate: u32,
    /// Stage and emotion last acted on while someone was present
    pub last_stage: Option<Stage>,
    pub last_emotion: Option<String>,
}

impl LightState {
    fn neutral(heart_rate: u32) -> Self {
        Self {
            emotion: NEUTRAL.to_string(),
            heart_rate,
            last_stage: None,
            last_emotion: None,
        }
    }
}

/// Light device role: turns received readings into light changes
pub struct LightService {
    lights: Arc<LightController>,
    partner: Option<ChannelSender>,
    default_heart_rate: u32,
    state: Mutex<LightState>,
}

impl LightService {
    pub fn new(
        lights: Arc<LightController>,
        partner: Option<ChannelSender>,
        default_heart_rate: u32,
    ) -> Self {
        Self {
            lights,
            partner,
            default_heart_rate,
            state: Mutex::new(LightState::neutral(default_heart_rate)),
        }
    }

    /// Light check at startup: a short white flash, then dark
    pub async fn startup(&self, flash: bool) {
        if flash {
            self.lights.driver().flash(Rgb::WHITE, STARTUP_FLASH).await;
        }
        self.lights.reset().await;
        info!("Light service ready");
    }

    pub async fn state(&self) -> LightState {
        self.state.lock().await.clone()
    }

    pub fn lights(&self) -> &Arc<LightController> {
        &self.lights
    }

    /// Apply one reading to the lights
    pub async fn apply(&self, reading: &EmotionReading) {
        let mut state = self.state.lock().await;
        state.heart_rate = reading.heartrate.unwrap_or(self.default_heart_rate);
        if !reading.emotion.is_empty() {
            state.emotion = reading.emotion.clone();
        }

        if !reading.wants_lights() {
            info!("Session {} over, switching lights off", reading.session_id);
            state.last_stage = None;
            state.last_emotion = None;
            self.lights.reset().await;
            return;
        }

        let emotion = state.emotion.clone();
        match reading.stage {
            Stage::Detected => {
                self.lights.show_solid(&emotion).await;
                self.confirm().await;
            }
            Stage::Confirmed => {
                let changed = state.last_stage != Some(Stage::Confirmed)
                    || state.last_emotion.as_deref() != Some(emotion.as_str());
                if changed {
                    self.lights.animate(&emotion).await;
                } else {
                    debug!("Reading unchanged, animation keeps running");
                }
            }
            Stage::Gone => {}
        }

        state.last_stage = Some(reading.stage);
        state.last_emotion = Some(emotion);
    }

    /// Stop everything and forget the session
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = LightState::neutral(self.default_heart_rate);
        self.lights.reset().await;
    }

    async fn confirm(&self) {
        let Some(partner) = &self.partner else {
            return;
        };
        // Best effort; the detector falls back to its confirmation timeout
        if partner.send_json(&LightStateNotice::on()).await.is_ok() {
            debug!("Sent light confirmation to {}", partner.destination());
        }
    }

    async fn fall_back_to_neutral(&self) {
        let mut state = self.state.lock().await;
        state.emotion = NEUTRAL.to_string();
        state.heart_rate = self.default_heart_rate;
    }
}

#[async_trait]
impl MessageHandler for LightService {
    async fn handle(&self, message: &Message) -> Result<(), TreelightError> {
        match decode_inbound(&message.payload) {
            Ok(Inbound::Reading(reading)) => {
                debug!(
                    "Reading for {}: {:?} {} ({})",
                    reading.session_id, reading.stage, reading.emotion, reading.score
                );
                self.apply(&reading).await;
            }
            Ok(Inbound::Reset) => {
                info!("Reset command received");
                self.reset().await;
            }
            Ok(Inbound::LightsOn) => debug!("Ignoring light confirmation echo"),
            Ok(Inbound::Unrecognized(what)) => debug!("Ignoring message: {}", what),
            Err(e) => {
                warn!(
                    "Undecodable message {} ({}), assuming neutral",
                    message.id, e
                );
                self.fall_back_to_neutral().await;
            }
        }
        Ok(())
    }
}
