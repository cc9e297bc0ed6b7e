use super::types::SessionControl;
use crate::channel::{Message, MessageHandler};
use crate::emotion::{decode_inbound, Inbound};
use crate::error::TreelightError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Turns inbound detector messages into session control inputs
pub struct ControlForwarder {
    tx: mpsc::Sender<SessionControl>,
}

impl ControlForwarder {
    pub fn new(tx: mpsc::Sender<SessionControl>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl MessageHandler for ControlForwarder {
    async fn handle(&self, message: &Message) -> Result<(), TreelightError> {
        let control = match decode_inbound(&message.payload) {
            Ok(Inbound::LightsOn) => SessionControl::LightsOn,
            Ok(Inbound::Reset) => SessionControl::Reset,
            Ok(other) => {
                debug!("Detector ignoring message {}: {:?}", message.id, other);
                return Ok(());
            }
            Err(e) => {
                // Redelivering an undecodable payload cannot help
                warn!("Dropping undecodable message {}: {}", message.id, e);
                return Ok(());
            }
        };

        self.tx
            .send(control)
            .await
            .map_err(|_| TreelightError::component("session", "control queue closed"))
    }
}
