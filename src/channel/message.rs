use crate::error::{TransportError, TreelightError};
use async_trait::async_trait;
use std::time::Duration;

/// One inbound message as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    /// Endpoint that sent the message
    pub source: String,
    pub payload: Vec<u8>,
    /// How many times this message has been handed out, starting at 1
    pub delivery_count: u32,
}

impl Message {
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Message queue capability.
///
/// A received message stays locked to the receiver until it is completed;
/// uncompleted messages are handed out again later.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Wait up to `timeout` for the next message; `Ok(None)` on an empty poll
    async fn receive(&self, timeout: Duration) -> Result<Option<Message>, TransportError>;

    /// Acknowledge a processed message so it is not redelivered
    async fn complete(&self, message: &Message) -> Result<(), TransportError>;

    async fn send(&self, destination: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Local processing step for received messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Returning an error leaves the message unacknowledged
    async fn handle(&self, message: &Message) -> Result<(), TreelightError>;
}
