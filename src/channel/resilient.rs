use super::message::{Message, MessageHandler, MessageTransport};
use crate::backoff::Backoff;
use crate::config::ChannelConfig;
use crate::error::TransportError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub struct ChannelStats {
    received: AtomicU64,
    completed: AtomicU64,
    receive_failures: AtomicU64,
    handler_failures: AtomicU64,
    sends: AtomicU64,
    send_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStatsSnapshot {
    pub received: u64,
    pub completed: u64,
    pub receive_failures: u64,
    pub handler_failures: u64,
    pub sends: u64,
    pub send_failures: u64,
}

impl ChannelStats {
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            receive_failures: self.receive_failures.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            sends: self.sends.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

/// Receive loop that survives any transport failure.
///
/// Every successful receive, empty polls included, resets the backoff to its
/// base; every failure sleeps the current delay and multiplies it, up to the
/// ceiling. Only cancellation ends the loop.
pub struct ResilientChannel {
    transport: Arc<dyn MessageTransport>,
    backoff: Backoff,
    receive_timeout: Duration,
    stats: Arc<ChannelStats>,
}

impl ResilientChannel {
    pub fn new(transport: Arc<dyn MessageTransport>, config: &ChannelConfig) -> Self {
        Self {
            transport,
            backoff: Backoff::new(
                config.base_delay(),
                config.growth_factor,
                config.max_delay(),
            ),
            receive_timeout: config.receive_timeout(),
            stats: Arc::new(ChannelStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ChannelStats> {
        Arc::clone(&self.stats)
    }

    /// Sender sharing this channel's transport and counters
    pub fn sender(&self, destination: impl Into<String>) -> ChannelSender {
        ChannelSender {
            transport: Arc::clone(&self.transport),
            destination: destination.into(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Delay the next failure would sleep
    pub fn current_delay(&self) -> Duration {
        self.backoff.current_delay()
    }

    /// Wait for the next message; `None` only once cancelled
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<Message> {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => return None,
                received = self.transport.receive(self.receive_timeout) => received,
            };

            match received {
                Ok(Some(message)) => {
                    self.backoff.reset();
                    self.stats.received.fetch_add(1, Ordering::Relaxed);
                    return Some(message);
                }
                Ok(None) => self.backoff.reset(),
                Err(e) => {
                    self.stats.receive_failures.fetch_add(1, Ordering::Relaxed);
                    let delay = self.backoff.next_delay();
                    error!("Receive failed: {} (retrying in {:?})", e, delay);

                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Complete a message after it was processed
    pub async fn acknowledge(&self, message: &Message) -> Result<(), TransportError> {
        match self.transport.complete(message).await {
            Ok(()) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to complete message {}: {}", message.id, e);
                Err(e)
            }
        }
    }

    /// Feed messages to `handler` until cancelled.
    ///
    /// A message is acknowledged only when the handler succeeds; otherwise it
    /// stays locked and the transport redelivers it later.
    pub async fn run<H>(mut self, handler: Arc<H>, cancel: CancellationToken)
    where
        H: MessageHandler + ?Sized,
    {
        info!("Message receive loop started");

        while let Some(message) = self.next(&cancel).await {
            debug!(
                "Received message {} from {} ({} bytes)",
                message.id,
                message.source,
                message.payload.len()
            );

            match handler.handle(&message).await {
                Ok(()) => {
                    let _ = self.acknowledge(&message).await;
                }
                Err(e) => {
                    self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Processing message {} failed, leaving it for redelivery: {}",
                        message.id, e
                    );
                }
            }
        }

        info!("Message receive loop stopped");
    }
}

/// Best-effort sender to one destination
#[derive(Clone)]
pub struct ChannelSender {
    transport: Arc<dyn MessageTransport>,
    destination: String,
    stats: Arc<ChannelStats>,
}

impl ChannelSender {
    pub fn new(transport: Arc<dyn MessageTransport>, destination: impl Into<String>) -> Self {
        Self {
            transport,
            destination: destination.into(),
            stats: Arc::new(ChannelStats::default()),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Single attempt; failures are logged and returned, never retried
    pub async fn send_best_effort(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.stats.sends.fetch_add(1, Ordering::Relaxed);
        match self.transport.send(&self.destination, payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                error!("Send to {} failed: {}", self.destination, e);
                Err(e)
            }
        }
    }

    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(value).map_err(|e| TransportError::Send {
            destination: self.destination.clone(),
            details: e.to_string(),
        })?;
        self.send_best_effort(payload).await
    }
}
