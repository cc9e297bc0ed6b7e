use super::message::{Message, MessageTransport};
use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

struct DeviceQueue {
    pending: VecDeque<Message>,
    /// Delivered but not yet completed, with the time the lock was taken
    in_flight: HashMap<u64, (Message, Instant)>,
    notify: Arc<Notify>,
}

impl DeviceQueue {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Move messages whose lock expired back to the front of the queue
    fn requeue_expired(&mut self, now: Instant, lock_duration: Duration) {
        let mut expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, (_, locked_at))| now.saturating_duration_since(*locked_at) >= lock_duration)
            .map(|(id, _)| *id)
            .collect();
        // Oldest first so transport order survives redelivery
        expired.sort_unstable_by(|a, b| b.cmp(a));
        for id in expired {
            if let Some((message, _)) = self.in_flight.remove(&id) {
                debug!("Lock expired on message {}, redelivering", id);
                self.pending.push_front(message);
            }
        }
    }
}

struct HubShared {
    devices: Mutex<HashMap<String, DeviceQueue>>,
    next_id: AtomicU64,
    lock_duration: Duration,
    closed: AtomicBool,
}

/// In-process relay routing messages between named device endpoints.
///
/// Each device has its own queue with peek-lock semantics: a received
/// message is locked to the receiver until completed, and becomes
/// visible again once its lock expires.
#[derive(Clone)]
pub struct MessageHub {
    shared: Arc<HubShared>,
}

impl MessageHub {
    pub fn new(lock_duration: Duration) -> Self {
        Self {
            shared: Arc::new(HubShared {
                devices: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                lock_duration,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a device and return its endpoint; registering twice shares the queue
    pub fn endpoint(&self, device: &str) -> HubEndpoint {
        self.shared
            .devices
            .lock()
            .entry(device.to_string())
            .or_insert_with(DeviceQueue::new);
        HubEndpoint {
            device: device.to_string(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Messages waiting or locked for a device
    pub fn depth(&self, device: &str) -> usize {
        self.shared
            .devices
            .lock()
            .get(device)
            .map(|q| q.pending.len() + q.in_flight.len())
            .unwrap_or(0)
    }

    /// Fail every subsequent transport call and wake blocked receivers
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        for queue in self.shared.devices.lock().values() {
            queue.notify.notify_waiters();
        }
    }
}

/// One device's view of the hub
#[derive(Clone)]
pub struct HubEndpoint {
    device: String,
    shared: Arc<HubShared>,
}

impl HubEndpoint {
    pub fn device(&self) -> &str {
        &self.device
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageTransport for HubEndpoint {
    async fn receive(&self, timeout: Duration) -> Result<Option<Message>, TransportError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            self.ensure_open()?;

            let notify = {
                let mut devices = self.shared.devices.lock();
                let queue = devices
                    .get_mut(&self.device)
                    .ok_or_else(|| TransportError::Receive {
                        details: format!("device {} is not registered", self.device),
                    })?;

                let now = Instant::now();
                queue.requeue_expired(now, self.shared.lock_duration);

                if let Some(mut message) = queue.pending.pop_front() {
                    message.delivery_count += 1;
                    queue.in_flight.insert(message.id, (message.clone(), now));
                    trace!(
                        "Delivering message {} to {} (attempt {})",
                        message.id,
                        self.device,
                        message.delivery_count
                    );
                    return Ok(Some(message));
                }

                Arc::clone(&queue.notify)
            };

            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn complete(&self, message: &Message) -> Result<(), TransportError> {
        self.ensure_open()?;

        let mut devices = self.shared.devices.lock();
        let removed = devices
            .get_mut(&self.device)
            .and_then(|q| q.in_flight.remove(&message.id));

        match removed {
            Some(_) => {
                trace!("Completed message {} on {}", message.id, self.device);
                Ok(())
            }
            None => {
                warn!(
                    "Message {} on {} was not locked (already completed or lock expired)",
                    message.id, self.device
                );
                Err(TransportError::Complete {
                    message_id: message.id,
                    details: "message lock not held".to_string(),
                })
            }
        }
    }

    async fn send(&self, destination: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_open()?;

        let mut devices = self.shared.devices.lock();
        let queue = devices
            .get_mut(destination)
            .ok_or_else(|| TransportError::UnknownDestination(destination.to_string()))?;

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        queue.pending.push_back(Message {
            id,
            source: self.device.clone(),
            payload,
            delivery_count: 0,
        });
        queue.notify.notify_one();
        debug!("Queued message {} from {} to {}", id, self.device, destination);
        Ok(())
    }
}
