use crate::emotion::Stage;
use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur in the treelight system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreelightEvent {
    /// Someone stopped in front of the sensor
    PersonApproached {
        distance_cm: f64,
        timestamp: SystemTime,
    },
    /// The person in front of the sensor walked away
    PersonLeft {
        distance_cm: f64,
        timestamp: SystemTime,
    },
    /// A new session was opened on approach
    SessionStarted { session_id: Uuid },
    /// A reading for the session was sent to the light device
    ReadingSent {
        session_id: Uuid,
        stage: Stage,
        emotion: String,
    },
    /// The session was closed
    SessionClosed { session_id: Uuid, reason: String },
    /// The lights now show an emotion colour
    LightsChanged { emotion: String, animating: bool },
    /// The lights were switched off
    LightsReset { timestamp: SystemTime },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl TreelightEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            TreelightEvent::PersonApproached { distance_cm, .. } => {
                format!("Person approached at {:.1}cm", distance_cm)
            }
            TreelightEvent::PersonLeft { distance_cm, .. } => {
                format!("Person left ({:.1}cm)", distance_cm)
            }
            TreelightEvent::SessionStarted { session_id } => {
                format!("Session {} started", session_id)
            }
            TreelightEvent::ReadingSent {
                session_id,
                stage,
                emotion,
            } => format!("Session {} sent {:?} ({})", session_id, stage, emotion),
            TreelightEvent::SessionClosed { session_id, reason } => {
                format!("Session {} closed: {}", session_id, reason)
            }
            TreelightEvent::LightsChanged { emotion, animating } => format!(
                "Lights showing {}{}",
                emotion,
                if *animating { " (animated)" } else { "" }
            ),
            TreelightEvent::LightsReset { .. } => "Lights reset".to_string(),
            TreelightEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            TreelightEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            TreelightEvent::PersonApproached { .. } => "person_approached",
            TreelightEvent::PersonLeft { .. } => "person_left",
            TreelightEvent::SessionStarted { .. } => "session_started",
            TreelightEvent::ReadingSent { .. } => "reading_sent",
            TreelightEvent::SessionClosed { .. } => "session_closed",
            TreelightEvent::LightsChanged { .. } => "lights_changed",
            TreelightEvent::LightsReset { .. } => "lights_reset",
            TreelightEvent::SystemError { .. } => "system_error",
            TreelightEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TreelightEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TreelightEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: TreelightEvent) -> Result<usize, EventBusError> {
        match &event {
            TreelightEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            TreelightEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => debug!("Publishing event: {}", event.description()),
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Publish without caring whether anyone listens
    pub fn emit(&self, event: TreelightEvent) {
        let _ = self.publish(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<&'static str>),
}

impl EventFilter {
    pub fn matches(&self, event: &TreelightEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<TreelightEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<TreelightEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next event passing the filter
    pub async fn recv(&mut self) -> Result<TreelightEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
