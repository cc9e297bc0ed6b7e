use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreelightError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("GPIO error: {0}")]
    Gpio(#[from] GpioError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Distance sensor failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("Sensor timeout after {timeout:?}: {phase}")]
    Timeout { phase: EchoPhase, timeout: Duration },

    #[error("Sensor pin failure: {0}")]
    Pin(#[from] GpioError),

    #[error("Sensor worker failed: {details}")]
    Worker { details: String },
}

/// Which half of the echo handshake ran out of time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoPhase {
    NoEchoStart,
    EchoHeldHigh,
}

impl std::fmt::Display for EchoPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EchoPhase::NoEchoStart => write!(f, "no echo start"),
            EchoPhase::EchoHeldHigh => write!(f, "echo held high"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpioError {
    #[error("No GPIO controller present")]
    Unavailable,

    #[error("Pin {pin} could not be opened: {details}")]
    Open { pin: u8, details: String },

    #[error("Pin {pin} is not open")]
    NotOpen { pin: u8 },

    #[error("Pin {pin} is configured as {mode}, cannot {operation}")]
    WrongMode {
        pin: u8,
        mode: &'static str,
        operation: &'static str,
    },

    #[error("Pin {pin} I/O failed: {details}")]
    Io { pin: u8, details: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Receive failed: {details}")]
    Receive { details: String },

    #[error("Send to {destination} failed: {details}")]
    Send { destination: String, details: String },

    #[error("Complete failed for message {message_id}: {details}")]
    Complete { message_id: u64, details: String },

    #[error("Unknown destination: {0}")]
    UnknownDestination(String),

    #[error("Transport closed")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Malformed payload: {details}")]
    Malformed { details: String },

    #[error("Unknown stage value: {0}")]
    UnknownStage(u8),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

impl TreelightError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether the owning loop should keep going after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            TreelightError::Sensor(_)
            | TreelightError::Transport(_)
            | TreelightError::Decode(_)
            | TreelightError::EventBus(_) => true,
            TreelightError::Gpio(e) => !matches!(e, GpioError::Unavailable),
            TreelightError::Component { .. } => true,
            TreelightError::Config(_)
            | TreelightError::Io(_)
            | TreelightError::Serialization(_)
            | TreelightError::Json(_)
            | TreelightError::System { .. } => false,
        }
    }
}

impl SensorError {
    pub fn timeout(phase: EchoPhase, timeout: Duration) -> Self {
        SensorError::Timeout { phase, timeout }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SensorError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, TreelightError>;
