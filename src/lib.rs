pub mod app;
pub mod backoff;
pub mod channel;
pub mod config;
pub mod emotion;
pub mod error;
pub mod events;
pub mod gpio;
pub mod keyboard_input;
pub mod light;
pub mod presence;
pub mod sensor;
pub mod session;

pub use app::{ComponentState, ShutdownReason, TreelightOrchestrator};
pub use channel::{
    ChannelSender, Message, MessageHandler, MessageHub, MessageTransport, ResilientChannel,
};
pub use config::TreelightConfig;
pub use emotion::{EmotionInference, EmotionReading, InferenceResult, Stage};
pub use error::{Result, TreelightError};
pub use events::{EventBus, EventFilter, EventReceiver, TreelightEvent};
pub use light::{LightController, LightDriver, LightService, Rgb};
pub use presence::{PresenceDetector, PresenceEvent, PresenceState, PresenceTracker};
pub use sensor::{DistanceSample, DistanceSensor, DistanceSource};
pub use session::{SessionController, SessionState};
