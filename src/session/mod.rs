mod controller;
mod forwarder;
mod types;

pub use controller::{SessionController, SessionStats, SessionStatsSnapshot};
pub use forwarder::ControlForwarder;
pub use types::{Session, SessionControl, SessionState};
