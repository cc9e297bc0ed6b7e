use crate::emotion::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    PersonDetected,
    LightsOn,
    PersonGone,
}

/// One visit, from approach to departure or reset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub last_stage: Option<Stage>,
    pub closed: bool,
}

impl Session {
    pub fn start() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            last_stage: None,
            closed: false,
        }
    }
}

/// Inputs to the session controller other than presence events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    /// The light device reports its lights are on
    LightsOn,
    /// Drop the current session and go idle
    Reset,
}
