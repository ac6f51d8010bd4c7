use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Connection state of the live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Status text shown by the host display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UiStatus {
    #[serde(rename = "Idle")]
    Idle,
    #[serde(rename = "Connecting...")]
    Connecting,
    #[serde(rename = "Listening...")]
    Listening,
    #[serde(rename = "Disconnected")]
    Disconnected,
    /// Microphone refused or the session never opened
    #[serde(rename = "Connection failed")]
    Failed,
}

impl UiStatus {
    pub fn label(&self) -> &'static str {
        match self {
            UiStatus::Idle => "Idle",
            UiStatus::Connecting => "Connecting...",
            UiStatus::Listening => "Listening...",
            UiStatus::Disconnected => "Disconnected",
            UiStatus::Failed => "Connection failed",
        }
    }
}

impl fmt::Display for UiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the host display renders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Status text
    pub status: UiStatus,

    /// Connection state behind the status
    pub state: ConnectionState,

    /// Whether a session is open and listening
    pub active: bool,

    /// Whether a connection attempt is in flight (toggle disabled)
    pub connecting: bool,

    /// Id of the current or most recent session
    pub session_id: Option<String>,

    /// When this snapshot was produced
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn new(status: UiStatus, state: ConnectionState, session_id: Option<String>) -> Self {
        Self {
            status,
            state,
            active: state == ConnectionState::Open,
            connecting: state == ConnectionState::Connecting,
            session_id,
            updated_at: Utc::now(),
        }
    }

    pub fn idle() -> Self {
        Self::new(UiStatus::Idle, ConnectionState::Idle, None)
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}
