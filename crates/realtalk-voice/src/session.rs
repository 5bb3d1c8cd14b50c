//! Per-connection session state.

use crate::config::{SessionConfig, TurnDetectionMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Connection state exposed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// One connection lifecycle. Created by `connect()`, dropped by `disconnect()`; never reused.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub state: ConnectionState,
    /// Read once from config; fixed for the session's lifetime.
    pub turn_detection: TurnDetectionMode,
    pub transcription_model: Option<String>,
    pub instructions: String,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: ConnectionState::Connecting,
            turn_detection: config.turn_detection,
            transcription_model: config.transcription_model().map(str::to_string),
            instructions: config.instructions.clone(),
            started_at: Utc::now(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Time since `connect()` created the session.
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}
