//! Turn detection policy: who decides when the user's turn ends.
//!
//! In `server_vad` mode every capture frame is streamed and the remote endpoint
//! detects end of speech. In `manual` mode frames are only forwarded inside an
//! explicit push-to-talk window. No local silence detection happens here.

use crate::config::TurnDetectionMode;
use crate::error::{VoiceError, VoiceResult};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Push-to-talk window state
#[derive(Debug, Clone, PartialEq)]
enum TalkWindow {
    Closed,
    Open { since: Instant, frames: usize },
}

/// Summary of a closed push-to-talk window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TalkWindowSummary {
    pub duration: Duration,
    pub frames: usize,
}

/// Configuration switch consumed by the session coordinator.
#[derive(Debug, Clone)]
pub struct TurnDetectionPolicy {
    mode: TurnDetectionMode,
    window: TalkWindow,
}

impl TurnDetectionPolicy {
    pub fn new(mode: TurnDetectionMode) -> Self {
        Self {
            mode,
            window: TalkWindow::Closed,
        }
    }

    pub fn mode(&self) -> TurnDetectionMode {
        self.mode
    }

    /// Whether capture should start streaming as soon as the session connects.
    pub fn records_on_connect(&self) -> bool {
        self.mode == TurnDetectionMode::ServerVad
    }

    /// Whether a capture frame arriving now goes to the remote channel.
    pub fn should_forward(&self) -> bool {
        match self.mode {
            TurnDetectionMode::ServerVad => true,
            TurnDetectionMode::Manual => self.is_window_open(),
        }
    }

    /// Count a frame forwarded inside the current window.
    pub fn note_forwarded(&mut self) {
        if let TalkWindow::Open { frames, .. } = &mut self.window {
            *frames += 1;
        }
    }

    /// Begin a push-to-talk window. Only valid in manual mode.
    pub fn open_window(&mut self) -> VoiceResult<()> {
        if self.mode != TurnDetectionMode::Manual {
            return Err(VoiceError::InvalidState(format!(
                "push-to-talk requires manual turn detection, session uses {}",
                self.mode
            )));
        }
        if self.is_window_open() {
            return Err(VoiceError::InvalidState("user turn already open".to_string()));
        }
        info!("🎤 Push-to-talk window opened");
        self.window = TalkWindow::Open {
            since: Instant::now(),
            frames: 0,
        };
        Ok(())
    }

    /// End the current push-to-talk window.
    pub fn close_window(&mut self) -> VoiceResult<TalkWindowSummary> {
        match std::mem::replace(&mut self.window, TalkWindow::Closed) {
            TalkWindow::Open { since, frames } => {
                let summary = TalkWindowSummary {
                    duration: since.elapsed(),
                    frames,
                };
                debug!(
                    frames = summary.frames,
                    duration_ms = summary.duration.as_millis() as u64,
                    "Push-to-talk window closed"
                );
                Ok(summary)
            }
            TalkWindow::Closed => Err(VoiceError::InvalidState("no user turn is open".to_string())),
        }
    }

    pub fn is_window_open(&self) -> bool {
        matches!(self.window, TalkWindow::Open { .. })
    }

    /// Drop any open window.
    pub fn reset(&mut self) {
        self.window = TalkWindow::Closed;
    }

    /// Get the current state (for testing/debugging)
    pub fn state(&self) -> &str {
        match (self.mode, &self.window) {
            (TurnDetectionMode::ServerVad, _) => "streaming",
            (TurnDetectionMode::Manual, TalkWindow::Closed) => "idle",
            (TurnDetectionMode::Manual, TalkWindow::Open { .. }) => "talking",
        }
    }
}
