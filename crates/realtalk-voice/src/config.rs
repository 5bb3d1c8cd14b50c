//! Session configuration loaded from defaults, an optional TOML file and the environment.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | REALTALK_CONFIG | config/realtalk | Path (without extension) of the TOML file. |
//! | REALTALK__INSTRUCTIONS | "You are a helpful AI assistant." | System instructions for the remote model. |
//! | REALTALK__TURN_DETECTION | server_vad | `server_vad` or `manual` (push-to-talk). |
//! | REALTALK__INPUT_AUDIO_TRANSCRIPTION_MODEL | whisper-1 | Empty disables user transcripts. |
//! | REALTALK__GREETING | Hello! | First user message; empty sends nothing. |
//! | REALTALK__SAMPLE_RATE | 24000 | Capture and playback rate in Hz. |
//! | REALTALK__FRAME_SAMPLES | 2400 | Samples per forwarded capture frame. |
//! | REALTALK__CONNECT_TIMEOUT_MS | 15000 | Upper bound for the whole connect sequence. |

use crate::channel::SessionUpdate;
use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const DEFAULT_INSTRUCTIONS: &str = "You are a helpful AI assistant.";

/// Highest capture/playback rate accepted, in Hz.
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Who decides that the user has finished speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDetectionMode {
    /// The remote endpoint runs voice activity detection on the streamed microphone audio.
    #[default]
    ServerVad,
    /// Push-to-talk: audio is only forwarded inside an explicit start/stop window.
    Manual,
}

impl fmt::Display for TurnDetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnDetectionMode::ServerVad => write!(f, "server_vad"),
            TurnDetectionMode::Manual => write!(f, "manual"),
        }
    }
}

/// Configuration for one voice session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub instructions: String,
    pub turn_detection: TurnDetectionMode,
    /// Model used by the remote endpoint to transcribe user audio.
    #[serde(default)]
    pub input_audio_transcription_model: Option<String>,
    /// Text sent as the opening user item right after connecting.
    #[serde(default)]
    pub greeting: Option<String>,
    pub sample_rate: u32,
    pub frame_samples: usize,
    pub connect_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            turn_detection: TurnDetectionMode::ServerVad,
            input_audio_transcription_model: Some("whisper-1".to_string()),
            greeting: Some("Hello!".to_string()),
            sample_rate: 24000,
            frame_samples: 2400,
            connect_timeout_ms: 15_000,
        }
    }
}

impl SessionConfig {
    /// Load config from `.env`, file and environment.
    /// Precedence: env `REALTALK__*` > file at `REALTALK_CONFIG` (or `config/realtalk`) > defaults.
    pub fn load() -> VoiceResult<Self> {
        let _ = dotenvy::dotenv();
        let config_path =
            std::env::var("REALTALK_CONFIG").unwrap_or_else(|_| "config/realtalk".to_string());

        let built = Self::defaults()?
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(
                config::Environment::with_prefix("REALTALK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Build from an inline TOML document layered over the defaults.
    pub fn from_toml_str(toml: &str) -> VoiceResult<Self> {
        let built = Self::defaults()?
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;

        let config: Self = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        let defaults = Self::default();
        config::Config::builder()
            .set_default("instructions", defaults.instructions)?
            .set_default("turn_detection", defaults.turn_detection.to_string())?
            .set_default("input_audio_transcription_model", "whisper-1")?
            .set_default("greeting", "Hello!")?
            .set_default("sample_rate", defaults.sample_rate as i64)?
            .set_default("frame_samples", defaults.frame_samples as i64)?
            .set_default("connect_timeout_ms", defaults.connect_timeout_ms as i64)
    }

    pub fn validate(&self) -> VoiceResult<()> {
        if self.sample_rate == 0 {
            return Err(VoiceError::Config("sample_rate must be non-zero".to_string()));
        }
        if self.sample_rate > MAX_SAMPLE_RATE {
            return Err(VoiceError::Config(format!(
                "sample_rate {} exceeds {} Hz",
                self.sample_rate, MAX_SAMPLE_RATE
            )));
        }
        if self.frame_samples == 0 {
            return Err(VoiceError::Config("frame_samples must be non-zero".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(VoiceError::Config("connect_timeout_ms must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Greeting text, treating an empty string as "no greeting".
    pub fn greeting(&self) -> Option<&str> {
        self.greeting.as_deref().map(str::trim).filter(|g| !g.is_empty())
    }

    pub fn transcription_model(&self) -> Option<&str> {
        self.input_audio_transcription_model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }

    /// Session options pushed to the remote channel once it is open.
    pub fn session_update(&self) -> SessionUpdate {
        SessionUpdate {
            instructions: Some(self.instructions.clone()),
            turn_detection: Some(self.turn_detection),
            input_audio_transcription_model: self.transcription_model().map(str::to_string),
        }
    }
}
