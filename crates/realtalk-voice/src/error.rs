//! Error types for the realtalk voice session

use thiserror::Error;

/// Result type alias for voice session operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while running a duplex voice session
#[derive(Error, Debug)]
pub enum VoiceError {
    /// Microphone could not be opened (missing device, permission denied).
    #[error("Audio capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    /// Remote channel could not be opened (network, auth, handshake, timeout).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Fault on an already open remote channel. Never fatal on its own.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Audio decode failed: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Channel receive error: {0}")]
    ChannelReceive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

#[cfg(feature = "devices")]
impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::CaptureUnavailable(err.to_string())
    }
}

#[cfg(feature = "devices")]
impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::CaptureUnavailable(err.to_string())
    }
}

#[cfg(feature = "devices")]
impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::CaptureUnavailable(err.to_string())
    }
}

#[cfg(feature = "devices")]
impl From<rodio::StreamError> for VoiceError {
    fn from(err: rodio::StreamError) -> Self {
        VoiceError::Playback(err.to_string())
    }
}

#[cfg(feature = "devices")]
impl From<rodio::PlayError> for VoiceError {
    fn from(err: rodio::PlayError) -> Self {
        VoiceError::Playback(err.to_string())
    }
}
