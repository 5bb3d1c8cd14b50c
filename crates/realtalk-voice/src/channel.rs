//! Remote realtime channel interface.
//!
//! The transport (socket, auth, wire encoding) is provided by the caller as a
//! `RealtimeChannel`. Inbound events are pushed through `ChannelEvents` into the
//! coordinator's queue, where they are handled one at a time in arrival order.

use crate::config::TurnDetectionMode;
use crate::conversation::{ConversationItem, ItemDelta};
use crate::coordinator::SessionEvent;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

/// Events delivered by the remote channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Post-connect fault on the channel. Surfaced, never fatal on its own.
    Error(String),
    /// The user started speaking over assistant audio.
    Interrupted,
    /// An item was created, grew, or was finalized. `item` is the full record.
    Updated {
        item: ConversationItem,
        delta: Option<ItemDelta>,
    },
}

/// Sender half handed to the channel on connect.
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelEvents {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: ChannelEvent) -> VoiceResult<()> {
        self.tx
            .send(SessionEvent::Channel(event))
            .map_err(|e| VoiceError::ChannelSend(format!("session queue closed: {}", e)))
    }

    pub fn updated(&self, item: ConversationItem, delta: Option<ItemDelta>) -> VoiceResult<()> {
        self.emit(ChannelEvent::Updated { item, delta })
    }

    pub fn interrupted(&self) -> VoiceResult<()> {
        self.emit(ChannelEvent::Interrupted)
    }

    pub fn error(&self, message: impl Into<String>) -> VoiceResult<()> {
        self.emit(ChannelEvent::Error(message.into()))
    }
}

/// Session options recognized by the remote endpoint. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub instructions: Option<String>,
    pub turn_detection: Option<TurnDetectionMode>,
    pub input_audio_transcription_model: Option<String>,
}

impl SessionUpdate {
    /// Realtime wire shape. Manual turn detection is sent as `null`.
    pub fn to_json(&self) -> Value {
        let mut session = Map::new();
        if let Some(instructions) = &self.instructions {
            session.insert("instructions".to_string(), json!(instructions));
        }
        if let Some(mode) = self.turn_detection {
            let turn_detection = match mode {
                TurnDetectionMode::ServerVad => json!({ "type": "server_vad" }),
                TurnDetectionMode::Manual => Value::Null,
            };
            session.insert("turn_detection".to_string(), turn_detection);
        }
        if let Some(model) = &self.input_audio_transcription_model {
            session.insert(
                "input_audio_transcription".to_string(),
                json!({ "model": model }),
            );
        }
        Value::Object(session)
    }
}

/// Part of a user message sent to the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::InputText { text: text.into() }
    }
}

/// Connection to the remote conversational endpoint.
#[async_trait]
pub trait RealtimeChannel: Send {
    /// Open the channel and subscribe `events` to it. Returns any history the
    /// endpoint already holds. Fails with `VoiceError::Connection`.
    async fn connect(&mut self, events: ChannelEvents) -> VoiceResult<Vec<ConversationItem>>;

    async fn disconnect(&mut self) -> VoiceResult<()>;

    async fn update_session(&mut self, update: &SessionUpdate) -> VoiceResult<()>;

    async fn send_user_message_content(&mut self, content: Vec<ContentPart>) -> VoiceResult<()>;

    /// Stream one mono PCM16 capture frame.
    async fn append_input_audio(&mut self, samples: &[i16]) -> VoiceResult<()>;

    /// Commit buffered input audio and ask for a response (push-to-talk).
    async fn create_response(&mut self) -> VoiceResult<()>;

    /// Cancel the in-flight response and truncate item `track_id` to the
    /// `sample_offset` samples the user actually heard.
    async fn cancel_response(&mut self, track_id: &str, sample_offset: u64) -> VoiceResult<()>;
}
