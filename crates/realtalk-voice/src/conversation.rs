//! Conversation items and the ordered store that holds them.
//!
//! Items arrive from the remote endpoint as full records (transcript and audio
//! accumulated so far). The store replaces by id, appends unknown ids, and hands
//! observers immutable snapshots.

use crate::wav::WavFile;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    InProgress,
    Completed,
}

/// Content accumulated for an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormattedContent {
    /// Speech transcript; may grow or be overwritten while the item streams.
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Raw little-endian PCM16 accumulated so far. Frozen once the item completes.
    #[serde(default, skip_serializing)]
    pub audio: Vec<u8>,
}

/// Derived WAV artifact for a completed item.
///
/// `Pending` is the only state that triggers a decode; both other states are terminal,
/// so decoding runs at most once per item.
#[derive(Debug, Clone, Default)]
pub enum DecodeState {
    #[default]
    Pending,
    Done(Arc<WavFile>),
    Failed(String),
}

impl DecodeState {
    pub fn file(&self) -> Option<&Arc<WavFile>> {
        match self {
            DecodeState::Done(file) => Some(file),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, DecodeState::Pending)
    }
}

/// One turn of the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default)]
    pub formatted: FormattedContent,
    /// Owned by the store; never supplied by the remote endpoint.
    #[serde(skip)]
    pub file: DecodeState,
}

impl ConversationItem {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            status: ItemStatus::InProgress,
            formatted: FormattedContent::default(),
            file: DecodeState::Pending,
        }
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.formatted.transcript = Some(transcript.into());
        self
    }

    pub fn with_audio(mut self, audio: Vec<u8>) -> Self {
        self.formatted.audio = audio;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == ItemStatus::Completed
    }

    /// Completed, has audio, and no decode has been attempted yet.
    pub fn needs_decode(&self) -> bool {
        self.is_completed() && !self.formatted.audio.is_empty() && self.file.is_pending()
    }
}

/// What changed in the update that produced an item record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemDelta {
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// New little-endian PCM16 bytes, to be played in order.
    #[serde(default)]
    pub audio: Option<Vec<u8>>,
}

impl ItemDelta {
    pub fn audio(bytes: Vec<u8>) -> Self {
        Self {
            audio: Some(bytes),
            ..Default::default()
        }
    }
}

/// Immutable, cheaply cloneable view of the ordered items.
#[derive(Debug, Clone)]
pub struct ConversationSnapshot(Arc<Vec<ConversationItem>>);

impl ConversationSnapshot {
    pub fn get(&self, id: &str) -> Option<&ConversationItem> {
        self.0.iter().find(|item| item.id == id)
    }
}

impl Default for ConversationSnapshot {
    fn default() -> Self {
        Self(Arc::new(Vec::new()))
    }
}

impl Deref for ConversationSnapshot {
    type Target = [ConversationItem];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Ordered items keyed by id. Insertion order is arrival order.
#[derive(Debug, Default)]
pub struct ConversationStore {
    items: Vec<ConversationItem>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record with the same id, or append it.
    ///
    /// The replace is whole-record, except the decode state is carried over and the
    /// audio of an already completed item is kept as it was.
    pub fn replace_or_append(&mut self, mut item: ConversationItem) -> &ConversationItem {
        match self.items.iter().position(|existing| existing.id == item.id) {
            Some(idx) => {
                let existing = &mut self.items[idx];
                if existing.is_completed() && existing.formatted.audio != item.formatted.audio {
                    warn!(
                        item_id = %item.id,
                        "ignoring audio change on completed item"
                    );
                    item.formatted.audio = std::mem::take(&mut existing.formatted.audio);
                }
                if item.file.is_pending() {
                    item.file = std::mem::take(&mut existing.file);
                }
                *existing = item;
                &self.items[idx]
            }
            None => {
                self.items.push(item);
                &self.items[self.items.len() - 1]
            }
        }
    }

    /// Record the decode outcome. Only a pending item accepts one.
    pub fn set_decoded(&mut self, id: &str, state: DecodeState) -> bool {
        match self.items.iter_mut().find(|item| item.id == id) {
            Some(item) if item.file.is_pending() => {
                item.file = state;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&ConversationItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot(Arc::new(self.items.clone()))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
