//! # Realtalk Voice - Duplex Voice Session Coordination
//!
//! This crate connects a local microphone and speaker to a remote realtime
//! conversational endpoint that streams speech, transcripts and turn-taking
//! signals, and keeps the conversation state consistent while it does.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Session Coordinator                        │
//! │  ┌──────────────┐   frames   ┌──────────────┐   ┌──────────────┐ │
//! │  │  Audio In    │──────────→ │  Turn Policy │──→│   Remote     │ │
//! │  │   (cpal)     │            │ (vad/manual) │   │   Channel    │ │
//! │  └──────────────┘            └──────────────┘   └──────────────┘ │
//! │                                                   │ updated      │
//! │  ┌──────────────┐  pcm16 per item                 │ interrupted  │
//! │  │  Audio Out   │←─────────────────────────────── ┤ error        │
//! │  │  (rodio)     │  interrupt → (track, offset)    ↓              │
//! │  └──────────────┘ ─────────→ cancel_response  ┌──────────────┐   │
//! │                                               │ Conversation │   │
//! │                                               │    Store     │   │
//! │                                               └──────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All inputs are serialized into one queue and handled one at a time. The
//! transport to the remote endpoint is supplied by the caller as a
//! [`RealtimeChannel`]; the `devices` feature adds cpal/rodio adapters.

pub mod audio;
pub mod channel;
pub mod config;
pub mod conversation;
pub mod coordinator;
#[cfg(feature = "devices")]
pub mod devices;
pub mod error;
pub mod logging;
pub mod session;
pub mod turn;
pub mod wav;

pub use audio::{
    AudioCaptureSource, AudioConfig, AudioFrame, AudioPlaybackSink, CaptureGate, FrameCallback,
    FrameChunker, MemoryPlayback, TrackOffset, TrackQueue,
};
pub use channel::{ChannelEvent, ChannelEvents, ContentPart, RealtimeChannel, SessionUpdate};
pub use config::{SessionConfig, TurnDetectionMode};
pub use conversation::{
    ConversationItem, ConversationSnapshot, ConversationStore, DecodeState, FormattedContent,
    ItemDelta, ItemStatus, Role,
};
pub use coordinator::{SessionCommand, SessionCoordinator, SessionEvent, SessionHandle, SessionNotice};
#[cfg(feature = "devices")]
pub use devices::{CpalCapture, RodioPlayback};
pub use error::{VoiceError, VoiceResult};
pub use logging::init_tracing;
pub use session::{ConnectionState, Session};
pub use turn::{TalkWindowSummary, TurnDetectionPolicy};
pub use wav::{AudioDecoder, WavDecoder, WavFile};
