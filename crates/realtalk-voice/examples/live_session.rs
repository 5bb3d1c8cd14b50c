//! Live session demo: real microphone and speaker against a loopback endpoint.
//!
//! The loopback channel answers every push-to-talk turn by streaming the
//! recorded audio back as an assistant item, which exercises capture, the
//! per-item playback queue, decode-on-completion and barge-in without a network.
//!
//! Press Enter to start talking, Enter again to stop, `q` + Enter to quit.
//!
//! ```text
//! cargo run -p realtalk-voice --example live_session --features devices
//! ```

use async_trait::async_trait;
use realtalk_voice::audio::pcm16_to_le_bytes;
use realtalk_voice::{
    init_tracing, AudioConfig, ChannelEvents, ContentPart, ConversationItem, CpalCapture,
    ItemDelta, ItemStatus, RealtimeChannel, RodioPlayback, Role, SessionConfig,
    SessionCoordinator, SessionUpdate, TurnDetectionMode, VoiceError, VoiceResult,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tracing::info;

/// Echoes each user turn back as assistant audio, streamed in 200ms chunks.
#[derive(Default)]
struct LoopbackChannel {
    events: Option<ChannelEvents>,
    captured: Vec<i16>,
    chunk_samples: usize,
    responses: usize,
}

impl LoopbackChannel {
    fn events(&self) -> VoiceResult<&ChannelEvents> {
        self.events
            .as_ref()
            .ok_or_else(|| VoiceError::Transport("loopback not connected".to_string()))
    }
}

#[async_trait]
impl RealtimeChannel for LoopbackChannel {
    async fn connect(&mut self, events: ChannelEvents) -> VoiceResult<Vec<ConversationItem>> {
        self.events = Some(events);
        Ok(Vec::new())
    }

    async fn disconnect(&mut self) -> VoiceResult<()> {
        self.events = None;
        self.captured.clear();
        Ok(())
    }

    async fn update_session(&mut self, update: &SessionUpdate) -> VoiceResult<()> {
        info!(session = %update.to_json(), "Loopback session configured");
        Ok(())
    }

    async fn send_user_message_content(&mut self, content: Vec<ContentPart>) -> VoiceResult<()> {
        self.responses += 1;
        let ContentPart::InputText { text } = content.into_iter().next().unwrap_or_else(|| ContentPart::text(""));
        let item = ConversationItem::new(format!("user-{}", self.responses), Role::User)
            .with_status(ItemStatus::Completed)
            .with_transcript(text);
        self.events()?.updated(item, None)
    }

    async fn append_input_audio(&mut self, samples: &[i16]) -> VoiceResult<()> {
        self.captured.extend_from_slice(samples);
        Ok(())
    }

    async fn create_response(&mut self) -> VoiceResult<()> {
        self.responses += 1;
        let id = format!("echo-{}", self.responses);
        let samples = std::mem::take(&mut self.captured);
        let events = self.events()?;

        let mut sent = Vec::new();
        for chunk in samples.chunks(self.chunk_samples.max(1)) {
            let bytes = pcm16_to_le_bytes(chunk);
            sent.extend_from_slice(&bytes);
            let item = ConversationItem::new(id.clone(), Role::Assistant).with_audio(sent.clone());
            events.updated(item, Some(ItemDelta::audio(bytes)))?;
        }

        let done = ConversationItem::new(id, Role::Assistant)
            .with_status(ItemStatus::Completed)
            .with_transcript(format!("(echo of {} samples)", samples.len()))
            .with_audio(sent);
        events.updated(done, None)
    }

    async fn cancel_response(&mut self, track_id: &str, sample_offset: u64) -> VoiceResult<()> {
        info!(track_id, sample_offset, "Loopback response cancelled");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = SessionConfig {
        turn_detection: TurnDetectionMode::Manual,
        ..SessionConfig::load()?
    };
    let audio = AudioConfig::from(&config);

    info!("🎙️ Realtalk live session (loopback endpoint)");
    for device in CpalCapture::list_input_devices()? {
        info!("  input: {}", device);
    }

    let channel = LoopbackChannel {
        chunk_samples: audio.sample_rate as usize / 5,
        ..Default::default()
    };
    let coordinator = SessionCoordinator::new(
        config,
        Box::new(CpalCapture::new(audio)),
        Box::new(RodioPlayback::new(audio)),
        Box::new(channel),
    )?;
    let handle = coordinator.handle();
    let worker = tokio::spawn(coordinator.run());

    let mut items = handle.watch_items();
    tokio::spawn(async move {
        while let Some(snapshot) = items.next().await {
            if let Some(last) = snapshot.last() {
                info!(
                    id = %last.id,
                    role = ?last.role,
                    status = ?last.status,
                    transcript = last.formatted.transcript.as_deref().unwrap_or(""),
                    "💬 Conversation updated ({} items)",
                    snapshot.len()
                );
            }
        }
    });

    handle.connect().await?;
    info!("Press Enter to talk, Enter again to stop, q to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut talking = false;
    while let Some(line) = lines.next_line().await? {
        if line.trim() == "q" {
            break;
        }
        if talking {
            handle.stop_user_turn().await?;
            info!("⏹️ Stopped talking");
        } else {
            handle.start_user_turn().await?;
            info!("🎤 Talking...");
        }
        talking = !talking;
    }

    handle.disconnect().await;
    handle.shutdown()?;
    worker.await?;
    Ok(())
}
