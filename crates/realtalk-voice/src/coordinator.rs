//! Session Coordinator - owns the duplex session lifecycle
//!
//! Every input (caller commands, remote channel events, capture frames) is
//! serialized into one queue and handled to completion, one at a time. The
//! coordinator alone mutates the `Session` and the `ConversationStore`;
//! observers get watch channels holding immutable snapshots.

use crate::audio::{AudioCaptureSource, AudioFrame, AudioPlaybackSink, FrameCallback, TrackOffset};
use crate::channel::{ChannelEvent, ChannelEvents, ContentPart, RealtimeChannel};
use crate::config::SessionConfig;
use crate::conversation::{
    ConversationItem, ConversationSnapshot, ConversationStore, DecodeState, ItemDelta,
};
use crate::error::{VoiceError, VoiceResult};
use crate::session::{ConnectionState, Session};
use crate::turn::TurnDetectionPolicy;
use crate::wav::{AudioDecoder, WavDecoder};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

const NOTICE_CAPACITY: usize = 64;

/// Requests from the observer layer.
#[derive(Debug)]
pub enum SessionCommand {
    Connect {
        reply: oneshot::Sender<VoiceResult<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    StartUserTurn {
        reply: oneshot::Sender<VoiceResult<()>>,
    },
    StopUserTurn {
        reply: oneshot::Sender<VoiceResult<()>>,
    },
    /// Disconnect and stop the event loop.
    Shutdown,
}

/// Everything the coordinator reacts to, in one queue.
#[derive(Debug)]
pub enum SessionEvent {
    Command(SessionCommand),
    Channel(ChannelEvent),
    Frame(AudioFrame),
}

/// Non-fatal faults surfaced to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    Transport(String),
    Capture(String),
    Playback(String),
    Decode { item_id: String, reason: String },
}

/// Which resources `connect()` has started to acquire. Each set flag gets its
/// paired release call, whether or not acquisition finished.
#[derive(Debug, Clone, Copy, Default)]
struct Acquired {
    capture: bool,
    playback: bool,
    channel: bool,
}

/// The session coordinator
///
/// This coordinates:
/// - Audio capture (frames forwarded per turn detection policy)
/// - Remote channel (session setup, inbound events, cancellation)
/// - Audio playback (per-item tracks, interruption)
/// - Conversation store (ordered items, decode-once artifacts)
pub struct SessionCoordinator {
    config: SessionConfig,

    // Collaborators
    capture: Box<dyn AudioCaptureSource>,
    playback: Box<dyn AudioPlaybackSink>,
    channel: Box<dyn RealtimeChannel>,
    decoder: Box<dyn AudioDecoder>,

    // Owned state
    session: Option<Session>,
    policy: TurnDetectionPolicy,
    store: ConversationStore,
    acquired: Acquired,

    // Event queue
    queue_tx: mpsc::UnboundedSender<SessionEvent>,
    queue_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,

    // Observer channels
    state_tx: watch::Sender<ConnectionState>,
    items_tx: watch::Sender<ConversationSnapshot>,
    notices_tx: broadcast::Sender<SessionNotice>,
}

impl SessionCoordinator {
    /// Create a coordinator for the given collaborators
    pub fn new(
        config: SessionConfig,
        capture: Box<dyn AudioCaptureSource>,
        playback: Box<dyn AudioPlaybackSink>,
        channel: Box<dyn RealtimeChannel>,
    ) -> VoiceResult<Self> {
        config.validate()?;

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (items_tx, _) = watch::channel(ConversationSnapshot::default());
        let (notices_tx, _) = broadcast::channel(NOTICE_CAPACITY);
        let policy = TurnDetectionPolicy::new(config.turn_detection);

        Ok(Self {
            config,
            capture,
            playback,
            channel,
            decoder: Box::new(WavDecoder),
            session: None,
            policy,
            store: ConversationStore::new(),
            acquired: Acquired::default(),
            queue_tx,
            queue_rx: Some(queue_rx),
            state_tx,
            items_tx,
            notices_tx,
        })
    }

    /// Replace the decoder used for completed items.
    pub fn with_decoder(mut self, decoder: Box<dyn AudioDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Handle for the observer layer. Can be cloned freely.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            queue: self.queue_tx.clone(),
            state_rx: self.state_tx.subscribe(),
            items_rx: self.items_tx.subscribe(),
            notices_tx: self.notices_tx.clone(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_connected)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.store.snapshot()
    }

    /// Run the event loop until `Shutdown`.
    pub async fn run(mut self) {
        let Some(mut queue_rx) = self.queue_rx.take() else {
            warn!("Session event loop already started");
            return;
        };
        info!("🔄 Session event loop started");

        while let Some(event) = queue_rx.recv().await {
            let shutdown = matches!(event, SessionEvent::Command(SessionCommand::Shutdown));
            self.handle_event(event).await;
            if shutdown {
                break;
            }
        }

        info!("🛑 Session event loop ended");
    }

    /// Handle every event already queued, without waiting for more.
    /// Returns how many were handled. For driving the coordinator without `run`.
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let event = match self.queue_rx.as_mut().map(|rx| rx.try_recv()) {
                Some(Ok(event)) => event,
                _ => break,
            };
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Dispatch one event to its handler and run it to completion.
    pub async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Command(command) => self.on_command(command).await,
            SessionEvent::Channel(ChannelEvent::Interrupted) => self.on_interrupted().await,
            SessionEvent::Channel(ChannelEvent::Updated { item, delta }) => {
                self.on_conversation_updated(item, delta).await
            }
            SessionEvent::Channel(ChannelEvent::Error(message)) => self.on_transport_error(message),
            SessionEvent::Frame(frame) => self.on_capture_frame(frame).await,
        }
    }

    async fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect { reply } => {
                let result = self.connect().await;
                let _ = reply.send(result);
            }
            SessionCommand::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            SessionCommand::StartUserTurn { reply } => {
                let result = self.start_user_turn().await;
                let _ = reply.send(result);
            }
            SessionCommand::StopUserTurn { reply } => {
                let result = self.stop_user_turn().await;
                let _ = reply.send(result);
            }
            SessionCommand::Shutdown => self.disconnect().await,
        }
    }

    /// Open the session: microphone, speaker, remote channel, greeting.
    ///
    /// The whole sequence is bounded by the configured connect timeout. On any
    /// failure every resource already touched is released and one error is returned.
    pub async fn connect(&mut self) -> VoiceResult<()> {
        if let Some(session) = &self.session {
            return Err(VoiceError::InvalidState(format!(
                "session {} is already {}",
                session.id, session.state
            )));
        }

        let session = Session::new(&self.config);
        let session_id = session.id;
        info!(%session_id, mode = %session.turn_detection, "🔌 Connecting voice session");
        self.policy = TurnDetectionPolicy::new(session.turn_detection);
        self.session = Some(session);
        self.publish_state(ConnectionState::Connecting);

        let timeout = self.config.connect_timeout();
        let result = match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => Err(VoiceError::Connection(format!(
                "connect timed out after {}ms",
                timeout.as_millis()
            ))),
        };

        match result {
            Ok(history) => {
                for item in history {
                    let item_id = item.id.clone();
                    self.store.replace_or_append(item);
                    self.decode_if_completed(&item_id);
                }
                let items = self.store.len();
                if let Some(session) = self.session.as_mut() {
                    session.state = ConnectionState::Connected;
                    info!(
                        %session_id,
                        items,
                        transcription_model = session.transcription_model.as_deref().unwrap_or("none"),
                        instructions_len = session.instructions.len(),
                        setup_ms = session.elapsed().num_milliseconds(),
                        "✅ Voice session connected"
                    );
                }
                self.publish_state(ConnectionState::Connected);
                self.publish_items();
                Ok(())
            }
            Err(err) => {
                error!(%session_id, error = %err, "Voice session connect failed, releasing resources");
                self.release().await;
                self.session = None;
                self.policy.reset();
                self.publish_state(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    async fn acquire(&mut self) -> VoiceResult<Vec<ConversationItem>> {
        self.acquired.capture = true;
        self.capture.begin().await.map_err(as_capture_error)?;
        debug!("Microphone acquired");

        self.acquired.playback = true;
        self.playback.connect().await?;
        debug!("Playback connected");

        self.acquired.channel = true;
        let events = ChannelEvents::new(self.queue_tx.clone());
        let history = self.channel.connect(events).await.map_err(as_connection_error)?;
        debug!(history = history.len(), "Remote channel open");

        let update = self.config.session_update();
        self.channel
            .update_session(&update)
            .await
            .map_err(as_connection_error)?;

        if let Some(greeting) = self.config.greeting().map(ContentPart::text) {
            self.channel
                .send_user_message_content(vec![greeting])
                .await
                .map_err(as_connection_error)?;
        }

        if self.policy.records_on_connect() {
            let on_frame = self.frame_callback();
            self.capture.record(on_frame).await.map_err(as_capture_error)?;
            debug!("Streaming microphone to remote channel");
        }

        Ok(history)
    }

    /// Best-effort release of everything `acquire` touched. Never fails.
    async fn release(&mut self) {
        let acquired = std::mem::take(&mut self.acquired);

        if acquired.channel {
            if let Err(e) = self.channel.disconnect().await {
                warn!(error = %e, "Remote channel close failed");
            }
        }
        if acquired.capture {
            if let Err(e) = self.capture.end().await {
                warn!(error = %e, "Microphone release failed");
            }
        }
        if acquired.playback {
            match self.playback.interrupt().await {
                Ok(Some(stopped)) => {
                    debug!(track_id = %stopped.track_id, offset = stopped.offset, "Discarded in-flight playback")
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Playback interrupt failed"),
            }
        }
    }

    /// Tear the session down. Idempotent and infallible; clears the store every time.
    pub async fn disconnect(&mut self) {
        self.store.clear();
        self.publish_items();

        let Some(session) = self.session.take() else {
            debug!("Disconnect requested with no active session");
            return;
        };

        info!(session_id = %session.id, "🛑 Disconnecting voice session");
        self.policy.reset();
        self.publish_state(ConnectionState::Disconnected);
        self.release().await;
        info!(
            session_id = %session.id,
            started_at = %session.started_at,
            duration_s = session.elapsed().num_seconds(),
            "Voice session disconnected"
        );
    }

    /// Push-to-talk start: cut off assistant audio and open the capture window.
    pub async fn start_user_turn(&mut self) -> VoiceResult<()> {
        self.ensure_connected()?;
        self.policy.open_window()?;

        if let Err(e) = self.interrupt_and_truncate().await {
            self.surface(e);
        }

        let on_frame = self.frame_callback();
        if let Err(e) = self.capture.record(on_frame).await {
            self.policy.reset();
            return Err(as_capture_error(e));
        }
        Ok(())
    }

    /// Push-to-talk end: stop capture and ask the remote endpoint to respond.
    pub async fn stop_user_turn(&mut self) -> VoiceResult<()> {
        self.ensure_connected()?;
        let summary = self.policy.close_window()?;

        if let Err(e) = self.capture.pause().await {
            self.surface(as_capture_error(e));
        }
        info!(frames = summary.frames, "User turn ended, requesting response");
        self.channel.create_response().await
    }

    async fn on_capture_frame(&mut self, frame: AudioFrame) {
        if !self.is_connected() || !self.policy.should_forward() {
            return;
        }
        match self.channel.append_input_audio(&frame.samples).await {
            Ok(()) => self.policy.note_forwarded(),
            Err(e) => self.surface(e),
        }
    }

    async fn on_interrupted(&mut self) {
        if !self.is_connected() {
            debug!("Ignoring interruption outside a connected session");
            return;
        }
        info!("⚡ Interruption: user speaking over assistant audio");
        if let Err(e) = self.interrupt_and_truncate().await {
            self.surface(e);
        }
    }

    /// Stop local playback first; only a real stopped position is sent as a cancellation.
    async fn interrupt_and_truncate(&mut self) -> VoiceResult<Option<TrackOffset>> {
        let Some(stopped) = self.playback.interrupt().await? else {
            debug!("Nothing playing, no cancellation sent");
            return Ok(None);
        };

        info!(
            track_id = %stopped.track_id,
            offset = stopped.offset,
            "Cancelling response at heard position"
        );
        self.channel
            .cancel_response(&stopped.track_id, stopped.offset)
            .await?;
        Ok(Some(stopped))
    }

    async fn on_conversation_updated(&mut self, item: ConversationItem, delta: Option<ItemDelta>) {
        if !self.is_connected() {
            debug!(item_id = %item.id, "Dropping update outside a connected session");
            return;
        }

        let audio = delta
            .as_ref()
            .and_then(|d| d.audio.as_deref())
            .filter(|audio| !audio.is_empty());
        if let Some(audio) = audio {
            if let Err(e) = self.playback.add_pcm16(audio, &item.id).await {
                self.surface(e);
            }
        }

        let item_id = item.id.clone();
        self.store.replace_or_append(item);
        self.decode_if_completed(&item_id);
        self.publish_items();
    }

    fn decode_if_completed(&mut self, item_id: &str) {
        let Some(item) = self.store.get(item_id) else {
            return;
        };
        if !item.needs_decode() {
            return;
        }

        let state = match self.decoder.decode(&item.formatted.audio, self.config.sample_rate) {
            Ok(file) => {
                debug!(item_id, samples = file.samples, "Decoded completed item audio");
                DecodeState::Done(Arc::new(file))
            }
            Err(e) => {
                warn!(item_id, error = %e, "Decoding completed item audio failed");
                self.notify(SessionNotice::Decode {
                    item_id: item_id.to_string(),
                    reason: e.to_string(),
                });
                DecodeState::Failed(e.to_string())
            }
        };
        self.store.set_decoded(item_id, state);
    }

    fn on_transport_error(&self, message: String) {
        warn!(error = %message, "Remote channel reported an error");
        self.notify(SessionNotice::Transport(message));
    }

    fn frame_callback(&self) -> FrameCallback {
        let queue = self.queue_tx.clone();
        Arc::new(move |frame| {
            let _ = queue.send(SessionEvent::Frame(frame));
        })
    }

    fn ensure_connected(&self) -> VoiceResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(VoiceError::InvalidState("no connected session".to_string()))
        }
    }

    /// Log an isolated fault and pass it to observers.
    fn surface(&self, err: VoiceError) {
        warn!(error = %err, "Session fault");
        let notice = match err {
            VoiceError::Playback(message) => SessionNotice::Playback(message),
            VoiceError::CaptureUnavailable(message) => SessionNotice::Capture(message),
            other => SessionNotice::Transport(other.to_string()),
        };
        self.notify(notice);
    }

    fn notify(&self, notice: SessionNotice) {
        let _ = self.notices_tx.send(notice);
    }

    fn publish_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn publish_items(&self) {
        self.items_tx.send_replace(self.store.snapshot());
    }
}

fn as_capture_error(err: VoiceError) -> VoiceError {
    match err {
        VoiceError::CaptureUnavailable(_) => err,
        other => VoiceError::CaptureUnavailable(other.to_string()),
    }
}

fn as_connection_error(err: VoiceError) -> VoiceError {
    match err {
        VoiceError::Connection(_) => err,
        other => VoiceError::Connection(other.to_string()),
    }
}

/// Observer-side handle: commands in, connection state and snapshots out.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    queue: mpsc::UnboundedSender<SessionEvent>,
    state_rx: watch::Receiver<ConnectionState>,
    items_rx: watch::Receiver<ConversationSnapshot>,
    notices_tx: broadcast::Sender<SessionNotice>,
}

impl SessionHandle {
    /// Start session
    pub async fn connect(&self) -> VoiceResult<()> {
        self.request(|reply| SessionCommand::Connect { reply }).await?
    }

    /// End session. Never fails; a stopped coordinator has nothing left to tear down.
    pub async fn disconnect(&self) {
        if let Err(e) = self.request(|reply| SessionCommand::Disconnect { reply }).await {
            debug!(error = %e, "Disconnect after coordinator stopped");
        }
    }

    pub async fn start_user_turn(&self) -> VoiceResult<()> {
        self.request(|reply| SessionCommand::StartUserTurn { reply }).await?
    }

    pub async fn stop_user_turn(&self) -> VoiceResult<()> {
        self.request(|reply| SessionCommand::StopUserTurn { reply }).await?
    }

    /// Disconnect and stop the coordinator's event loop.
    pub fn shutdown(&self) -> VoiceResult<()> {
        self.send(SessionEvent::Command(SessionCommand::Shutdown))
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Latest published conversation snapshot.
    pub fn items(&self) -> ConversationSnapshot {
        self.items_rx.borrow().clone()
    }

    pub fn watch_items(&self) -> WatchStream<ConversationSnapshot> {
        WatchStream::new(self.items_rx.clone())
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices_tx.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> VoiceResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SessionEvent::Command(make(reply_tx)))?;
        reply_rx
            .await
            .map_err(|_| VoiceError::ChannelReceive("session coordinator stopped".to_string()))
    }

    fn send(&self, event: SessionEvent) -> VoiceResult<()> {
        self.queue
            .send(event)
            .map_err(|_| VoiceError::ChannelSend("session coordinator stopped".to_string()))
    }
}
