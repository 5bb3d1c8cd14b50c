//! Integration tests for the session coordinator
//!
//! Collaborators are in-memory and append every call to a shared log, so tests
//! can assert on exact ordering across capture, playback and the remote channel.

use async_trait::async_trait;
use realtalk_voice::{
    AudioCaptureSource, AudioDecoder, AudioFrame, AudioPlaybackSink, ChannelEvents,
    ConnectionState, ContentPart, ConversationItem, DecodeState, FrameCallback, ItemDelta,
    ItemStatus, MemoryPlayback, RealtimeChannel, Role, SessionConfig, SessionCoordinator,
    SessionNotice, SessionUpdate, TrackOffset, TurnDetectionMode, VoiceError, VoiceResult,
    WavDecoder, WavFile,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_stream::StreamExt;
use tokio_test::{assert_err, assert_ok};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    CaptureBegin,
    CaptureRecord,
    CapturePause,
    CaptureEnd,
    PlaybackConnect,
    PlaybackAdd { track_id: String, bytes: Vec<u8> },
    PlaybackInterrupt,
    ChannelConnect,
    ChannelDisconnect,
    UpdateSession(SessionUpdate),
    SendMessage(Vec<ContentPart>),
    AppendAudio(usize),
    CreateResponse,
    Cancel { track_id: String, offset: u64 },
}

type CallLog = Arc<Mutex<Vec<Call>>>;

fn record(log: &CallLog, call: Call) {
    log.lock().unwrap().push(call);
}

struct MockCapture {
    log: CallLog,
    fail_begin: bool,
    fail_pause: bool,
    fail_end: bool,
    on_frame: Arc<Mutex<Option<FrameCallback>>>,
}

#[async_trait]
impl AudioCaptureSource for MockCapture {
    async fn begin(&mut self) -> VoiceResult<()> {
        record(&self.log, Call::CaptureBegin);
        if self.fail_begin {
            return Err(VoiceError::CaptureUnavailable("permission denied".to_string()));
        }
        Ok(())
    }

    async fn record(&mut self, on_frame: FrameCallback) -> VoiceResult<()> {
        record(&self.log, Call::CaptureRecord);
        *self.on_frame.lock().unwrap() = Some(on_frame);
        Ok(())
    }

    async fn pause(&mut self) -> VoiceResult<()> {
        record(&self.log, Call::CapturePause);
        *self.on_frame.lock().unwrap() = None;
        if self.fail_pause {
            return Err(VoiceError::CaptureUnavailable("device unplugged".to_string()));
        }
        Ok(())
    }

    async fn end(&mut self) -> VoiceResult<()> {
        record(&self.log, Call::CaptureEnd);
        *self.on_frame.lock().unwrap() = None;
        if self.fail_end {
            return Err(VoiceError::CaptureUnavailable("device unplugged".to_string()));
        }
        Ok(())
    }
}

struct MockPlayback {
    log: CallLog,
    inner: MemoryPlayback,
}

#[async_trait]
impl AudioPlaybackSink for MockPlayback {
    async fn connect(&mut self) -> VoiceResult<()> {
        record(&self.log, Call::PlaybackConnect);
        self.inner.connect().await
    }

    async fn add_pcm16(&mut self, pcm: &[u8], track_id: &str) -> VoiceResult<()> {
        record(
            &self.log,
            Call::PlaybackAdd {
                track_id: track_id.to_string(),
                bytes: pcm.to_vec(),
            },
        );
        self.inner.add_pcm16(pcm, track_id).await
    }

    async fn interrupt(&mut self) -> VoiceResult<Option<TrackOffset>> {
        record(&self.log, Call::PlaybackInterrupt);
        self.inner.interrupt().await
    }
}

struct MockChannel {
    log: CallLog,
    events: Arc<Mutex<Option<ChannelEvents>>>,
    history: Vec<ConversationItem>,
    fail_connect: bool,
    fail_disconnect: bool,
    connect_delay: Option<Duration>,
}

#[async_trait]
impl RealtimeChannel for MockChannel {
    async fn connect(&mut self, events: ChannelEvents) -> VoiceResult<Vec<ConversationItem>> {
        record(&self.log, Call::ChannelConnect);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect {
            return Err(VoiceError::Connection("401 unauthorized".to_string()));
        }
        *self.events.lock().unwrap() = Some(events);
        Ok(self.history.clone())
    }

    async fn disconnect(&mut self) -> VoiceResult<()> {
        record(&self.log, Call::ChannelDisconnect);
        *self.events.lock().unwrap() = None;
        if self.fail_disconnect {
            return Err(VoiceError::Transport("socket already closed".to_string()));
        }
        Ok(())
    }

    async fn update_session(&mut self, update: &SessionUpdate) -> VoiceResult<()> {
        record(&self.log, Call::UpdateSession(update.clone()));
        Ok(())
    }

    async fn send_user_message_content(&mut self, content: Vec<ContentPart>) -> VoiceResult<()> {
        record(&self.log, Call::SendMessage(content));
        Ok(())
    }

    async fn append_input_audio(&mut self, samples: &[i16]) -> VoiceResult<()> {
        record(&self.log, Call::AppendAudio(samples.len()));
        Ok(())
    }

    async fn create_response(&mut self) -> VoiceResult<()> {
        record(&self.log, Call::CreateResponse);
        Ok(())
    }

    async fn cancel_response(&mut self, track_id: &str, sample_offset: u64) -> VoiceResult<()> {
        record(
            &self.log,
            Call::Cancel {
                track_id: track_id.to_string(),
                offset: sample_offset,
            },
        );
        Ok(())
    }
}

struct CountingDecoder {
    calls: Arc<AtomicUsize>,
}

impl AudioDecoder for CountingDecoder {
    fn decode(&self, pcm: &[u8], sample_rate: u32) -> VoiceResult<WavFile> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        WavDecoder.decode(pcm, sample_rate)
    }
}

#[derive(Default)]
struct Options {
    fail_capture: bool,
    fail_pause: bool,
    fail_end: bool,
    fail_connect: bool,
    fail_disconnect: bool,
    connect_delay: Option<Duration>,
    history: Vec<ConversationItem>,
}

struct Harness {
    coordinator: SessionCoordinator,
    log: CallLog,
    playback: MemoryPlayback,
    events: Arc<Mutex<Option<ChannelEvents>>>,
    on_frame: Arc<Mutex<Option<FrameCallback>>>,
    decodes: Arc<AtomicUsize>,
}

impl Harness {
    fn new(config: SessionConfig) -> Self {
        Self::with_options(config, Options::default())
    }

    fn with_options(config: SessionConfig, options: Options) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let playback = MemoryPlayback::new();
        let events = Arc::new(Mutex::new(None));
        let on_frame = Arc::new(Mutex::new(None));
        let decodes = Arc::new(AtomicUsize::new(0));

        let coordinator = SessionCoordinator::new(
            config,
            Box::new(MockCapture {
                log: Arc::clone(&log),
                fail_begin: options.fail_capture,
                fail_pause: options.fail_pause,
                fail_end: options.fail_end,
                on_frame: Arc::clone(&on_frame),
            }),
            Box::new(MockPlayback {
                log: Arc::clone(&log),
                inner: playback.clone(),
            }),
            Box::new(MockChannel {
                log: Arc::clone(&log),
                events: Arc::clone(&events),
                history: options.history,
                fail_connect: options.fail_connect,
                fail_disconnect: options.fail_disconnect,
                connect_delay: options.connect_delay,
            }),
        )
        .expect("valid config")
        .with_decoder(Box::new(CountingDecoder {
            calls: Arc::clone(&decodes),
        }));

        Self {
            coordinator,
            log,
            playback,
            events,
            on_frame,
            decodes,
        }
    }

    fn events(&self) -> ChannelEvents {
        self.events.lock().unwrap().clone().expect("channel connected")
    }

    fn emit_frame(&self, samples: usize) -> bool {
        let on_frame = self.on_frame.lock().unwrap().clone();
        match on_frame {
            Some(on_frame) => {
                on_frame(AudioFrame {
                    samples: vec![0; samples],
                    timestamp: Instant::now(),
                });
                true
            }
            None => false,
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().clone()
    }

    fn clear_calls(&self) {
        self.log.lock().unwrap().clear();
    }
}

fn assistant(id: &str, status: ItemStatus, audio: Vec<u8>) -> ConversationItem {
    ConversationItem::new(id, Role::Assistant)
        .with_status(status)
        .with_audio(audio)
}

#[tokio::test]
async fn connect_runs_steps_in_order() {
    let mut h = Harness::new(SessionConfig::default());
    assert_ok!(h.coordinator.connect().await);

    let expected_update = SessionConfig::default().session_update();
    assert_eq!(
        h.calls(),
        vec![
            Call::CaptureBegin,
            Call::PlaybackConnect,
            Call::ChannelConnect,
            Call::UpdateSession(expected_update),
            Call::SendMessage(vec![ContentPart::text("Hello!")]),
            Call::CaptureRecord,
        ]
    );
    assert_eq!(h.coordinator.connection_state(), ConnectionState::Connected);

    let session = h.coordinator.session().unwrap();
    assert_eq!(session.transcription_model.as_deref(), Some("whisper-1"));
    assert_eq!(session.instructions, SessionConfig::default().instructions);
}

#[tokio::test]
async fn streamed_audio_plays_and_completion_decodes_once() {
    let mut h = Harness::new(SessionConfig::default());
    assert_ok!(h.coordinator.connect().await);
    h.clear_calls();

    let b1 = vec![1, 0, 2, 0];
    h.events()
        .updated(
            assistant("a", ItemStatus::InProgress, b1.clone()),
            Some(ItemDelta::audio(b1.clone())),
        )
        .unwrap();
    h.coordinator.process_pending().await;

    assert_eq!(
        h.calls(),
        vec![Call::PlaybackAdd {
            track_id: "a".to_string(),
            bytes: b1.clone(),
        }]
    );
    let snapshot = h.coordinator.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].status, ItemStatus::InProgress);
    assert!(snapshot[0].file.file().is_none());

    h.events()
        .updated(assistant("a", ItemStatus::Completed, b1.clone()), None)
        .unwrap();
    h.coordinator.process_pending().await;

    let item = h.coordinator.snapshot().get("a").cloned().unwrap();
    let file = item.file.file().expect("decoded file");
    assert_eq!(file.samples, 2);
    assert_eq!(h.decodes.load(Ordering::SeqCst), 1);

    h.events()
        .updated(assistant("a", ItemStatus::Completed, b1), None)
        .unwrap();
    h.coordinator.process_pending().await;

    assert_eq!(h.decodes.load(Ordering::SeqCst), 1);
    assert!(h.coordinator.snapshot().get("a").unwrap().file.file().is_some());
}

#[tokio::test]
async fn repeated_updates_keep_last_record() {
    let mut h = Harness::new(SessionConfig::default());
    assert_ok!(h.coordinator.connect().await);

    let events = h.events();
    for transcript in ["Hel", "Hello", "Hello, how can I help?"] {
        events
            .updated(
                ConversationItem::new("a", Role::Assistant).with_transcript(transcript),
                None,
            )
            .unwrap();
    }
    events
        .updated(ConversationItem::new("u1", Role::User).with_transcript("hi"), None)
        .unwrap();
    h.coordinator.process_pending().await;

    let snapshot = h.coordinator.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].id, "a");
    assert_eq!(
        snapshot[0].formatted.transcript.as_deref(),
        Some("Hello, how can I help?")
    );
    assert_eq!(snapshot[1].id, "u1");
}

#[tokio::test]
async fn interruption_cancels_at_heard_offset_once() {
    let mut h = Harness::new(SessionConfig::default());
    assert_ok!(h.coordinator.connect().await);

    let chunk = vec![0u8; 9600 * 2];
    h.events()
        .updated(
            assistant("a", ItemStatus::InProgress, chunk.clone()),
            Some(ItemDelta::audio(chunk)),
        )
        .unwrap();
    h.coordinator.process_pending().await;
    assert_eq!(h.playback.advance(4800), 4800);
    h.clear_calls();

    h.events().interrupted().unwrap();
    h.coordinator.process_pending().await;

    assert_eq!(
        h.calls(),
        vec![
            Call::PlaybackInterrupt,
            Call::Cancel {
                track_id: "a".to_string(),
                offset: 4800,
            },
        ]
    );
    assert!(!h.playback.is_playing());
}

#[tokio::test]
async fn interruption_with_nothing_playing_sends_no_cancel() {
    let mut h = Harness::new(SessionConfig::default());
    assert_ok!(h.coordinator.connect().await);
    h.clear_calls();

    h.events().interrupted().unwrap();
    h.coordinator.process_pending().await;

    assert_eq!(h.calls(), vec![Call::PlaybackInterrupt]);
    assert!(h.coordinator.is_connected());
}

#[tokio::test]
async fn late_chunks_of_interrupted_item_are_not_played() {
    let mut h = Harness::new(SessionConfig::default());
    assert_ok!(h.coordinator.connect().await);

    let events = h.events();
    events
        .updated(
            assistant("a", ItemStatus::InProgress, vec![0; 8]),
            Some(ItemDelta::audio(vec![0; 8])),
        )
        .unwrap();
    events.interrupted().unwrap();
    events
        .updated(
            assistant("a", ItemStatus::InProgress, vec![0; 16]),
            Some(ItemDelta::audio(vec![0; 8])),
        )
        .unwrap();
    h.coordinator.process_pending().await;

    assert_eq!(h.playback.queued_samples(), 0);
}

#[tokio::test]
async fn disconnect_is_idempotent_and_clears_store() {
    let mut h = Harness::new(SessionConfig::default());

    h.coordinator.disconnect().await;
    assert!(h.coordinator.snapshot().is_empty());
    assert!(h.calls().is_empty());

    assert_ok!(h.coordinator.connect().await);
    h.events()
        .updated(ConversationItem::new("a", Role::Assistant), None)
        .unwrap();
    h.coordinator.process_pending().await;
    assert_eq!(h.coordinator.snapshot().len(), 1);
    h.clear_calls();

    h.coordinator.disconnect().await;
    assert!(h.coordinator.snapshot().is_empty());
    assert_eq!(
        h.calls(),
        vec![
            Call::ChannelDisconnect,
            Call::CaptureEnd,
            Call::PlaybackInterrupt,
        ]
    );

    h.coordinator.disconnect().await;
    assert!(h.coordinator.snapshot().is_empty());
    assert_eq!(h.calls().len(), 3);
    assert_eq!(h.coordinator.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn disconnect_releases_everything_when_teardown_steps_fail() {
    let mut h = Harness::with_options(
        SessionConfig::default(),
        Options {
            fail_disconnect: true,
            fail_end: true,
            ..Default::default()
        },
    );
    assert_ok!(h.coordinator.connect().await);
    h.events()
        .updated(ConversationItem::new("a", Role::Assistant), None)
        .unwrap();
    h.coordinator.process_pending().await;
    h.clear_calls();

    h.coordinator.disconnect().await;

    assert_eq!(
        h.calls(),
        vec![
            Call::ChannelDisconnect,
            Call::CaptureEnd,
            Call::PlaybackInterrupt,
        ]
    );
    assert!(h.coordinator.snapshot().is_empty());
    assert_eq!(h.coordinator.connection_state(), ConnectionState::Disconnected);

    // Nothing left to release, and a new session can start.
    h.coordinator.disconnect().await;
    assert_eq!(h.calls().len(), 3);
    assert_ok!(h.coordinator.connect().await);
}

#[tokio::test]
async fn failed_connect_releases_despite_teardown_errors() {
    let mut h = Harness::with_options(
        SessionConfig::default(),
        Options {
            fail_connect: true,
            fail_disconnect: true,
            fail_end: true,
            ..Default::default()
        },
    );

    let err = assert_err!(h.coordinator.connect().await);
    assert!(matches!(err, VoiceError::Connection(_)));
    assert_eq!(
        h.calls(),
        vec![
            Call::CaptureBegin,
            Call::PlaybackConnect,
            Call::ChannelConnect,
            Call::ChannelDisconnect,
            Call::CaptureEnd,
            Call::PlaybackInterrupt,
        ]
    );
    assert!(h.coordinator.snapshot().is_empty());
    assert_eq!(h.coordinator.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn capture_failure_aborts_connect_and_releases_microphone() {
    let mut h = Harness::with_options(
        SessionConfig::default(),
        Options {
            fail_capture: true,
            ..Default::default()
        },
    );

    let err = assert_err!(h.coordinator.connect().await);
    assert!(matches!(err, VoiceError::CaptureUnavailable(_)));
    assert_eq!(h.calls(), vec![Call::CaptureBegin, Call::CaptureEnd]);
    assert_eq!(h.coordinator.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn connection_failure_releases_everything_acquired() {
    let mut h = Harness::with_options(
        SessionConfig::default(),
        Options {
            fail_connect: true,
            ..Default::default()
        },
    );

    let err = assert_err!(h.coordinator.connect().await);
    assert!(matches!(err, VoiceError::Connection(_)));
    assert_eq!(
        h.calls(),
        vec![
            Call::CaptureBegin,
            Call::PlaybackConnect,
            Call::ChannelConnect,
            Call::ChannelDisconnect,
            Call::CaptureEnd,
            Call::PlaybackInterrupt,
        ]
    );
    assert!(h.coordinator.session().is_none());

    // A failed connect leaves the coordinator ready for another attempt.
    h.coordinator.disconnect().await;
    assert!(h.coordinator.snapshot().is_empty());
}

#[tokio::test]
async fn connect_timeout_releases_and_reports_connection_error() {
    let config = SessionConfig {
        connect_timeout_ms: 50,
        ..Default::default()
    };
    let mut h = Harness::with_options(
        config,
        Options {
            connect_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        },
    );

    let err = assert_err!(h.coordinator.connect().await);
    assert!(err.to_string().contains("timed out"));
    assert!(h.calls().contains(&Call::ChannelDisconnect));
    assert!(h.calls().contains(&Call::CaptureEnd));
    assert_eq!(h.coordinator.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn remote_history_is_merged_on_connect() {
    let history = vec![
        ConversationItem::new("h1", Role::User)
            .with_status(ItemStatus::Completed)
            .with_transcript("earlier"),
        assistant("h2", ItemStatus::Completed, vec![0; 4]),
    ];
    let mut h = Harness::with_options(
        SessionConfig::default(),
        Options {
            history,
            ..Default::default()
        },
    );

    assert_ok!(h.coordinator.connect().await);
    h.events()
        .updated(ConversationItem::new("greeting", Role::User), None)
        .unwrap();
    h.coordinator.process_pending().await;

    let ids: Vec<_> = h.coordinator.snapshot().iter().map(|i| i.id.clone()).collect();
    assert_eq!(ids, vec!["h1", "h2", "greeting"]);
    assert!(h.coordinator.snapshot().get("h2").unwrap().file.file().is_some());
}

#[tokio::test]
async fn server_vad_streams_every_frame() {
    let mut h = Harness::new(SessionConfig::default());
    assert_ok!(h.coordinator.connect().await);
    h.clear_calls();

    assert!(h.emit_frame(2400));
    assert!(h.emit_frame(2400));
    h.coordinator.process_pending().await;

    assert_eq!(h.calls(), vec![Call::AppendAudio(2400), Call::AppendAudio(2400)]);
}

#[tokio::test]
async fn frames_after_disconnect_are_not_forwarded() {
    let mut h = Harness::new(SessionConfig::default());
    assert_ok!(h.coordinator.connect().await);
    let on_frame = h.on_frame.lock().unwrap().clone().unwrap();

    h.coordinator.disconnect().await;
    h.clear_calls();
    on_frame(AudioFrame {
        samples: vec![0; 10],
        timestamp: Instant::now(),
    });
    h.coordinator.process_pending().await;

    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn manual_mode_forwards_only_inside_push_to_talk() {
    let config = SessionConfig {
        turn_detection: TurnDetectionMode::Manual,
        ..Default::default()
    };
    let mut h = Harness::new(config);
    assert_ok!(h.coordinator.connect().await);
    assert!(!h.calls().contains(&Call::CaptureRecord));
    assert!(!h.emit_frame(2400));

    h.clear_calls();
    assert_ok!(h.coordinator.start_user_turn().await);
    assert!(h.emit_frame(2400));
    h.coordinator.process_pending().await;
    assert_ok!(h.coordinator.stop_user_turn().await);
    assert!(!h.emit_frame(2400));

    assert_eq!(
        h.calls(),
        vec![
            Call::PlaybackInterrupt,
            Call::CaptureRecord,
            Call::AppendAudio(2400),
            Call::CapturePause,
            Call::CreateResponse,
        ]
    );
    assert!(matches!(
        h.coordinator.stop_user_turn().await,
        Err(VoiceError::InvalidState(_))
    ));
}

#[tokio::test]
async fn push_to_talk_cuts_off_assistant_audio() {
    let config = SessionConfig {
        turn_detection: TurnDetectionMode::Manual,
        ..Default::default()
    };
    let mut h = Harness::new(config);
    assert_ok!(h.coordinator.connect().await);
    h.events()
        .updated(
            assistant("a", ItemStatus::InProgress, vec![0; 200]),
            Some(ItemDelta::audio(vec![0; 200])),
        )
        .unwrap();
    h.coordinator.process_pending().await;
    h.playback.advance(60);
    h.clear_calls();

    assert_ok!(h.coordinator.start_user_turn().await);

    assert_eq!(
        h.calls(),
        vec![
            Call::PlaybackInterrupt,
            Call::Cancel {
                track_id: "a".to_string(),
                offset: 60,
            },
            Call::CaptureRecord,
        ]
    );
}

#[tokio::test]
async fn microphone_fault_is_reported_as_capture_notice() {
    let config = SessionConfig {
        turn_detection: TurnDetectionMode::Manual,
        ..Default::default()
    };
    let mut h = Harness::with_options(
        config,
        Options {
            fail_pause: true,
            ..Default::default()
        },
    );
    let mut notices = h.coordinator.handle().subscribe_notices();
    assert_ok!(h.coordinator.connect().await);
    assert_ok!(h.coordinator.start_user_turn().await);
    h.clear_calls();

    assert_ok!(h.coordinator.stop_user_turn().await);

    assert_eq!(h.calls(), vec![Call::CapturePause, Call::CreateResponse]);
    assert_eq!(
        notices.try_recv().unwrap(),
        SessionNotice::Capture("device unplugged".to_string())
    );
    assert!(h.coordinator.is_connected());
}

#[tokio::test]
async fn transport_error_is_surfaced_without_teardown() {
    let mut h = Harness::new(SessionConfig::default());
    let mut notices = h.coordinator.handle().subscribe_notices();
    assert_ok!(h.coordinator.connect().await);

    h.events().error("socket reset").unwrap();
    h.coordinator.process_pending().await;

    assert_eq!(
        notices.try_recv().unwrap(),
        SessionNotice::Transport("socket reset".to_string())
    );
    assert!(h.coordinator.is_connected());
}

#[tokio::test]
async fn decode_failure_is_isolated_to_the_item() {
    let mut h = Harness::new(SessionConfig::default());
    let mut notices = h.coordinator.handle().subscribe_notices();
    assert_ok!(h.coordinator.connect().await);

    // Odd byte count cannot be PCM16.
    let events = h.events();
    events
        .updated(assistant("bad", ItemStatus::Completed, vec![1, 2, 3]), None)
        .unwrap();
    events
        .updated(assistant("bad", ItemStatus::Completed, vec![1, 2, 3]), None)
        .unwrap();
    events
        .updated(ConversationItem::new("next", Role::User), None)
        .unwrap();
    h.coordinator.process_pending().await;

    assert!(matches!(
        notices.try_recv().unwrap(),
        SessionNotice::Decode { ref item_id, .. } if item_id == "bad"
    ));
    assert!(notices.try_recv().is_err());
    assert_eq!(h.decodes.load(Ordering::SeqCst), 1);

    let snapshot = h.coordinator.snapshot();
    assert!(matches!(snapshot.get("bad").unwrap().file, DecodeState::Failed(_)));
    assert!(snapshot.get("next").is_some());
    assert!(h.coordinator.is_connected());
}

#[tokio::test]
async fn handle_drives_event_loop() {
    let h = Harness::new(SessionConfig::default());
    let events_slot = Arc::clone(&h.events);
    let handle = h.coordinator.handle();
    let mut items = handle.watch_items();
    let task = tokio::spawn(h.coordinator.run());

    assert_ok!(handle.connect().await);
    assert!(handle.is_connected());

    let events = events_slot.lock().unwrap().clone().unwrap();
    events
        .updated(
            ConversationItem::new("a", Role::Assistant).with_transcript("hi there"),
            None,
        )
        .unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(snapshot) = items.next().await {
            if let Some(item) = snapshot.get("a") {
                return item.formatted.transcript.clone();
            }
        }
        None
    })
    .await
    .expect("snapshot published");
    assert_eq!(seen.as_deref(), Some("hi there"));

    handle.disconnect().await;
    assert!(handle.items().is_empty());
    assert_eq!(handle.connection_state(), ConnectionState::Disconnected);

    assert_ok!(handle.shutdown());
    assert_ok!(task.await);
    assert!(handle.connect().await.is_err());
}
