//! Audio frames, PCM16 helpers and the capture/playback collaborator interfaces.
//!
//! Capture produces fixed-size mono frames (`FrameChunker`), playback consumes
//! PCM16 chunks tagged with a track id (`TrackQueue`). Device adapters live in
//! `devices` behind the `devices` feature; `MemoryPlayback` runs headless.

use crate::config::SessionConfig;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

/// Audio configuration shared by capture and playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 24000)
    pub sample_rate: u32,

    /// Samples per capture frame (default: 2400, 100ms at 24kHz)
    pub frame_samples: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            frame_samples: 2400,
        }
    }
}

impl From<&SessionConfig> for AudioConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            frame_samples: config.frame_samples,
        }
    }
}

/// One fixed-size chunk of mono microphone audio.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// PCM16 samples, mono.
    pub samples: Vec<i16>,

    /// When the frame was completed
    pub timestamp: Instant,
}

/// Callback invoked by a capture source for every completed frame.
pub type FrameCallback = Arc<dyn Fn(AudioFrame) + Send + Sync>;

/// Accumulates device callbacks of arbitrary length into fixed-size frames.
#[derive(Debug)]
pub struct FrameChunker {
    frame_samples: usize,
    pending: Vec<i16>,
}

impl FrameChunker {
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        }
    }

    /// Append samples; returns every frame completed by this push. The remainder is kept.
    pub fn push(&mut self, samples: &[i16]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        for &sample in samples {
            self.pending.push(sample);
            if self.pending.len() >= self.frame_samples {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_samples));
                frames.push(AudioFrame {
                    samples: full,
                    timestamp: Instant::now(),
                });
            }
        }
        frames
    }

    /// Emit whatever is buffered as a short final frame.
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }
        Some(AudioFrame {
            samples: std::mem::take(&mut self.pending),
            timestamp: Instant::now(),
        })
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Drop buffered samples without emitting them.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Routes device samples into frames for whoever is recording.
///
/// Shared between a device callback (`push`) and the capture controller
/// (`open` / `close`). Samples arriving while closed are discarded; closing
/// delivers the buffered remainder as a short final frame.
pub struct CaptureGate {
    chunker: FrameChunker,
    target: Option<FrameCallback>,
}

impl CaptureGate {
    pub fn new(frame_samples: usize) -> Self {
        Self {
            chunker: FrameChunker::new(frame_samples),
            target: None,
        }
    }

    /// Start delivering frames to `on_frame`. Audio buffered before the window is dropped.
    pub fn open(&mut self, on_frame: FrameCallback) {
        self.chunker.clear();
        self.target = Some(on_frame);
    }

    /// Feed device samples; completed frames go to the open target.
    pub fn push(&mut self, samples: &[i16]) {
        let Some(target) = &self.target else {
            return;
        };
        for frame in self.chunker.push(samples) {
            target(frame);
        }
    }

    /// Flush the remainder to the target, then stop delivering.
    pub fn close(&mut self) {
        if let Some(target) = self.target.take() {
            if let Some(frame) = self.chunker.flush() {
                debug!(samples = frame.samples.len(), "Delivering final partial frame");
                target(frame);
            }
        }
        self.chunker.clear();
    }

    pub fn is_open(&self) -> bool {
        self.target.is_some()
    }
}

impl std::fmt::Debug for CaptureGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureGate")
            .field("buffered", &self.chunker.buffered())
            .field("open", &self.is_open())
            .finish()
    }
}

/// Convert normalized float samples (-1.0..1.0) to PCM16, clamping out-of-range input.
pub fn pcm16_from_f32(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * 32767.0).round() as i16)
        .collect()
}

/// Parse little-endian PCM16 bytes.
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> VoiceResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Where playback actually stopped: the item id and how many of its samples were heard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackOffset {
    pub track_id: String,
    pub offset: u64,
}

#[derive(Debug)]
struct PlaybackTrack {
    id: String,
    pending: VecDeque<i16>,
}

/// Ordered per-track playback buffer with a played-sample clock.
///
/// Tracks play in order of their first chunk; chunks for one track play in
/// arrival order. Offsets count samples played per track id and survive
/// underruns, so a track drained mid-stream keeps counting when more audio arrives.
#[derive(Debug, Default)]
pub struct TrackQueue {
    tracks: VecDeque<PlaybackTrack>,
    offsets: HashMap<String, u64>,
    interrupted: HashSet<String>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue samples for `track_id`. Returns false when the track was interrupted
    /// and the chunk was discarded.
    pub fn push(&mut self, track_id: &str, samples: &[i16]) -> bool {
        if self.interrupted.contains(track_id) {
            debug!(track_id, samples = samples.len(), "dropping audio for interrupted track");
            return false;
        }
        if samples.is_empty() {
            return true;
        }
        match self.tracks.iter_mut().find(|t| t.id == track_id) {
            Some(track) => track.pending.extend(samples.iter().copied()),
            None => {
                // Offsets only matter for queued tracks and for a drained track refilling.
                let tracks = &self.tracks;
                self.offsets
                    .retain(|id, _| id == track_id || tracks.iter().any(|t| &t.id == id));
                self.tracks.push_back(PlaybackTrack {
                    id: track_id.to_string(),
                    pending: samples.iter().copied().collect(),
                });
            }
        }
        true
    }

    /// Pop the next sample to play. Drained tracks are removed.
    pub fn next_sample(&mut self) -> Option<i16> {
        loop {
            let track = self.tracks.front_mut()?;
            match track.pending.pop_front() {
                Some(sample) => {
                    *self.offsets.entry(track.id.clone()).or_insert(0) += 1;
                    if track.pending.is_empty() {
                        self.tracks.pop_front();
                    }
                    return Some(sample);
                }
                None => {
                    self.tracks.pop_front();
                }
            }
        }
    }

    /// Play up to `samples` samples; returns how many were actually played.
    pub fn advance(&mut self, samples: usize) -> usize {
        let mut played = 0;
        while played < samples && self.next_sample().is_some() {
            played += 1;
        }
        played
    }

    /// Stop the current track and discard everything queued.
    ///
    /// Returns the current track and its played offset, or `None` if nothing was playing.
    /// Only the tracks cut by the latest interruption stay marked.
    pub fn interrupt(&mut self) -> Option<TrackOffset> {
        let current = self.tracks.front().map(|t| t.id.clone());
        if !self.tracks.is_empty() {
            self.interrupted.clear();
        }
        for track in self.tracks.drain(..) {
            self.interrupted.insert(track.id);
        }
        let track_id = current?;
        let offset = self.offsets.get(&track_id).copied().unwrap_or(0);
        Some(TrackOffset { track_id, offset })
    }

    /// Forget all tracks, offsets and interruption marks.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.offsets.clear();
        self.interrupted.clear();
    }

    pub fn is_playing(&self) -> bool {
        !self.tracks.is_empty()
    }

    pub fn queued_samples(&self) -> usize {
        self.tracks.iter().map(|t| t.pending.len()).sum()
    }
}

/// Microphone collaborator. Frames are delivered through the callback given to `record`.
#[async_trait]
pub trait AudioCaptureSource: Send {
    /// Acquire the input device. Fails with `VoiceError::CaptureUnavailable`.
    async fn begin(&mut self) -> VoiceResult<()>;

    /// Start delivering frames to `on_frame` until `pause` or `end`.
    async fn record(&mut self, on_frame: FrameCallback) -> VoiceResult<()>;

    /// Stop delivering frames but keep the device.
    async fn pause(&mut self) -> VoiceResult<()>;

    /// Release the device. Must be safe to call when `begin` never succeeded.
    async fn end(&mut self) -> VoiceResult<()>;
}

/// Speaker collaborator keyed by track id (the conversation item id).
#[async_trait]
pub trait AudioPlaybackSink: Send {
    async fn connect(&mut self) -> VoiceResult<()>;

    /// Queue little-endian PCM16 for `track_id`, after earlier chunks of the same track.
    async fn add_pcm16(&mut self, pcm: &[u8], track_id: &str) -> VoiceResult<()>;

    /// Stop playback and discard in-flight tracks. Idempotent; `None` when nothing was playing.
    async fn interrupt(&mut self) -> VoiceResult<Option<TrackOffset>>;
}

/// Playback sink without an output device. The clock only moves on `advance`.
#[derive(Debug, Clone, Default)]
pub struct MemoryPlayback {
    queue: Arc<Mutex<TrackQueue>>,
}

impl MemoryPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate `samples` samples reaching the speaker.
    pub fn advance(&self, samples: usize) -> usize {
        self.queue.lock().map(|mut q| q.advance(samples)).unwrap_or(0)
    }

    pub fn is_playing(&self) -> bool {
        self.queue.lock().map(|q| q.is_playing()).unwrap_or(false)
    }

    pub fn queued_samples(&self) -> usize {
        self.queue.lock().map(|q| q.queued_samples()).unwrap_or(0)
    }

    fn with_queue<T>(&self, f: impl FnOnce(&mut TrackQueue) -> T) -> VoiceResult<T> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|e| VoiceError::Playback(format!("track queue lock poisoned: {}", e)))?;
        Ok(f(&mut queue))
    }
}

#[async_trait]
impl AudioPlaybackSink for MemoryPlayback {
    async fn connect(&mut self) -> VoiceResult<()> {
        self.with_queue(TrackQueue::reset)
    }

    async fn add_pcm16(&mut self, pcm: &[u8], track_id: &str) -> VoiceResult<()> {
        let samples = pcm16_from_le_bytes(pcm)?;
        self.with_queue(|q| {
            q.push(track_id, &samples);
        })
    }

    async fn interrupt(&mut self) -> VoiceResult<Option<TrackOffset>> {
        self.with_queue(TrackQueue::interrupt)
    }
}
