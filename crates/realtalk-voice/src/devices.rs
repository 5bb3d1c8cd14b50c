//! Microphone capture (cpal) and speaker playback (rodio).
//!
//! cpal and rodio stream handles are not `Send` on every platform, so each
//! adapter parks its stream on a dedicated thread and talks to it through
//! shared state. Dropping the adapter closes the stream.

use crate::audio::{
    pcm16_from_f32, pcm16_from_le_bytes, AudioCaptureSource, AudioConfig, AudioPlaybackSink,
    CaptureGate, FrameCallback, TrackOffset, TrackQueue,
};
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

type SharedGate = Arc<Mutex<CaptureGate>>;

/// Thread that owns a device stream until stopped.
struct StreamWorker {
    stop_tx: std_mpsc::Sender<()>,
    thread: thread::JoinHandle<()>,
}

impl StreamWorker {
    /// Run `open` on a new thread and wait until the stream is open or has failed.
    async fn spawn<S, F>(name: &str, fail: fn(String) -> VoiceError, open: F) -> VoiceResult<Self>
    where
        F: FnOnce() -> VoiceResult<S> + Send + 'static,
        S: 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel::<VoiceResult<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
            let stream = match open() {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            // Returns on stop() or when the worker is dropped.
            let _ = stop_rx.recv();
            drop(stream);
        })?;

        ready_rx
            .await
            .map_err(|_| fail(format!("{} thread exited before opening", name)))??;

        Ok(Self { stop_tx, thread })
    }

    fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.thread.join().is_err() {
            warn!("Audio worker thread panicked");
        }
    }
}

/// Microphone capture using CPAL
pub struct CpalCapture {
    config: AudioConfig,
    gate: SharedGate,
    worker: Option<StreamWorker>,
}

impl CpalCapture {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            gate: Arc::new(Mutex::new(CaptureGate::new(config.frame_samples))),
            worker: None,
        }
    }

    /// List available input devices
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;

        let mut device_names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                device_names.push(name);
            }
        }

        Ok(device_names)
    }

    fn with_gate<T>(&self, f: impl FnOnce(&mut CaptureGate) -> T) -> VoiceResult<T> {
        let mut gate = self
            .gate
            .lock()
            .map_err(|e| VoiceError::CaptureUnavailable(format!("capture gate lock poisoned: {}", e)))?;
        Ok(f(&mut gate))
    }
}

fn open_input_stream(config: AudioConfig, gate: SharedGate) -> VoiceResult<Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::CaptureUnavailable("No input device available".to_string()))?;

    info!(
        "🎤 Using input device: {} ({}Hz mono)",
        device.name().unwrap_or_else(|_| "Unknown".to_string()),
        config.sample_rate
    );

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // Paused capture keeps the device open and the gate drops samples.
            if let Ok(mut gate) = gate.lock() {
                gate.push(&pcm16_from_f32(data));
            }
        },
        move |err| {
            warn!("Audio stream error: {}", err);
        },
        None,
    )?;

    stream.play()?;
    Ok(stream)
}

#[async_trait]
impl AudioCaptureSource for CpalCapture {
    async fn begin(&mut self) -> VoiceResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let config = self.config;
        let gate = Arc::clone(&self.gate);
        let worker = StreamWorker::spawn("realtalk-capture", VoiceError::CaptureUnavailable, move || {
            open_input_stream(config, gate)
        })
        .await?;
        self.worker = Some(worker);
        info!("✅ Audio capture started");
        Ok(())
    }

    async fn record(&mut self, on_frame: FrameCallback) -> VoiceResult<()> {
        if self.worker.is_none() {
            return Err(VoiceError::CaptureUnavailable("capture not started".to_string()));
        }
        self.with_gate(|gate| gate.open(on_frame))
    }

    async fn pause(&mut self) -> VoiceResult<()> {
        self.with_gate(CaptureGate::close)
    }

    async fn end(&mut self) -> VoiceResult<()> {
        self.with_gate(CaptureGate::close)?;
        if let Some(worker) = self.worker.take() {
            worker.stop();
            info!("⏹️ Audio capture stopped");
        }
        Ok(())
    }
}

/// Infinite rodio source reading the shared track queue; silence when empty.
struct TrackSource {
    queue: Arc<Mutex<TrackQueue>>,
    sample_rate: u32,
}

impl Iterator for TrackSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let sample = self
            .queue
            .lock()
            .ok()
            .and_then(|mut queue| queue.next_sample())
            .unwrap_or(0);
        Some(sample as f32 / 32768.0)
    }
}

impl rodio::Source for TrackSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

fn open_output_stream(
    sample_rate: u32,
    queue: Arc<Mutex<TrackQueue>>,
) -> VoiceResult<rodio::OutputStream> {
    let (stream, handle) = rodio::OutputStream::try_default()?;
    handle.play_raw(TrackSource { queue, sample_rate })?;
    info!("🔊 Playback stream open ({}Hz)", sample_rate);
    Ok(stream)
}

/// Speaker playback using Rodio, one track per conversation item.
pub struct RodioPlayback {
    sample_rate: u32,
    queue: Arc<Mutex<TrackQueue>>,
    worker: Option<StreamWorker>,
}

impl RodioPlayback {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            queue: Arc::new(Mutex::new(TrackQueue::new())),
            worker: None,
        }
    }

    /// Whether any track still has queued audio
    pub fn is_playing(&self) -> bool {
        self.queue.lock().map(|q| q.is_playing()).unwrap_or(false)
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
impl AudioPlaybackSink for RodioPlayback {
    async fn connect(&mut self) -> VoiceResult<()> {
        self.with_queue(TrackQueue::reset)?;
        if self.worker.is_some() {
            return Ok(());
        }
        let sample_rate = self.sample_rate;
        let queue = Arc::clone(&self.queue);
        let worker = StreamWorker::spawn("realtalk-playback", VoiceError::Playback, move || {
            open_output_stream(sample_rate, queue)
        })
        .await?;
        self.worker = Some(worker);
        Ok(())
    }

    async fn add_pcm16(&mut self, pcm: &[u8], track_id: &str) -> VoiceResult<()> {
        let samples = pcm16_from_le_bytes(pcm)?;
        self.with_queue(|q| {
            q.push(track_id, &samples);
        })
    }

    async fn interrupt(&mut self) -> VoiceResult<Option<TrackOffset>> {
        let stopped = self.with_queue(TrackQueue::interrupt)?;
        if stopped.is_some() {
            info!("⏹️ Playback interrupted");
        }
        Ok(stopped)
    }
}

impl Drop for RodioPlayback {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }
}
