//! Decode a completed item's raw PCM16 audio into a playable WAV file.
//!
//! This is the derived `file` artifact attached to a conversation item once it
//! is completed. It is computed at most once per item (see `DecodeState`).

use crate::audio::pcm16_from_le_bytes;
use crate::error::{VoiceError, VoiceResult};
use std::time::Duration;

const WAV_HEADER_LEN: usize = 44;

/// A mono 16-bit WAV file held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavFile {
    /// Complete RIFF/WAVE bytes, header included.
    pub bytes: Vec<u8>,
    pub sample_rate: u32,
    /// Number of mono samples in the data chunk.
    pub samples: usize,
}

impl WavFile {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples as f64 / self.sample_rate as f64)
    }

    /// The PCM payload after the header.
    pub fn data(&self) -> &[u8] {
        &self.bytes[WAV_HEADER_LEN..]
    }
}

/// Turns accumulated item audio into the derived artifact. Implementations must be pure:
/// the same input always yields the same file.
pub trait AudioDecoder: Send + Sync {
    /// `pcm` is little-endian 16-bit mono at `sample_rate`.
    fn decode(&self, pcm: &[u8], sample_rate: u32) -> VoiceResult<WavFile>;
}

/// Wraps PCM16 in a WAV container without resampling.
#[derive(Debug, Default, Clone, Copy)]
pub struct WavDecoder;

impl AudioDecoder for WavDecoder {
    fn decode(&self, pcm: &[u8], sample_rate: u32) -> VoiceResult<WavFile> {
        if sample_rate == 0 {
            return Err(VoiceError::Decode("sample rate must be non-zero".to_string()));
        }
        // Validates the byte length and gives the sample count.
        let samples = pcm16_from_le_bytes(pcm)?.len();
        let data_len = u32::try_from(pcm.len())
            .ok()
            .filter(|len| *len <= u32::MAX - (WAV_HEADER_LEN as u32 - 8))
            .ok_or_else(|| VoiceError::Decode(format!("{} bytes exceed WAV size limit", pcm.len())))?;
        let file_len = WAV_HEADER_LEN as u32 + data_len;
        let byte_rate = sample_rate.checked_mul(2).ok_or_else(|| {
            VoiceError::Decode(format!("sample rate {} too high for WAV", sample_rate))
        })?;

        let mut buf = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());
        // RIFF header
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(file_len - 8).to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        // fmt subchunk
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes()); // subchunk1 size
        buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
        buf.extend_from_slice(&1u16.to_le_bytes()); // mono
        buf.extend_from_slice(&sample_rate.to_le_bytes());
        buf.extend_from_slice(&byte_rate.to_le_bytes()); // byte rate
        buf.extend_from_slice(&2u16.to_le_bytes()); // block align
        buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
        // data subchunk
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&data_len.to_le_bytes());
        buf.extend_from_slice(pcm);

        Ok(WavFile {
            bytes: buf,
            sample_rate,
            samples,
        })
    }
}
