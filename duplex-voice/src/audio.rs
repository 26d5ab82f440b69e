//! Audio frames and the PCM16/base64 wire codec.
//!
//! Capture and playback work on normalized `f32` samples. On the wire, audio
//! travels as 16-bit signed little-endian PCM wrapped in standard base64, tagged
//! with a MIME type such as `audio/pcm;rate=16000`.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VoiceError};

/// PCM16 mono audio format, identified by its sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 24000, 16000).
    pub sample_rate: u32,
    /// Number of audio channels. Sessions are always mono.
    pub channels: u8,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_24khz()
    }
}

impl AudioFormat {
    /// Create a mono PCM16 format at the given rate.
    pub fn pcm16(sample_rate: u32) -> Self {
        Self { sample_rate, channels: 1 }
    }

    /// PCM16 at 24kHz (agent output default).
    pub fn pcm16_24khz() -> Self {
        Self::pcm16(24000)
    }

    /// PCM16 at 16kHz (microphone input default).
    pub fn pcm16_16khz() -> Self {
        Self::pcm16(16000)
    }

    /// Calculate bytes per second for this format.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * 2
    }

    /// MIME type used to tag chunks of this format on the wire.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Parse a PCM MIME type such as `audio/pcm;rate=24000`.
    ///
    /// A missing `rate` parameter falls back to `default_rate`.
    pub fn from_mime(mime: &str, default_rate: u32) -> Result<Self> {
        let mut parts = mime.split(';').map(str::trim);
        let essence = parts.next().unwrap_or_default();
        if !essence.eq_ignore_ascii_case("audio/pcm") && !essence.eq_ignore_ascii_case("audio/l16")
        {
            return Err(VoiceError::malformed(format!("unsupported media type: {mime}")));
        }

        let mut sample_rate = default_rate;
        for param in parts {
            if let Some((key, value)) = param.split_once('=') {
                if key.trim().eq_ignore_ascii_case("rate") {
                    sample_rate = value.trim().parse().map_err(|_| {
                        VoiceError::malformed(format!("invalid sample rate in {mime}"))
                    })?;
                }
            }
        }

        if sample_rate == 0 {
            return Err(VoiceError::malformed(format!("zero sample rate in {mime}")));
        }
        Ok(Self::pcm16(sample_rate))
    }
}

/// A mono block of normalized samples in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Samples in playback order.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Create a new frame.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// A frame of silence lasting `seconds`.
    pub fn silence(seconds: f64, sample_rate: u32) -> Self {
        let len = (seconds * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame has no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of this frame in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Encoded audio ready for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Format of the PCM payload.
    pub format: AudioFormat,
    /// Base64 text of the little-endian PCM16 bytes.
    pub data: String,
}

impl EncodedChunk {
    /// Create a chunk from already-encoded base64 text.
    pub fn new(format: AudioFormat, data: impl Into<String>) -> Self {
        Self { format, data: data.into() }
    }

    /// MIME tag for this chunk.
    pub fn mime_type(&self) -> String {
        self.format.mime_type()
    }
}

/// Quantize one normalized sample to PCM16.
///
/// Negative samples scale by 32768 and positive ones by 32767 so that both
/// ends of `[-1, 1]` map onto the full `i16` range.
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    let scaled = if s < 0.0 { s * 32768.0 } else { s * 32767.0 };
    scaled.round() as i16
}

/// Inverse of [`sample_to_i16`].
pub fn i16_to_sample(value: i16) -> f32 {
    if value < 0 { value as f32 / 32768.0 } else { value as f32 / 32767.0 }
}

/// Pack samples into little-endian PCM16 bytes.
pub fn to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        data.extend_from_slice(&sample_to_i16(*sample).to_le_bytes());
    }
    data
}

/// Unpack little-endian PCM16 bytes into normalized samples.
///
/// Fails without producing any samples when the length is odd.
pub fn from_pcm16_bytes(data: &[u8]) -> Result<Vec<f32>> {
    if data.len() % 2 != 0 {
        return Err(VoiceError::malformed(format!(
            "invalid data length for PCM16: {} (must be even)",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| i16_to_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Encode a frame as a base64 PCM16 chunk.
pub fn encode(frame: &AudioFrame) -> EncodedChunk {
    let bytes = to_pcm16_bytes(&frame.samples);
    EncodedChunk {
        format: AudioFormat::pcm16(frame.sample_rate),
        data: base64::engine::general_purpose::STANDARD.encode(bytes),
    }
}

/// Decode a base64 PCM16 chunk into a frame.
pub fn decode(chunk: &EncodedChunk) -> Result<AudioFrame> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(chunk.data.as_bytes())
        .map_err(|e| VoiceError::malformed(format!("invalid base64 payload: {e}")))?;
    let samples = from_pcm16_bytes(&bytes)?;
    Ok(AudioFrame::new(samples, chunk.format.sample_rate))
}

/// Re-chunks device buffers of arbitrary size into fixed-size batches.
#[derive(Debug, Clone)]
pub struct FrameBatcher {
    buffer: Vec<f32>,
    batch_samples: usize,
}

impl FrameBatcher {
    /// Create a batcher emitting `batch_samples` samples at a time.
    pub fn new(batch_samples: usize) -> Self {
        Self { buffer: Vec::with_capacity(batch_samples), batch_samples: batch_samples.max(1) }
    }

    /// Push new samples and return every batch that became complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut ready = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let room = self.batch_samples - self.buffer.len();
            let take = room.min(rest.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buffer.len() == self.batch_samples {
                ready.push(std::mem::replace(
                    &mut self.buffer,
                    Vec::with_capacity(self.batch_samples),
                ));
            }
        }
        ready
    }

    /// Number of samples waiting for the next batch.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial batch.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
