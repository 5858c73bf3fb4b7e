//! PCM16 audio frames: quantization, little-endian packing, and the base64 wire form.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::time::Duration;

use crate::error::{LiveError, LiveResult};

/// Outbound (microphone) sample rate.
pub const INPUT_SAMPLE_RATE: u32 = 16000;
/// Inbound (model voice) sample rate.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

const PCM16_SCALE: f32 = 32768.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Mono, little-endian signed 16-bit PCM. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pcm: Vec<u8>,
    sample_rate: u32,
    direction: Direction,
}

impl AudioFrame {
    /// Quantize float samples (nominally -1.0..=1.0) into an outbound frame.
    pub fn encode(samples: &[f32], sample_rate: u32) -> Self {
        let mut pcm = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            pcm.extend_from_slice(&quantize(s).to_le_bytes());
        }
        Self {
            pcm,
            sample_rate,
            direction: Direction::Outbound,
        }
    }

    /// Wrap raw little-endian PCM bytes. Odd lengths are rejected.
    pub fn from_pcm(pcm: Vec<u8>, sample_rate: u32, direction: Direction) -> LiveResult<Self> {
        if pcm.len() % 2 != 0 {
            return Err(LiveError::Frame(format!(
                "PCM16 payload has odd length {}",
                pcm.len()
            )));
        }
        Ok(Self {
            pcm,
            sample_rate,
            direction,
        })
    }

    /// Decode a base64 payload received from the session.
    pub fn from_base64(data: &str, sample_rate: u32) -> LiveResult<Self> {
        let pcm = STANDARD.decode(data.trim())?;
        Self::from_pcm(pcm, sample_rate, Direction::Inbound)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.pcm)
    }

    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }

    pub fn duration(&self) -> Duration {
        samples_duration(self.sample_count(), self.sample_rate)
    }

    /// MIME type declared on the wire, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    pub fn samples_i16(&self) -> impl Iterator<Item = i16> + '_ {
        self.pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
    }

    /// Samples back as floats in -1.0..1.0.
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples_i16().map(|s| s as f32 / PCM16_SCALE).collect()
    }
}

/// Exact playback length of `samples` at `sample_rate` (integer nanoseconds, no float drift).
pub fn samples_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = samples as u128 * 1_000_000_000 / sample_rate as u128;
    Duration::from_nanos(nanos as u64)
}

/// Scale by 32768, round, and clamp into the i16 range.
pub fn quantize(sample: f32) -> i16 {
    let scaled = (sample * PCM16_SCALE).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
