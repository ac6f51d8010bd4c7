//! 16-bit PCM framing for the live session wire format.
//!
//! Outbound capture blocks are f32 samples in -1.0..1.0, scaled by 32768 and
//! truncated to i16 (saturating at the i16 range), packed little-endian and
//! base64-encoded. Inbound chunks take the reverse path.

use base64::Engine;

use crate::error::{ConciergeError, ConciergeResult};
use crate::transport::MediaBlob;

/// Capture sample rate expected by the remote model
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of synthesized audio sent back by the remote model
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

const PCM_SCALE: f32 = 32768.0;

/// MIME descriptor for raw 16-bit PCM at the given rate
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Decoded inbound audio, ready to be scheduled on the output clock
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Mono samples normalized to -1.0..1.0
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    /// Playback length in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Convert normalized samples to little-endian i16 bytes
pub fn float_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        // `as` truncates toward zero and saturates, so 1.0 lands on i16::MAX
        .map(|&s| (s * PCM_SCALE) as i16)
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

/// Convert little-endian i16 bytes back to normalized samples
pub fn pcm16_to_float(bytes: &[u8]) -> ConciergeResult<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(ConciergeError::Decode(format!(
            "odd PCM byte count: {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM_SCALE)
        .collect())
}

/// Encode one capture block into an outbound media blob
pub fn encode_blob(samples: &[f32], sample_rate: u32) -> MediaBlob {
    let pcm_bytes = float_to_pcm16(samples);

    MediaBlob {
        mime_type: pcm_mime_type(sample_rate),
        data: base64::engine::general_purpose::STANDARD.encode(pcm_bytes),
    }
}

/// Decode an inbound base64 PCM payload into a playable buffer
pub fn decode_chunk(data: &str, sample_rate: u32) -> ConciergeResult<PlaybackBuffer> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| ConciergeError::Decode(e.to_string()))?;

    Ok(PlaybackBuffer {
        samples: pcm16_to_float(&bytes)?,
        sample_rate,
    })
}
