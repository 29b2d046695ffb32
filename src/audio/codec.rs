//! PCM16 wire encoding.
//!
//! The agent exchanges little-endian signed 16-bit mono PCM embedded in JSON as
//! standard base64.

use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

/// Inbound payload that could not be turned into samples. The message (or the
/// offending part) is skipped; the session keeps running.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed server message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("PCM16 payload has odd length ({0} bytes)")]
    OddLength(usize),
}

/// Convert one normalized sample to PCM16.
///
/// Negative values scale by 32768 and non-negative by 32767 so both ends of
/// [-1, 1] map onto the full i16 range.
pub fn sample_to_pcm16(sample: f32) -> i16 {
    let s = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    let scaled = if s < 0.0 { s * 32_768.0 } else { s * 32_767.0 };
    scaled.round() as i16
}

pub fn pcm16_to_sample(value: i16) -> f32 {
    f32::from(value) / 32_768.0
}

/// Encode normalized samples as little-endian PCM16 bytes.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_pcm16(sample).to_le_bytes());
    }
    bytes
}

/// Decode little-endian PCM16 bytes into normalized samples.
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| pcm16_to_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Samples -> PCM16 -> base64, ready for a `mediaChunks[].data` field.
pub fn encode_transport(samples: &[f32]) -> String {
    STANDARD.encode(encode_pcm16(samples))
}

/// base64 -> PCM16 -> samples, from an `inlineData.data` field.
pub fn decode_transport(data: &str) -> Result<Vec<f32>, DecodeError> {
    let bytes = STANDARD.decode(data.trim())?;
    decode_pcm16(&bytes)
}
