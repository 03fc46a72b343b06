//! PCM wire codec
//!
//! The live service speaks 16-bit little-endian PCM wrapped in base64 text.
//! Outbound audio is captured at 16 kHz, inbound speech arrives at 24 kHz;
//! both are mono.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use super::CAPTURE_SAMPLE_RATE;
use crate::{Error, Result};

/// An encoded audio chunk as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireChunk {
    /// MIME type, e.g. `audio/pcm;rate=16000`
    #[serde(default)]
    pub mime_type: String,
    /// Base64 of little-endian i16 samples
    pub data: String,
}

/// MIME type for PCM at the given rate
#[must_use]
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Encode captured f32 samples for transmission
///
/// Samples are clamped to [-1, 1] before scaling to i16.
#[must_use]
pub fn encode_outbound(samples: &[f32]) -> WireChunk {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    WireChunk {
        mime_type: pcm_mime_type(CAPTURE_SAMPLE_RATE),
        data: BASE64.encode(bytes),
    }
}

/// Decode a base64 PCM payload into f32 samples in [-1, 1]
///
/// # Errors
///
/// Returns `Error::Decode` if the payload is not valid base64 or does not
/// hold a whole number of 16-bit samples
pub fn decode_inbound(data: &str) -> Result<Vec<f32>> {
    let bytes = BASE64
        .decode(data.trim())
        .map_err(|e| Error::Decode(format!("invalid base64: {e}")))?;

    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "odd payload length {} for 16-bit PCM",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect())
}

/// Playback duration in seconds of `frames` mono samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn duration_secs(frames: usize, sample_rate: u32) -> f64 {
    frames as f64 / f64::from(sample_rate)
}
