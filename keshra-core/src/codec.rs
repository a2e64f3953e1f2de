//! PCM wire codec: f32 sample frames ↔ base64 PCM16 LE blobs.
//!
//! The voice streaming service carries audio inside JSON text messages, so
//! every frame crosses the wire as base64-encoded 16-bit little-endian
//! signed PCM. The codec is sample-rate agnostic: the rate is a declared
//! property of the blob's MIME type (16 kHz for outbound microphone audio,
//! 24 kHz for inbound synthesized speech), and no rate conversion happens
//! here — see `capture::frame` for that.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A contiguous run of mono f32 samples at a known sample rate.
///
/// Created once per capture callback or per decoded inbound chunk and
/// consumed by the next pipeline stage; never mutated after creation.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 24000, 48000).
    pub sample_rate: u32,
    /// Channel count. Always 1 in this pipeline.
    pub channels: u16,
}

impl AudioFrame {
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// Duration of this frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Wire representation of one PCM16 frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedBlob {
    /// Base64-encoded PCM16 LE bytes.
    pub data: String,
    /// Declared format, e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
}

/// MIME type string for raw PCM at the given rate.
pub fn pcm_mime(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Encode f32 samples as a base64 PCM16 LE blob.
///
/// Samples are clamped to [-1, 1] first; out-of-range input is never
/// rejected. Negative samples scale by 32768 and non-negative by 32767 so
/// the result always fits i16 — full-scale -1.0 maps to i16::MIN and
/// full-scale 1.0 to i16::MAX.
pub fn encode_frame(samples: &[f32], sample_rate: u32) -> EncodedBlob {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = if clamped < 0.0 {
            (clamped * 32768.0) as i16
        } else {
            (clamped * 32767.0) as i16
        };
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    EncodedBlob {
        data: BASE64.encode(bytes),
        mime_type: pcm_mime(sample_rate),
    }
}

/// Decode a base64 PCM16 LE payload back to f32 samples.
///
/// Fails only when the input is not valid base64. A trailing odd byte is
/// ignored rather than rejected — a truncated final sample cannot be
/// reconstructed anyway.
pub fn decode_frame(data: &str) -> Result<Vec<f32>> {
    let bytes = BASE64.decode(data)?;
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_within_quantization_error() {
        let samples: Vec<f32> = (0..512)
            .map(|i| ((i as f32) / 512.0) * 2.0 - 1.0)
            .collect();

        let blob = encode_frame(&samples, 16_000);
        let decoded = decode_frame(&blob.data).unwrap();

        assert_eq!(decoded.len(), samples.len());
        for (orig, back) in samples.iter().zip(&decoded) {
            assert!(
                (orig - back).abs() <= 1.0 / 32768.0,
                "orig={orig} back={back}"
            );
        }
    }

    #[test]
    fn out_of_range_samples_clamp_to_int16_bounds() {
        let blob = encode_frame(&[1.5, -2.0, 0.0, 1.0, -1.0], 16_000);
        let bytes = BASE64.decode(&blob.data).unwrap();
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();

        assert_eq!(values, vec![i16::MAX, i16::MIN, 0, i16::MAX, i16::MIN]);
    }

    #[test]
    fn full_scale_negative_survives_round_trip() {
        let blob = encode_frame(&[-1.0], 24_000);
        let decoded = decode_frame(&blob.data).unwrap();
        assert_eq!(decoded, vec![-1.0]);
    }

    #[test]
    fn invalid_base64_is_an_error() {
        assert!(decode_frame("not!valid!base64!!").is_err());
    }

    #[test]
    fn odd_trailing_byte_is_ignored() {
        let encoded = BASE64.encode([0x00u8, 0x40, 0x7f]);
        let decoded = decode_frame(&encoded).unwrap();
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn mime_type_declares_rate() {
        let blob = encode_frame(&[0.0], 16_000);
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
    }

    #[test]
    fn empty_frame_encodes_to_empty_payload() {
        let blob = encode_frame(&[], 16_000);
        assert!(blob.data.is_empty());
        assert!(decode_frame(&blob.data).unwrap().is_empty());
    }
}
