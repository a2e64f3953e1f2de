//! Rate conversion and fixed-size frame assembly.
//!
//! The device captures at its native rate (commonly 48 kHz); the voice
//! service expects 16 kHz mono frames of exactly 4096 samples. Both stages
//! run on the pump thread, where allocation is allowed:
//!
//! ```text
//! device-rate f32 ─► RateConverter ─► FrameAssembler ─► AudioFrame×N
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::codec::AudioFrame;
use crate::error::{KeshraError, Result};

/// Samples per outbound frame. 4096 at 16 kHz ≈ 256 ms, matching the
/// service's expected chunk cadence.
pub const FRAME_SAMPLES: usize = 4096;

/// Converts captured mono audio from the device rate to the service rate.
///
/// Rubato's `FastFixedIn` consumes fixed-size input blocks, so short pushes
/// carry over between calls until a full block is available. When the two
/// rates are equal no resampler is constructed and [`convert`] hands the
/// input straight back.
///
/// [`convert`]: RateConverter::convert
pub struct RateConverter {
    inner: Option<FastFixedIn<f32>>,
    /// Samples waiting for the next full block.
    carry: Vec<f32>,
    block: usize,
    /// Rubato output buffer, `[1][output_frames_max]`, reused every call.
    out_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `KeshraError::AudioDevice` when rubato rejects the rate pair.
    pub fn new(capture_rate: u32, target_rate: u32, block: usize) -> Result<Self> {
        if capture_rate == target_rate {
            return Ok(Self {
                inner: None,
                carry: Vec::new(),
                block,
                out_buf: Vec::new(),
            });
        }

        let inner = FastFixedIn::<f32>::new(
            target_rate as f64 / capture_rate as f64,
            1.0,
            PolynomialDegree::Cubic,
            block,
            1,
        )
        .map_err(|e| KeshraError::AudioDevice(format!("resampler init: {e}")))?;

        let out_buf = vec![vec![0f32; inner.output_frames_max()]];
        tracing::info!(capture_rate, target_rate, block, "rate conversion active");

        Ok(Self {
            inner: Some(inner),
            carry: Vec::new(),
            block,
            out_buf,
        })
    }

    /// Feed captured samples; returns converted output, which is empty
    /// until at least one full block has accumulated.
    pub fn convert(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut inner) = self.inner else {
            return samples.to_vec();
        };

        self.carry.extend_from_slice(samples);
        let blocks = self.carry.len() / self.block;

        let mut out = Vec::with_capacity(blocks * self.out_buf[0].len());
        for chunk in self.carry.chunks_exact(self.block) {
            match inner.process_into_buffer(&[chunk], &mut self.out_buf, None) {
                Ok((_consumed, produced)) => out.extend_from_slice(&self.out_buf[0][..produced]),
                Err(e) => error!("rate conversion failed on one block: {e}"),
            }
        }
        self.carry.drain(..blocks * self.block);

        out
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }
}

/// Accumulates target-rate samples into fixed 4096-sample frames.
///
/// Output frames are always exactly `FRAME_SAMPLES` long; a trailing
/// partial frame stays buffered until enough samples arrive or the
/// assembler is reset.
pub struct FrameAssembler {
    buf: Vec<f32>,
    sample_rate: u32,
}

impl FrameAssembler {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            buf: Vec::with_capacity(FRAME_SAMPLES * 2),
            sample_rate,
        }
    }

    /// Push samples; returns zero or more complete frames.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.buf.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.buf.len() >= FRAME_SAMPLES {
            let frame: Vec<f32> = self.buf.drain(..FRAME_SAMPLES).collect();
            frames.push(AudioFrame::mono(frame, self.sample_rate));
        }
        frames
    }

    /// Number of samples currently buffered below one frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drop any buffered partial frame.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

/// Root-mean-square energy of a sample block, in [0.0, 1.0] for samples
/// within [-1.0, 1.0].
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq = samples.iter().map(|s| s * s).sum::<f32>();
    (sum_sq / samples.len() as f32).sqrt()
}
