//! Microphone capture via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! The callback therefore writes straight into an SPSC ring buffer producer
//! whose `push_slice` is lock-free and allocation-free; all framing,
//! resampling and encoding happens downstream on the pump thread.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio
//! on macOS). `MicCapture` must be created and dropped on the same thread;
//! the session controller does both inside one `spawn_blocking` thread.

pub mod device;
pub mod frame;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use ringbuf::{traits::Split, HeapRb};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

use crate::error::{KeshraError, Result};

pub use ringbuf::traits::{Consumer, Producer};

/// Producer half of the capture ring — held by the audio callback.
pub type CaptureProducer = ringbuf::HeapProd<f32>;

/// Consumer half of the capture ring — held by the pump thread.
pub type CaptureConsumer = ringbuf::HeapCons<f32>;

/// Capacity: 2^20 = 1 048 576 f32 samples ≈ 21.8 s at 48 kHz. Generous for
/// a pipeline whose pump drains continuously; protects against scheduler
/// stalls without meaningful memory cost.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair backed by a heap ring buffer.
pub fn create_capture_ring() -> (CaptureProducer, CaptureConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

/// Handle to an active microphone capture stream.
///
/// **Not `Send`** — `cpal::Stream` is bound to its creation thread on
/// Windows/macOS. Create and drop this type on the same OS thread.
pub struct MicCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Shared flag — set to `false` to signal the callback to no-op.
    running: Arc<AtomicBool>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
fn classify_device_error(detail: String) -> KeshraError {
    let lowered = detail.to_ascii_lowercase();
    if lowered.contains("permission") || lowered.contains("denied") || lowered.contains("access") {
        KeshraError::MicPermissionDenied
    } else {
        KeshraError::AudioDevice(detail)
    }
}

/// Average interleaved channels down to one, reusing `out` between calls.
#[cfg(any(feature = "audio-cpal", test))]
fn fold_to_mono(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    out.reserve(interleaved.len() / channels);
    for frame in interleaved.chunks_exact(channels) {
        out.push(frame.iter().sum::<f32>() / channels as f32);
    }
}

impl MicCapture {
    /// Open an input device by preferred name, otherwise fall back to the
    /// default input device and then the first available device.
    ///
    /// The callback downmixes multi-channel input to mono and pushes f32
    /// samples at the device's native rate into `producer`.
    ///
    /// # Errors
    /// - `KeshraError::NoInputDevice` when no microphone exists at all.
    /// - `KeshraError::MicPermissionDenied` when the OS refuses access.
    /// - `KeshraError::AudioDevice` / `AudioStream` for other failures.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        mut producer: CaptureProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });

                    if selected_device.is_none() {
                        warn!(
                            "preferred input device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_input_device() {
            default
        } else {
            let mut devices = host
                .input_devices()
                .map_err(|e| classify_device_error(e.to_string()))?;
            let fallback = devices.next().ok_or(KeshraError::NoInputDevice)?;
            warn!("no default input device, falling back to first available input");
            fallback
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| classify_device_error(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        info!(sample_rate, channels, "capture config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running_f32 = Arc::clone(&running);
        let running_i16 = Arc::clone(&running);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let ch = channels as usize;
                let mut mono: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !running_f32.load(Ordering::Relaxed) {
                            return;
                        }
                        let pushed = if ch == 1 {
                            producer.push_slice(data)
                        } else {
                            fold_to_mono(data, ch, &mut mono);
                            producer.push_slice(&mono)
                        };
                        let expected = data.len() / ch;
                        if pushed < expected {
                            warn!("mic ring overrun, lost {} samples", expected - pushed);
                        }
                    },
                    |err| error!("capture stream error: {err}"),
                    None,
                )
            }

            SampleFormat::I16 => {
                let ch = channels as usize;
                let mut wide: Vec<f32> = Vec::new();
                let mut mono: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running_i16.load(Ordering::Relaxed) {
                            return;
                        }
                        wide.clear();
                        wide.extend(data.iter().map(|s| *s as f32 / 32768.0));
                        let pushed = if ch == 1 {
                            producer.push_slice(&wide)
                        } else {
                            fold_to_mono(&wide, ch, &mut mono);
                            producer.push_slice(&mono)
                        };
                        let expected = data.len() / ch;
                        if pushed < expected {
                            warn!("mic ring overrun, lost {} samples", expected - pushed);
                        }
                    },
                    |err| error!("capture stream error: {err}"),
                    None,
                )
            }

            fmt => {
                return Err(KeshraError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => KeshraError::NoInputDevice,
            other => classify_device_error(other.to_string()),
        })?;

        stream
            .play()
            .map_err(|e| KeshraError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Stub when the `audio-cpal` feature is disabled; always fails so
    /// headless builds surface a clean error instead of a silent mic.
    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(
        _producer: CaptureProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(KeshraError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    /// Stop: signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_pair_moves_samples_in_order() {
        let (mut producer, mut consumer) = create_capture_ring();
        let samples: Vec<f32> = (0..100).map(|i| i as f32 * 0.01).collect();
        assert_eq!(producer.push_slice(&samples), samples.len());

        let mut out = vec![0f32; 100];
        assert_eq!(consumer.pop_slice(&mut out), 100);
        assert_eq!(out, samples);
    }

    #[test]
    fn stereo_fold_averages_each_frame() {
        let mut out = Vec::new();
        fold_to_mono(&[0.25, 0.75, -1.0, 1.0], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.0]);

        // A trailing partial frame is dropped, not misread.
        fold_to_mono(&[0.5, 0.5, 0.25], 2, &mut out);
        assert_eq!(out, vec![0.5]);
    }

    #[cfg(not(feature = "audio-cpal"))]
    #[test]
    fn open_without_audio_backend_fails_cleanly() {
        let (producer, _consumer) = create_capture_ring();
        let err = MicCapture::open(producer, Arc::new(AtomicBool::new(true)), None)
            .expect_err("no backend compiled in");
        assert!(matches!(err, KeshraError::AudioStream(_)));
    }

    #[cfg(feature = "audio-cpal")]
    #[test]
    fn permission_wording_maps_to_permission_error() {
        assert!(matches!(
            classify_device_error("Access denied by the OS".into()),
            KeshraError::MicPermissionDenied
        ));
        assert!(matches!(
            classify_device_error("backend exploded".into()),
            KeshraError::AudioDevice(_)
        ));
    }
}
