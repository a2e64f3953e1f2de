//! cpal output device wiring for the playback scheduler.
//!
//! The output callback is the real-time consumer: it pulls queued samples
//! from an SPSC ring, zero-fills any shortfall and counts every rendered
//! sample. That counter is the production [`PlaybackClock`] — scheduled
//! start times are measured in the same units the device actually renders.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send`, so the stream lives on a dedicated OS thread
//! that opens it, reports readiness over a channel and then parks until
//! shutdown.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use ringbuf::{traits::Split, HeapRb};
use tracing::{info, warn};

use crate::error::{KeshraError, Result};

use super::{PlaybackClock, PlaybackSink};

use ringbuf::traits::Producer;

/// Ring capacity: 2^19 = 524 288 f32 samples ≈ 21.8 s at 24 kHz.
const OUTPUT_RING_CAPACITY: usize = 1 << 19;

/// Clock derived from the output device's rendered-sample counter.
#[derive(Clone)]
pub struct DeviceClock {
    rendered: Arc<AtomicU64>,
    sample_rate: u32,
}

impl PlaybackClock for DeviceClock {
    fn now(&self) -> f64 {
        self.rendered.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }
}

/// Sink half: pushes decoded samples into the output ring.
pub struct RingSink {
    producer: ringbuf::HeapProd<f32>,
    flush: Arc<AtomicBool>,
}

impl PlaybackSink for RingSink {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        let written = self.producer.push_slice(samples);
        if written < samples.len() {
            warn!(
                "output ring full: dropped {} samples",
                samples.len() - written
            );
        }
        Ok(())
    }

    fn discard_queued(&mut self) {
        // The consumer half lives on the device thread; the callback
        // observes this flag and clears the ring itself.
        self.flush.store(true, Ordering::Release);
    }
}

/// Handle to an open output device.
///
/// Dropping without `close()` leaks the device thread until process exit;
/// the session controller always closes explicitly during teardown.
pub struct DeviceOutput {
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl DeviceOutput {
    /// Open the default output device at `sample_rate` mono.
    ///
    /// Returns the control handle plus the sink and clock to hand to a
    /// [`super::PlaybackScheduler`].
    ///
    /// # Errors
    /// `KeshraError::AudioDevice` when no output device exists or the
    /// stream cannot be built at the requested rate.
    #[cfg(feature = "audio-cpal")]
    pub fn open(sample_rate: u32) -> Result<(Self, RingSink, DeviceClock)> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
        use ringbuf::traits::Consumer as _;

        let (producer, mut consumer) = HeapRb::<f32>::new(OUTPUT_RING_CAPACITY).split();
        let rendered = Arc::new(AtomicU64::new(0));
        let flush = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        let sink = RingSink {
            producer,
            flush: Arc::clone(&flush),
        };
        let clock = DeviceClock {
            rendered: Arc::clone(&rendered),
            sample_rate,
        };

        let (ack_tx, ack_rx) = std::sync::mpsc::channel::<Result<()>>();
        let thread_running = Arc::clone(&running);
        let cb_rendered = Arc::clone(&rendered);
        let cb_flush = Arc::clone(&flush);

        let thread = std::thread::Builder::new()
            .name("keshra-output".into())
            .spawn(move || {
                let open_result = (|| -> Result<cpal::Stream> {
                    let host = cpal::default_host();
                    let device = host
                        .default_output_device()
                        .ok_or_else(|| KeshraError::AudioDevice("no output device".into()))?;

                    info!(
                        device = device.name().unwrap_or_default().as_str(),
                        sample_rate, "opening output device"
                    );

                    let config = cpal::StreamConfig {
                        channels: 1,
                        sample_rate: cpal::SampleRate(sample_rate),
                        buffer_size: cpal::BufferSize::Default,
                    };

                    let stream = device
                        .build_output_stream(
                            &config,
                            move |data: &mut [f32], _info| {
                                if cb_flush.swap(false, Ordering::AcqRel) {
                                    consumer.clear();
                                }
                                let n = consumer.pop_slice(data);
                                data[n..].fill(0.0);
                                cb_rendered.fetch_add(data.len() as u64, Ordering::AcqRel);
                            },
                            |err| warn!("output stream error: {err}"),
                            None,
                        )
                        .map_err(|e| KeshraError::AudioStream(e.to_string()))?;

                    stream
                        .play()
                        .map_err(|e| KeshraError::AudioStream(e.to_string()))?;
                    Ok(stream)
                })();

                match open_result {
                    Ok(stream) => {
                        let _ = ack_tx.send(Ok(()));
                        // Stream must be dropped on this thread; park until
                        // teardown asks for it.
                        while thread_running.load(Ordering::Acquire) {
                            std::thread::sleep(std::time::Duration::from_millis(20));
                        }
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ack_tx.send(Err(e));
                    }
                }
            })
            .map_err(KeshraError::Io)?;

        match ack_rx.recv() {
            Ok(Ok(())) => Ok((
                Self {
                    running,
                    thread: Some(thread),
                },
                sink,
                clock,
            )),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(KeshraError::AudioStream(
                    "output thread exited before ack".into(),
                ))
            }
        }
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(_sample_rate: u32) -> Result<(Self, RingSink, DeviceClock)> {
        Err(KeshraError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    /// Stop rendering and release the device. Idempotent.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
impl DeviceOutput {
    /// Handle with no device thread behind it, for lifecycle tests.
    pub(crate) fn idle() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}
