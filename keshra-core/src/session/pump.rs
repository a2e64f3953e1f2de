//! Blocking outbound pump loop.
//!
//! ## Stages (per iteration)
//!
//! ```text
//! 1. Drain capture ring → raw samples at the device rate
//! 2. Resample to the service rate (16 kHz)
//! 3. Assemble fixed 4096-sample frames
//! 4. Per frame: compute RMS → broadcast VolumeEvent
//! 5. Per frame: half-duplex gate → encode → send to the transport
//! ```
//!
//! The gate is re-checked for every frame: while the assistant is speaking
//! (or before the channel is up) captured frames are metered but never
//! sent, so the model does not hear itself. The whole loop runs in
//! `spawn_blocking`, keeping the async executor free for channel I/O.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::capture::frame::{compute_rms, FrameAssembler, RateConverter};
use crate::capture::{CaptureConsumer, Consumer};
use crate::codec::{encode_frame, EncodedBlob};
use crate::events::VolumeEvent;

/// Chunk size drained from the ring per iteration. 20 ms at 48 kHz.
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty (avoids busy-wait burning a core).
const SLEEP_EMPTY_MS: u64 = 5;

/// Linear gain applied to raw RMS for the UI meter. Speech RMS rarely
/// exceeds ~0.12, so the meter would sit near zero without it.
const METER_GAIN: f32 = 8.0;

/// All context the pump needs, passed as one struct so the closure stays tidy.
pub struct PumpContext {
    pub consumer: CaptureConsumer,
    pub running: Arc<AtomicBool>,
    /// Set once the channel is open; frames captured earlier are metered
    /// but not sent.
    pub connected: Arc<AtomicBool>,
    /// The half-duplex gate, owned by the playback scheduler.
    pub assistant_speaking: Arc<AtomicBool>,
    pub capture_sample_rate: u32,
    pub target_sample_rate: u32,
    pub frames_tx: mpsc::Sender<EncodedBlob>,
    pub volume_tx: broadcast::Sender<VolumeEvent>,
    pub volume_seq: Arc<AtomicU64>,
}

/// Run the blocking pump until `ctx.running` becomes false.
pub fn run(mut ctx: PumpContext) {
    info!("pump started");

    let mut converter = match RateConverter::new(
        ctx.capture_sample_rate,
        ctx.target_sample_rate,
        DRAIN_CHUNK,
    ) {
        Ok(r) => r,
        Err(e) => {
            error!("failed to create resampler: {e}");
            return;
        }
    };

    let mut assembler = FrameAssembler::new(ctx.target_sample_rate);
    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut sent = 0u64;
    let mut gated = 0u64;

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            std::thread::sleep(std::time::Duration::from_millis(SLEEP_EMPTY_MS));
            continue;
        }

        let resampled = converter.convert(&raw[..n]);
        if resampled.is_empty() {
            // Partial block, waiting for more input before rubato can run
            continue;
        }

        for frame in assembler.push(&resampled) {
            let level = (compute_rms(&frame.samples) * METER_GAIN).clamp(0.0, 1.0);
            let seq = ctx.volume_seq.fetch_add(1, Ordering::Relaxed);
            let _ = ctx.volume_tx.send(VolumeEvent { seq, level });

            // Gate re-checked per frame: playback state may have changed
            // since the previous one.
            if ctx.assistant_speaking.load(Ordering::Acquire)
                || !ctx.connected.load(Ordering::Acquire)
            {
                gated += 1;
                continue;
            }

            let blob = encode_frame(&frame.samples, frame.sample_rate);
            match ctx.frames_tx.try_send(blob) {
                Ok(()) => sent += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("transport backlog: dropped one outbound frame");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("frame channel closed, pump exiting");
                    ctx.running.store(false, Ordering::Release);
                    break;
                }
            }
        }
    }

    info!(sent, gated, "pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;
    use std::time::{Duration, Instant};

    use crate::capture::{create_capture_ring, Producer};
    use crate::capture::frame::FRAME_SAMPLES;

    struct Pump {
        running: Arc<AtomicBool>,
        frames_rx: mpsc::Receiver<EncodedBlob>,
        volume_rx: broadcast::Receiver<VolumeEvent>,
        handle: thread::JoinHandle<()>,
    }

    fn start_pump(samples: &[f32]) -> Pump {
        start_pump_with(samples, true, false)
    }

    fn start_pump_with(samples: &[f32], connected: bool, speaking: bool) -> Pump {
        let (mut producer, consumer) = create_capture_ring();
        assert_eq!(producer.push_slice(samples), samples.len());

        let running = Arc::new(AtomicBool::new(true));
        let connected = Arc::new(AtomicBool::new(connected));
        let speaking = Arc::new(AtomicBool::new(speaking));
        let (frames_tx, frames_rx) = mpsc::channel(32);
        let (volume_tx, volume_rx) = broadcast::channel(64);

        let ctx = PumpContext {
            consumer,
            running: Arc::clone(&running),
            connected,
            assistant_speaking: speaking,
            capture_sample_rate: 16_000,
            target_sample_rate: 16_000,
            frames_tx,
            volume_tx,
            volume_seq: Arc::new(AtomicU64::new(0)),
        };

        let handle = thread::spawn(move || run(ctx));
        Pump {
            running,
            frames_rx,
            volume_rx,
            handle,
        }
    }

    fn wait_for_frame(rx: &mut mpsc::Receiver<EncodedBlob>, timeout: Duration) -> EncodedBlob {
        let start = Instant::now();
        loop {
            match rx.try_recv() {
                Ok(blob) => return blob,
                Err(_) => {
                    if start.elapsed() >= timeout {
                        panic!("timed out waiting for an outbound frame");
                    }
                    thread::sleep(Duration::from_millis(5));
                }
            }
        }
    }

    #[test]
    fn emits_encoded_frames_and_volume_events() {
        let mut pump = start_pump(&vec![0.1f32; FRAME_SAMPLES]);

        let blob = wait_for_frame(&mut pump.frames_rx, Duration::from_secs(1));
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
        let decoded = crate::codec::decode_frame(&blob.data).unwrap();
        assert_eq!(decoded.len(), FRAME_SAMPLES);

        pump.running.store(false, Ordering::SeqCst);
        pump.handle.join().expect("pump thread panicked");

        let volume = pump.volume_rx.try_recv().expect("expected a volume event");
        assert_eq!(volume.seq, 0);
        assert!(volume.level > 0.0 && volume.level <= 1.0);
    }

    #[test]
    fn gate_suppresses_frames_while_assistant_speaks() {
        let mut pump = start_pump_with(&vec![0.1f32; FRAME_SAMPLES * 2], true, true);

        // Give the pump time to chew through both frames.
        thread::sleep(Duration::from_millis(100));
        pump.running.store(false, Ordering::SeqCst);
        pump.handle.join().expect("pump thread panicked");

        assert!(pump.frames_rx.try_recv().is_err(), "gated frames were sent");
        // Metering continues while gated.
        assert!(pump.volume_rx.try_recv().is_ok());
    }

    #[test]
    fn frames_are_held_until_the_channel_connects() {
        let mut pump = start_pump_with(&vec![0.1f32; FRAME_SAMPLES], false, false);

        thread::sleep(Duration::from_millis(100));
        assert!(pump.frames_rx.try_recv().is_err());

        pump.running.store(false, Ordering::SeqCst);
        pump.handle.join().expect("pump thread panicked");
    }

    #[test]
    fn loud_input_clamps_meter_to_one() {
        let mut pump = start_pump(&vec![1.0f32; FRAME_SAMPLES]);

        let _ = wait_for_frame(&mut pump.frames_rx, Duration::from_secs(1));
        pump.running.store(false, Ordering::SeqCst);
        pump.handle.join().expect("pump thread panicked");

        let volume = pump.volume_rx.try_recv().unwrap();
        assert!((volume.level - 1.0).abs() < 1e-6);
    }
}
