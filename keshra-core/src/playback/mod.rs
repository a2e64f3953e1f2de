//! Playback scheduling for inbound synthesized speech.
//!
//! The service streams speech in chunks that must play gaplessly: each
//! chunk is scheduled at `max(next_start, clock_now)` against a monotonic
//! audio clock, so back-to-back chunks butt up exactly and a chunk
//! arriving after a silence starts immediately.
//!
//! ```text
//! audioChunk ─► decode ─► schedule(start) ─► sink.write ─► device
//!                              │
//!                         pending units ─► poll() retires at end time
//! ```
//!
//! The scheduler never touches the device directly. The clock and sink
//! are trait objects: production wires them to the cpal output stream in
//! [`output`], tests drive a manual clock and an in-memory sink.

pub mod output;

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::{debug, warn};

use crate::codec::{self, EncodedBlob};
use crate::error::Result;

/// Monotonic playback clock, in seconds of rendered audio.
///
/// Production clocks derive from the output device's rendered-sample
/// counter, so scheduled times line up with what the listener hears.
pub trait PlaybackClock: Send + 'static {
    fn now(&self) -> f64;
}

/// Destination for decoded playback samples.
pub trait PlaybackSink: Send + 'static {
    /// Queue samples for rendering after everything already queued.
    ///
    /// # Errors
    /// Returns an error when the device rejects the write; the scheduler
    /// logs and drops the chunk.
    fn write(&mut self, samples: &[f32]) -> Result<()>;

    /// Drop all queued-but-unrendered audio immediately.
    fn discard_queued(&mut self);
}

/// One scheduled chunk, tracked until its scheduled end passes.
#[derive(Debug, Clone, Copy)]
struct PlaybackUnit {
    id: u64,
    start: f64,
    duration: f64,
}

impl PlaybackUnit {
    fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Orders inbound speech chunks on the playback clock.
///
/// Not thread-safe by itself; the dispatch loop owns it. The `speaking`
/// flag is the shared view other threads read (the pump's half-duplex
/// gate).
pub struct PlaybackScheduler {
    clock: Box<dyn PlaybackClock>,
    sink: Box<dyn PlaybackSink>,
    sample_rate: u32,
    pending: VecDeque<PlaybackUnit>,
    next_start: f64,
    next_id: u64,
    speaking: Arc<AtomicBool>,
}

impl PlaybackScheduler {
    /// `speaking` is shared with the capture pump, whose half-duplex gate
    /// reads it; the scheduler is its only writer.
    pub fn new(
        clock: Box<dyn PlaybackClock>,
        sink: Box<dyn PlaybackSink>,
        sample_rate: u32,
        speaking: Arc<AtomicBool>,
    ) -> Self {
        speaking.store(false, Ordering::Release);
        Self {
            clock,
            sink,
            sample_rate,
            pending: VecDeque::new(),
            next_start: 0.0,
            next_id: 0,
            speaking,
        }
    }

    /// Shared flag that is `true` while any scheduled audio is pending.
    pub fn speaking_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.speaking)
    }

    pub fn is_speaking(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Decode and schedule one inbound chunk.
    ///
    /// A chunk that fails to decode is dropped with a warning; one bad
    /// chunk never takes the session down. Empty chunks are ignored.
    pub fn enqueue(&mut self, blob: &EncodedBlob) {
        let samples = match codec::decode_frame(&blob.data) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, "dropping undecodable audio chunk");
                return;
            }
        };
        if samples.is_empty() {
            return;
        }

        let duration = samples.len() as f64 / self.sample_rate as f64;
        let now = self.clock.now();
        let start = self.next_start.max(now);

        if let Err(e) = self.sink.write(&samples) {
            warn!(error = %e, "playback sink rejected chunk");
            return;
        }

        let unit = PlaybackUnit {
            id: self.next_id,
            start,
            duration,
        };
        self.next_id += 1;
        self.next_start = unit.end();
        debug!(
            id = unit.id,
            start = format_args!("{start:.3}"),
            duration = format_args!("{duration:.3}"),
            "scheduled audio chunk"
        );
        self.pending.push_back(unit);
        self.speaking.store(true, Ordering::Release);
    }

    /// Retire units whose scheduled end has passed on the clock.
    ///
    /// Call periodically (the dispatch loop ticks every 25 ms); the
    /// speaking flag drops only here, once the last unit finishes.
    pub fn poll(&mut self) {
        let now = self.clock.now();
        while let Some(front) = self.pending.front() {
            if front.end() <= now {
                debug!(id = front.id, "audio chunk finished");
                self.pending.pop_front();
            } else {
                break;
            }
        }
        if self.pending.is_empty() {
            self.speaking.store(false, Ordering::Release);
        }
    }

    /// Cancel all pending audio: flush the sink, forget every unit and
    /// rebase the schedule at the current clock so the next chunk starts
    /// immediately.
    pub fn interrupt(&mut self) {
        let dropped = self.pending.len();
        self.sink.discard_queued();
        self.pending.clear();
        self.next_start = self.clock.now();
        self.speaking.store(false, Ordering::Release);
        if dropped > 0 {
            debug!(dropped, "playback interrupted");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{ManualClock, MemorySink};
    use super::*;
    use crate::codec::encode_frame;

    const RATE: u32 = 24_000;

    fn chunk(samples: usize) -> EncodedBlob {
        encode_frame(&vec![0.25f32; samples], RATE)
    }

    fn scheduler(clock: &ManualClock, sink: &MemorySink) -> PlaybackScheduler {
        PlaybackScheduler::new(
            Box::new(clock.clone()),
            Box::new(sink.clone()),
            RATE,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn back_to_back_chunks_schedule_gaplessly() {
        let clock = ManualClock::default();
        let sink = MemorySink::default();
        let mut sched = scheduler(&clock, &sink);

        // Two 0.5 s chunks arriving at t=0 stack up without a gap.
        sched.enqueue(&chunk(12_000));
        sched.enqueue(&chunk(12_000));

        assert!(sched.is_speaking());
        assert_eq!(sched.pending.len(), 2);
        assert!((sched.pending[0].start - 0.0).abs() < 1e-9);
        assert!((sched.pending[1].start - 0.5).abs() < 1e-9);
        assert!((sched.next_start - 1.0).abs() < 1e-9);
        assert_eq!(sink.written.lock().len(), 24_000);
    }

    #[test]
    fn chunk_after_silence_starts_at_clock_now() {
        let clock = ManualClock::default();
        let sink = MemorySink::default();
        let mut sched = scheduler(&clock, &sink);

        sched.enqueue(&chunk(12_000));
        clock.advance_to(3.0);
        sched.poll();
        assert!(!sched.is_speaking());

        sched.enqueue(&chunk(12_000));
        assert!((sched.pending[0].start - 3.0).abs() < 1e-9);
        assert!((sched.next_start - 3.5).abs() < 1e-9);
    }

    #[test]
    fn poll_retires_only_finished_units() {
        let clock = ManualClock::default();
        let sink = MemorySink::default();
        let mut sched = scheduler(&clock, &sink);

        sched.enqueue(&chunk(12_000)); // [0.0, 0.5)
        sched.enqueue(&chunk(12_000)); // [0.5, 1.0)

        clock.advance_to(0.6);
        sched.poll();
        assert!(sched.is_speaking());
        assert_eq!(sched.pending.len(), 1);
        assert!(sched.speaking_flag().load(Ordering::Acquire));

        clock.advance_to(1.0);
        sched.poll();
        assert!(!sched.is_speaking());
        assert!(!sched.speaking_flag().load(Ordering::Acquire));
    }

    #[test]
    fn interrupt_clears_pending_and_rebases_schedule() {
        let clock = ManualClock::default();
        let sink = MemorySink::default();
        let mut sched = scheduler(&clock, &sink);

        sched.enqueue(&chunk(12_000));
        sched.enqueue(&chunk(12_000));
        clock.advance_to(0.2);

        sched.interrupt();
        assert!(!sched.is_speaking());
        assert!(!sched.speaking_flag().load(Ordering::Acquire));
        assert_eq!(*sink.discards.lock(), 1);

        // Next chunk starts at the interrupt time, not at the old tail.
        sched.enqueue(&chunk(12_000));
        assert!((sched.pending[0].start - 0.2).abs() < 1e-9);
    }

    #[test]
    fn undecodable_chunk_is_dropped_without_state_change() {
        let clock = ManualClock::default();
        let sink = MemorySink::default();
        let mut sched = scheduler(&clock, &sink);

        sched.enqueue(&EncodedBlob {
            data: "!!!not-base64!!!".into(),
            mime_type: "audio/pcm;rate=24000".into(),
        });

        assert!(!sched.is_speaking());
        assert!(sink.written.lock().is_empty());
        assert!((sched.next_start - 0.0).abs() < 1e-9);
    }

    #[test]
    fn empty_chunk_is_ignored() {
        let clock = ManualClock::default();
        let sink = MemorySink::default();
        let mut sched = scheduler(&clock, &sink);

        sched.enqueue(&chunk(0));
        assert!(!sched.is_speaking());
    }
}
