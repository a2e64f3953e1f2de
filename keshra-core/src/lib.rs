//! # keshra-core
//!
//! Real-time voice session engine for the Keshra conversational client.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → MicCapture → SPSC RingBuffer → Pump(spawn_blocking)
//!                                                  │ encode PCM16
//!                                           VoiceTransport (duplex)
//!                                                  │ decode PCM16
//!             Speakers ← DeviceOutput ← PlaybackScheduler ← Dispatch
//! ```
//!
//! The audio callbacks are zero-alloc. All heap work happens on the pump
//! thread and the dispatch task. `VoiceSession` ties the halves together
//! and owns the connect/disconnect lifecycle.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod capture;
pub mod channel;
pub mod codec;
pub mod error;
pub mod events;
pub mod history;
pub mod playback;
pub mod session;

// Convenience re-exports for downstream crates
pub use channel::{ChannelConfig, ChannelEvent, Speaker, VoiceTransport};
pub use channel::ws::WsTransport;
pub use codec::{decode_frame, encode_frame, AudioFrame, EncodedBlob};
pub use error::{KeshraError, Result};
pub use events::{SessionStatus, SessionStatusEvent, TurnEvent, VolumeEvent};
pub use history::{ChatHistory, HistoryHandle, MemoryHistory, Role};
pub use session::{
    AccessPolicy, AllowAll, SessionConfig, VoiceSession, INBOUND_SAMPLE_RATE,
    OUTBOUND_SAMPLE_RATE,
};
