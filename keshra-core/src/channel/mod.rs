//! Duplex channel abstraction for the voice streaming service.
//!
//! The `VoiceTransport` trait is the seam between the session controller
//! and any concrete wire protocol. The production implementation is the
//! JSON-over-WebSocket transport in [`ws`]; tests substitute a scripted
//! transport driving the same channels.
//!
//! Data flow once a channel is open:
//!
//! ```text
//! outbound:  pump ──mpsc<EncodedBlob>──► transport ──► service
//! inbound:   service ──► transport ──mpsc<ChannelEvent>──► dispatch loop
//! ```
//!
//! The transport owns its own send/receive tasks; the controller only keeps
//! a [`ChannelHandle`] to request closure.

pub mod ws;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::codec::EncodedBlob;
use crate::error::Result;

/// Which side of the conversation a transcript span belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Model,
}

/// One inbound message from the voice streaming service.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// One chunk of synthesized speech audio.
    Audio(EncodedBlob),
    /// A partial transcript span for the current turn.
    Transcript { speaker: Speaker, text: String },
    /// The current conversational turn is complete.
    TurnComplete,
    /// The user barged in; all pending playback must be cancelled.
    Interrupted,
    /// The channel closed. `reason` is `None` for a clean local close.
    Closed { reason: Option<String> },
}

/// Connection parameters for one voice channel.
///
/// The API key is an explicitly injected value — resolution from the
/// environment or elsewhere is the host's concern.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    /// Sample rate of outbound microphone frames (Hz).
    pub outbound_sample_rate: u32,
    /// Sample rate the service synthesizes speech at (Hz).
    pub inbound_sample_rate: u32,
}

/// Handle to an open duplex channel.
///
/// At most one handle is live per logical voice session; reconnecting
/// means closing the previous handle first.
#[derive(Debug)]
pub struct ChannelHandle {
    shutdown: Option<oneshot::Sender<()>>,
}

impl ChannelHandle {
    pub fn new(shutdown: oneshot::Sender<()>) -> Self {
        Self {
            shutdown: Some(shutdown),
        }
    }

    /// Request channel closure. Idempotent and best-effort: if the
    /// transport tasks already ended, there is nothing left to signal.
    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Contract for duplex channel implementations.
#[async_trait]
pub trait VoiceTransport: Send + Sync + 'static {
    /// Open the channel. Resolves once the channel is established — the
    /// controller treats resolution as the channel-open event.
    ///
    /// `frames` feeds outbound audio; the transport must drain it until
    /// closure. Inbound service messages are delivered through `events`;
    /// the transport sends a final `ChannelEvent::Closed` when the channel
    /// ends for any reason, then drops the sender.
    ///
    /// # Errors
    /// Returns `KeshraError::Channel` when the channel cannot be
    /// established.
    async fn open(
        &self,
        config: &ChannelConfig,
        frames: mpsc::Receiver<EncodedBlob>,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Result<ChannelHandle>;
}
