//! Async inbound dispatch loop.
//!
//! ## Per event
//!
//! ```text
//! Audio        → playback scheduler enqueue
//! Transcript   → turn accumulator append
//! TurnComplete → flush turn to chat history (user first), emit TurnEvent
//! Interrupted  → cancel playback, discard the partial turn
//! Closed       → loop returns with the close reason
//! ```
//!
//! A 25 ms tick drives `PlaybackScheduler::poll`, which is what eventually
//! drops the half-duplex gate after the last chunk finishes rendering.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::channel::ChannelEvent;
use crate::events::TurnEvent;
use crate::history::{HistoryHandle, Role};
use crate::playback::PlaybackScheduler;

use super::transcript::TurnTranscript;

const POLL_TICK: Duration = Duration::from_millis(25);

/// All context the dispatch loop needs, passed as one struct.
pub struct DispatchContext {
    pub events_rx: mpsc::Receiver<ChannelEvent>,
    pub scheduler: PlaybackScheduler,
    pub history: HistoryHandle,
    pub session_id: String,
    pub turn_tx: broadcast::Sender<TurnEvent>,
}

/// Run until the channel closes.
///
/// Returns the close reason: `None` for a clean local close (or the event
/// sender dropping), `Some` when the service ended the channel.
pub async fn run(mut ctx: DispatchContext) -> Option<String> {
    info!(session_id = %ctx.session_id, "dispatch started");

    let mut transcript = TurnTranscript::new();
    let mut tick = tokio::time::interval(POLL_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                ctx.scheduler.poll();
            }
            event = ctx.events_rx.recv() => {
                let Some(event) = event else {
                    debug!("event channel closed, dispatch exiting");
                    ctx.scheduler.interrupt();
                    return None;
                };
                match event {
                    ChannelEvent::Audio(blob) => {
                        ctx.scheduler.enqueue(&blob);
                    }
                    ChannelEvent::Transcript { speaker, text } => {
                        transcript.append(speaker, &text);
                    }
                    ChannelEvent::TurnComplete => {
                        flush_turn(&mut transcript, &ctx);
                    }
                    ChannelEvent::Interrupted => {
                        info!("user barge-in, cancelling playback");
                        ctx.scheduler.interrupt();
                        transcript.clear();
                    }
                    ChannelEvent::Closed { reason } => {
                        info!(reason = ?reason, "channel closed");
                        ctx.scheduler.interrupt();
                        return reason;
                    }
                }
            }
        }
    }
}

/// Commit the accumulated turn: user message first, then the model's, then
/// the TurnEvent. A history failure is logged and the turn is still
/// announced; a failed write never interrupts the audio session.
fn flush_turn(transcript: &mut TurnTranscript, ctx: &DispatchContext) {
    if transcript.is_empty() {
        debug!("turn complete with empty transcript, nothing to commit");
        return;
    }

    let (user, model) = transcript.take();

    {
        let mut history = ctx.history.0.lock();
        if let Some(text) = user.as_deref() {
            if let Err(e) = history.append_message(&ctx.session_id, Role::User, text) {
                warn!(error = %e, "failed to persist user turn");
            }
        }
        if let Some(text) = model.as_deref() {
            if let Err(e) = history.append_message(&ctx.session_id, Role::Model, text) {
                warn!(error = %e, "failed to persist model turn");
            }
        }
    }

    let _ = ctx.turn_tx.send(TurnEvent { user, model });
}
