//! Voice session lifecycle controller.
//!
//! One `VoiceSession` owns the full duplex pipeline for one conversation:
//!
//! ```text
//!                ┌── capture thread (spawn_blocking) ──┐
//!  microphone ──►│ MicCapture ─► ring ─► pump          │──► frames mpsc
//!                └──────────────────────────────────────┘        │
//!                                                         VoiceTransport
//!                ┌── dispatch task (async) ─────────────┐        │
//!  speakers   ◄──│ DeviceOutput ◄─ PlaybackScheduler    │◄── events mpsc
//!                └──────────────────────────────────────┘
//! ```
//!
//! Status transitions: `Disconnected → Connecting → Connected →
//! Disconnected`, with `Error` reachable from any point. Teardown is
//! idempotent and always runs in the same order: abort the dispatch task,
//! close the channel, stop the microphone, close the output device, drop
//! the half-duplex gate.
//!
//! A session epoch counter invalidates stale async work: every connect and
//! every teardown bumps it. A connect that loses the race to a disconnect
//! discards its freshly opened resources instead of installing them, and
//! the dispatch supervisor only acts on its outcome when the epoch it was
//! started under is still current. The gate itself is allocated per
//! connection, so a torn-down pipeline can never mute its replacement.

pub mod dispatch;
pub mod pump;
pub mod transcript;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

use crate::capture::{create_capture_ring, MicCapture};
use crate::channel::{ChannelConfig, ChannelHandle, VoiceTransport};
use crate::error::{KeshraError, Result};
use crate::events::{SessionStatus, SessionStatusEvent, TurnEvent, VolumeEvent};
use crate::history::HistoryHandle;
use crate::playback::output::DeviceOutput;
use crate::playback::PlaybackScheduler;

/// Outbound frame rate expected by the service (Hz).
pub const OUTBOUND_SAMPLE_RATE: u32 = 16_000;

/// Rate the service synthesizes speech at (Hz).
pub const INBOUND_SAMPLE_RATE: u32 = 24_000;

const FRAME_QUEUE: usize = 32;
const EVENT_QUEUE: usize = 64;
const BROADCAST_CAPACITY: usize = 256;

/// Gate consulted before any device or channel is touched.
///
/// Hosts with an entitlement or subscription model implement this; the
/// default [`AllowAll`] admits everyone.
pub trait AccessPolicy: Send + Sync + 'static {
    /// # Errors
    /// Returns `KeshraError::AuthorizationRequired` (or any other error)
    /// to veto the connection.
    fn authorize(&self) -> Result<()>;
}

/// Policy that admits every connection attempt.
#[derive(Debug, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn authorize(&self) -> Result<()> {
        Ok(())
    }
}

/// Everything needed to establish one voice session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Chat history key all committed turns are filed under.
    pub session_id: String,
    pub channel: ChannelConfig,
    /// Input device by name; `None` uses the system default.
    pub preferred_input_device: Option<String>,
}

/// Live resources for the current connection, torn down as a unit.
struct ActiveParts {
    channel: ChannelHandle,
    capture_running: Arc<AtomicBool>,
    output: DeviceOutput,
    /// This connection's half-duplex gate, shared by its pump and scheduler.
    speaking: Arc<AtomicBool>,
    /// The dispatch supervisor task for this connection.
    dispatch: tokio::task::JoinHandle<()>,
}

impl ActiveParts {
    fn release(&mut self) {
        self.dispatch.abort();
        self.channel.close();
        self.capture_running.store(false, Ordering::Release);
        self.output.close();
        self.speaking.store(false, Ordering::Release);
    }
}

struct SessionInner {
    config: SessionConfig,
    transport: Arc<dyn VoiceTransport>,
    history: HistoryHandle,
    policy: Box<dyn AccessPolicy>,

    status: Mutex<SessionStatus>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    volume_tx: broadcast::Sender<VolumeEvent>,
    turn_tx: broadcast::Sender<TurnEvent>,
    volume_seq: Arc<AtomicU64>,

    epoch: AtomicU64,
    connected: Arc<AtomicBool>,
    active: Mutex<Option<ActiveParts>>,
}

impl SessionInner {
    fn set_status(&self, next: SessionStatus, detail: Option<String>) {
        let mut status = self.status.lock();
        if *status == next && detail.is_none() {
            return;
        }
        *status = next;
        let _ = self.status_tx.send(SessionStatusEvent {
            status: next,
            detail,
        });
    }

    /// Release every live resource in teardown order. Idempotent; does not
    /// touch the published status.
    fn teardown_resources(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::Release);

        if let Some(mut parts) = self.active.lock().take() {
            parts.release();
            info!("session resources released");
        }
    }

    /// Install the freshly opened resources, but only if no disconnect or
    /// newer connect has bumped the epoch since `my_epoch` was read. On a
    /// stale epoch the parts come back to the caller for release.
    fn commit_active(
        &self,
        my_epoch: u64,
        parts: ActiveParts,
    ) -> std::result::Result<(), ActiveParts> {
        let mut active = self.active.lock();
        if self.epoch.load(Ordering::SeqCst) != my_epoch {
            return Err(parts);
        }

        *active = Some(parts);
        self.connected.store(true, Ordering::Release);
        self.set_status(SessionStatus::Connected, None);
        Ok(())
    }

    fn fail(&self, error: &KeshraError) {
        self.teardown_resources();
        self.set_status(SessionStatus::Error, Some(error.to_string()));
    }
}

/// Handle to one conversational voice session.
///
/// Cheap to clone; all clones share the same underlying session.
#[derive(Clone)]
pub struct VoiceSession {
    inner: Arc<SessionInner>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn VoiceTransport>,
        history: HistoryHandle,
    ) -> Self {
        Self::with_policy(config, transport, history, Box::new(AllowAll))
    }

    pub fn with_policy(
        config: SessionConfig,
        transport: Arc<dyn VoiceTransport>,
        history: HistoryHandle,
        policy: Box<dyn AccessPolicy>,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (volume_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (turn_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        Self {
            inner: Arc::new(SessionInner {
                config,
                transport,
                history,
                policy,
                status: Mutex::new(SessionStatus::Disconnected),
                status_tx,
                volume_tx,
                turn_tx,
                volume_seq: Arc::new(AtomicU64::new(0)),
                epoch: AtomicU64::new(0),
                connected: Arc::new(AtomicBool::new(false)),
                active: Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.inner.status.lock()
    }

    /// True while scheduled assistant audio is still rendering.
    pub fn is_assistant_speaking(&self) -> bool {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|parts| parts.speaking.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.inner.status_tx.subscribe()
    }

    pub fn subscribe_volume(&self) -> broadcast::Receiver<VolumeEvent> {
        self.inner.volume_tx.subscribe()
    }

    pub fn subscribe_turns(&self) -> broadcast::Receiver<TurnEvent> {
        self.inner.turn_tx.subscribe()
    }

    /// Establish the session: authorize, open the microphone, open the
    /// output device, then open the voice channel. Any prior connection is
    /// torn down first, so calling this on a live session reconnects.
    ///
    /// # Errors
    /// The first failing stage aborts the attempt, releases whatever was
    /// already opened and leaves the session in `Error`. Microphone
    /// problems surface before channel problems; use
    /// [`KeshraError::is_device_unavailable`] to distinguish hardware
    /// failures from authorization or network ones.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;

        inner.teardown_resources();
        inner.set_status(SessionStatus::Disconnected, None);

        if let Err(e) = inner.policy.authorize() {
            warn!(error = %e, "connection vetoed by access policy");
            inner.set_status(SessionStatus::Error, Some(e.to_string()));
            return Err(e);
        }

        inner.set_status(SessionStatus::Connecting, None);
        let my_epoch = inner.epoch.load(Ordering::SeqCst);

        // The half-duplex gate lives and dies with this connection.
        let speaking = Arc::new(AtomicBool::new(false));

        // Stage 1: microphone. The capture thread owns the (!Send) cpal
        // stream for its whole life and runs the pump loop on it.
        let (producer, consumer) = create_capture_ring();
        let capture_running = Arc::new(AtomicBool::new(true));
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE);
        let (mic_ack_tx, mic_ack_rx) = oneshot::channel::<Result<u32>>();

        let pump_running = Arc::clone(&capture_running);
        let pump_connected = Arc::clone(&inner.connected);
        let pump_speaking = Arc::clone(&speaking);
        let pump_volume_tx = inner.volume_tx.clone();
        let pump_volume_seq = Arc::clone(&inner.volume_seq);
        let preferred = inner.config.preferred_input_device.clone();

        tokio::task::spawn_blocking(move || {
            let mic = match MicCapture::open(producer, Arc::clone(&pump_running), preferred.as_deref())
            {
                Ok(mic) => {
                    let _ = mic_ack_tx.send(Ok(mic.sample_rate));
                    mic
                }
                Err(e) => {
                    let _ = mic_ack_tx.send(Err(e));
                    return;
                }
            };

            pump::run(pump::PumpContext {
                consumer,
                running: pump_running,
                connected: pump_connected,
                assistant_speaking: pump_speaking,
                capture_sample_rate: mic.sample_rate,
                target_sample_rate: OUTBOUND_SAMPLE_RATE,
                frames_tx,
                volume_tx: pump_volume_tx,
                volume_seq: pump_volume_seq,
            });

            // Stream must drop on this thread.
            mic.stop();
        });

        match mic_ack_rx.await {
            Ok(Ok(rate)) => info!(capture_rate = rate, "microphone ready"),
            Ok(Err(e)) => {
                inner.fail(&e);
                return Err(e);
            }
            Err(_) => {
                let e = KeshraError::AudioStream("capture thread exited before ack".into());
                inner.fail(&e);
                return Err(e);
            }
        }

        // Stage 2: output device and the scheduler on top of it.
        let output_parts =
            tokio::task::spawn_blocking(|| DeviceOutput::open(INBOUND_SAMPLE_RATE)).await;
        let (output, sink, clock) = match output_parts {
            Ok(Ok(parts)) => parts,
            Ok(Err(e)) => {
                capture_running.store(false, Ordering::Release);
                inner.fail(&e);
                return Err(e);
            }
            Err(e) => {
                capture_running.store(false, Ordering::Release);
                let e = KeshraError::AudioStream(format!("output open task failed: {e}"));
                inner.fail(&e);
                return Err(e);
            }
        };

        let scheduler = PlaybackScheduler::new(
            Box::new(clock),
            Box::new(sink),
            INBOUND_SAMPLE_RATE,
            Arc::clone(&speaking),
        );

        // Stage 3: the voice channel.
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let channel = match inner
            .transport
            .open(&inner.config.channel, frames_rx, events_tx)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                capture_running.store(false, Ordering::Release);
                drop(output);
                inner.fail(&e);
                return Err(e);
            }
        };

        // Supervisor: dispatch runs until the channel ends or teardown
        // aborts it. Only the epoch that started it may react to the
        // outcome; a disconnect or a newer connect makes this one a no-op.
        let supervisor = Arc::clone(&self.inner);
        let dispatch = tokio::spawn(async move {
            let reason = dispatch::run(dispatch::DispatchContext {
                events_rx,
                scheduler,
                history: supervisor.history.clone(),
                session_id: supervisor.config.session_id.clone(),
                turn_tx: supervisor.turn_tx.clone(),
            })
            .await;

            if supervisor.epoch.load(Ordering::SeqCst) != my_epoch {
                return;
            }
            match reason {
                Some(reason) => {
                    warn!(%reason, "channel ended unexpectedly");
                    supervisor.fail(&KeshraError::Channel(reason));
                }
                None => {
                    supervisor.teardown_resources();
                    supervisor.set_status(SessionStatus::Disconnected, None);
                }
            }
        });

        let parts = ActiveParts {
            channel,
            capture_running,
            output,
            speaking,
            dispatch,
        };

        // A disconnect may have landed while the stages above were
        // awaiting; in that case it wins and this attempt folds.
        if let Err(mut stale) = inner.commit_active(my_epoch, parts) {
            warn!("connect superseded during device setup, releasing resources");
            stale.release();
            return Err(KeshraError::ConnectSuperseded);
        }

        info!(session_id = %inner.config.session_id, "session connected");
        Ok(())
    }

    /// Tear the session down and land in `Disconnected`. Safe to call at
    /// any time, from any state, any number of times.
    pub fn disconnect(&self) {
        self.inner.teardown_resources();
        self.inner.set_status(SessionStatus::Disconnected, None);
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.teardown_resources();
    }
}
