//! Keshra terminal voice client.
//!
//! Connects a `VoiceSession` to the real microphone, speakers and the
//! hosted voice service, prints turn transcripts as they commit and keeps
//! the chat history in a local SQLite database. Ctrl-C disconnects.

mod settings;
mod storage;

use std::sync::Arc;

use anyhow::Context;
use keshra_core::{
    ChannelConfig, HistoryHandle, SessionConfig, VoiceSession, WsTransport,
    INBOUND_SAMPLE_RATE, OUTBOUND_SAMPLE_RATE,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use settings::{default_history_path, default_settings_path, load_settings, save_settings};
use storage::{DisabledHistory, SqliteHistory};

fn new_session_id() -> String {
    format!("session-{}", chrono::Utc::now().timestamp_millis())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings_path = default_settings_path();
    let mut settings = load_settings(&settings_path);
    settings.apply_env_overrides();
    if let Err(e) = save_settings(&settings_path, &settings) {
        warn!(error = %e, "could not persist settings");
    }

    if settings.api_key.is_none() {
        warn!("no API key configured (KESHRA_API_KEY or settings.json); connecting anonymously");
    }

    let history = if settings.history_enabled {
        let store = SqliteHistory::new(default_history_path())
            .context("opening chat history database")?;
        HistoryHandle::new(store)
    } else {
        HistoryHandle::new(DisabledHistory)
    };

    let session_id = new_session_id();
    let config = SessionConfig {
        session_id: session_id.clone(),
        channel: ChannelConfig {
            url: settings.service_url.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            voice: settings.voice.clone(),
            outbound_sample_rate: OUTBOUND_SAMPLE_RATE,
            inbound_sample_rate: INBOUND_SAMPLE_RATE,
        },
        preferred_input_device: settings.preferred_input_device.clone(),
    };

    let session = VoiceSession::new(config, Arc::new(WsTransport::new()), history);

    let mut status_rx = session.subscribe_status();
    tokio::spawn(async move {
        while let Ok(event) = status_rx.recv().await {
            match event.detail {
                Some(detail) => info!(status = ?event.status, %detail, "session status"),
                None => info!(status = ?event.status, "session status"),
            }
        }
    });

    let mut turn_rx = session.subscribe_turns();
    tokio::spawn(async move {
        while let Ok(turn) = turn_rx.recv().await {
            if let Some(user) = turn.user {
                println!("you:    {user}");
            }
            if let Some(model) = turn.model {
                println!("keshra: {model}");
            }
        }
    });

    for device in keshra_core::capture::device::list_input_devices() {
        info!(
            name = %device.name,
            default = device.is_default,
            monitor_like = device.is_monitor_like,
            "input device"
        );
    }

    info!(%session_id, url = %settings.service_url, "connecting");
    session.connect().await.context("establishing session")?;
    info!("connected; speak into the microphone, Ctrl-C to hang up");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("disconnecting");
    session.disconnect();

    Ok(())
}
