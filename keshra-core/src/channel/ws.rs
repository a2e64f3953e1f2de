//! WebSocket implementation of [`VoiceTransport`].
//!
//! The service speaks JSON text frames. The first outbound message is a
//! setup declaring model, voice and audio formats; after that the socket
//! carries base64 PCM both ways. The socket is split so sending and
//! receiving run as independent tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::codec::EncodedBlob;
use crate::error::{KeshraError, Result};

use super::{ChannelConfig, ChannelEvent, ChannelHandle, Speaker, VoiceTransport};

/// Messages this client sends to the service.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Setup {
        model: String,
        voice: String,
        input_mime_type: String,
        output_mime_type: String,
    },
    #[serde(rename_all = "camelCase")]
    Audio { data: String, mime_type: String },
}

/// Messages the service sends back.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    AudioChunk { data: String, mime_type: String },
    #[serde(rename_all = "camelCase")]
    PartialTranscript { speaker: Speaker, text: String },
    TurnComplete,
    Interrupted,
}

impl From<ServerMessage> for ChannelEvent {
    fn from(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::AudioChunk { data, mime_type } => {
                ChannelEvent::Audio(EncodedBlob { data, mime_type })
            }
            ServerMessage::PartialTranscript { speaker, text } => {
                ChannelEvent::Transcript { speaker, text }
            }
            ServerMessage::TurnComplete => ChannelEvent::TurnComplete,
            ServerMessage::Interrupted => ChannelEvent::Interrupted,
        }
    }
}

/// Voice channel over a WebSocket connection.
#[derive(Debug, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }

    fn endpoint(config: &ChannelConfig) -> String {
        match &config.api_key {
            Some(key) => {
                // Keys may carry reserved characters; encode them so the
                // query string survives intact.
                let encoded: String =
                    url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
                format!("{}?key={encoded}", config.url)
            }
            None => config.url.clone(),
        }
    }
}

#[async_trait]
impl VoiceTransport for WsTransport {
    async fn open(
        &self,
        config: &ChannelConfig,
        mut frames: mpsc::Receiver<EncodedBlob>,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Result<ChannelHandle> {
        let endpoint = Self::endpoint(config);
        let (stream, _response) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| KeshraError::Channel(format!("connect failed: {e}")))?;
        debug!(url = %config.url, "voice channel connected");

        let (mut sink, mut source) = stream.split();

        let setup = ClientMessage::Setup {
            model: config.model.clone(),
            voice: config.voice.clone(),
            input_mime_type: crate::codec::pcm_mime(config.outbound_sample_rate),
            output_mime_type: crate::codec::pcm_mime(config.inbound_sample_rate),
        };
        let setup_json = serde_json::to_string(&setup)
            .map_err(|e| KeshraError::Channel(format!("setup encode failed: {e}")))?;
        sink.send(Message::Text(setup_json))
            .await
            .map_err(|e| KeshraError::Channel(format!("setup send failed: {e}")))?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let local_close = Arc::new(AtomicBool::new(false));

        // Outbound: drain microphone frames until shutdown or channel end.
        let closing = local_close.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        closing.store(true, Ordering::SeqCst);
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    frame = frames.recv() => {
                        let Some(blob) = frame else { break };
                        let msg = ClientMessage::Audio {
                            data: blob.data,
                            mime_type: blob.mime_type,
                        };
                        let json = match serde_json::to_string(&msg) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(error = %e, "dropping unencodable frame");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Inbound: translate service messages until the socket ends, then
        // report why.
        let closing = local_close;
        tokio::spawn(async move {
            let mut reason = None;
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(server_msg) => {
                            if events.send(server_msg.into()).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!(error = %e, "ignoring unrecognized service message"),
                    },
                    Ok(Message::Close(frame)) => {
                        if !closing.load(Ordering::SeqCst) {
                            reason = Some(match frame {
                                Some(f) => format!("closed by service: {}", f.reason),
                                None => "closed by service".to_string(),
                            });
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if !closing.load(Ordering::SeqCst) {
                            reason = Some(format!("socket error: {e}"));
                        }
                        break;
                    }
                }
            }
            let _ = events.send(ChannelEvent::Closed { reason }).await;
        });

        Ok(ChannelHandle::new(shutdown_tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_message_serializes_with_type_tag() {
        let msg = ClientMessage::Audio {
            data: "AAAA".into(),
            mime_type: "audio/pcm;rate=16000".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "audio");
        assert_eq!(json["mimeType"], "audio/pcm;rate=16000");
    }

    #[test]
    fn setup_message_declares_both_formats() {
        let msg = ClientMessage::Setup {
            model: "keshra-voice-1".into(),
            voice: "amber".into(),
            input_mime_type: "audio/pcm;rate=16000".into(),
            output_mime_type: "audio/pcm;rate=24000".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "setup");
        assert_eq!(json["inputMimeType"], "audio/pcm;rate=16000");
        assert_eq!(json["outputMimeType"], "audio/pcm;rate=24000");
    }

    #[test]
    fn server_messages_parse_by_type_tag() {
        let chunk: ServerMessage = serde_json::from_str(
            r#"{"type":"audioChunk","data":"UExD","mimeType":"audio/pcm;rate=24000"}"#,
        )
        .unwrap();
        assert!(matches!(chunk, ServerMessage::AudioChunk { .. }));

        let transcript: ServerMessage = serde_json::from_str(
            r#"{"type":"partialTranscript","speaker":"model","text":"hello"}"#,
        )
        .unwrap();
        match transcript {
            ServerMessage::PartialTranscript { speaker, text } => {
                assert_eq!(speaker, Speaker::Model);
                assert_eq!(text, "hello");
            }
            other => panic!("unexpected message: {other:?}"),
        }

        assert!(matches!(
            serde_json::from_str::<ServerMessage>(r#"{"type":"turnComplete"}"#).unwrap(),
            ServerMessage::TurnComplete
        ));
        assert!(matches!(
            serde_json::from_str::<ServerMessage>(r#"{"type":"interrupted"}"#).unwrap(),
            ServerMessage::Interrupted
        ));
    }

    #[test]
    fn endpoint_appends_api_key_when_present() {
        let mut config = ChannelConfig {
            url: "wss://voice.example/api".into(),
            api_key: Some("k123".into()),
            model: "m".into(),
            voice: "v".into(),
            outbound_sample_rate: 16_000,
            inbound_sample_rate: 24_000,
        };
        assert_eq!(WsTransport::endpoint(&config), "wss://voice.example/api?key=k123");

        config.api_key = None;
        assert_eq!(WsTransport::endpoint(&config), "wss://voice.example/api");
    }

    #[test]
    fn endpoint_escapes_reserved_characters_in_the_key() {
        let config = ChannelConfig {
            url: "wss://voice.example/api".into(),
            api_key: Some("k/1&x=2".into()),
            model: "m".into(),
            voice: "v".into(),
            outbound_sample_rate: 16_000,
            inbound_sample_rate: 24_000,
        };
        assert_eq!(
            WsTransport::endpoint(&config),
            "wss://voice.example/api?key=k%2F1%26x%3D2"
        );
    }
}
