//! Event types broadcast to session subscribers (UI layer).
//!
//! All payloads serialize camelCase so a web frontend can consume them
//! unchanged.

use serde::{Deserialize, Serialize};

/// Current state of a voice session.
///
/// Transitions: `Disconnected → Connecting → Connected → Disconnected`,
/// with `Error` reachable from any state on failure. A later
/// `disconnect()` always lands back in `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Emitted whenever the session status changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Emitted once per captured frame for UI volume metering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Normalized input level in [0.0, 1.0].
    pub level: f32,
}

/// A committed conversational turn, emitted after its transcript has been
/// flushed to the chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnEvent {
    /// What the user said, if the service transcribed anything.
    pub user: Option<String>,
    /// What the model said, if the service transcribed anything.
    pub model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_lowercase() {
        let event = SessionStatusEvent {
            status: SessionStatus::Connecting,
            detail: Some("opening channel".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "connecting");
        assert_eq!(json["detail"], "opening channel");

        let round_trip: SessionStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, SessionStatus::Connecting);
    }

    #[test]
    fn volume_event_uses_camel_case() {
        let json = serde_json::to_value(VolumeEvent { seq: 4, level: 0.5 }).unwrap();
        assert_eq!(json["seq"], 4);
        let level = json["level"].as_f64().expect("level is a number");
        assert!((level - 0.5).abs() < 1e-6);
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        let err = serde_json::from_str::<SessionStatus>(r#""Connected""#);
        assert!(err.is_err(), "expected invalid casing to fail");
    }
}
