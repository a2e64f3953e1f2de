//! Input device enumeration for the host's device picker.

use serde::{Deserialize, Serialize};

/// Metadata about one audio input device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default input device.
    pub is_default: bool,
    /// Heuristic flag for loopback/monitor devices that would feed the
    /// assistant its own speech back.
    pub is_monitor_like: bool,
}

const MONITOR_KEYWORDS: &[&str] = &[
    "monitor of",
    "loopback",
    "stereo mix",
    "what u hear",
    "what you hear",
    "virtual output",
];

/// Best-effort heuristic for devices that capture system output rather
/// than a microphone.
pub fn is_monitor_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    MONITOR_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// List all available audio input devices on the system, default first.
///
/// Returns an empty `Vec` when cpal is unavailable or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => {
            let mut list = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                    let is_default = default_name.as_deref() == Some(name.as_str());
                    let is_monitor_like = is_monitor_like_name(&name);
                    DeviceInfo {
                        name,
                        is_default,
                        is_monitor_like,
                    }
                })
                .collect::<Vec<_>>();

            list.sort_by_key(|d| {
                (
                    !d.is_default,
                    d.is_monitor_like,
                    d.name.to_ascii_lowercase(),
                )
            });
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    Vec::new()
}
