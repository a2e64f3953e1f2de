//! Persistent application settings (JSON file in the data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub service_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub preferred_input_device: Option<String>,
    pub history_enabled: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            service_url: "wss://voice.keshra.ai/v1/stream".into(),
            api_key: None,
            model: "keshra-voice-1".into(),
            voice: "amber".into(),
            preferred_input_device: None,
            history_enabled: true,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.service_url = self.service_url.trim().to_string();
        if self.service_url.is_empty() {
            self.service_url = Self::default().service_url;
        }
        self.model = normalize_non_empty(&self.model, "keshra-voice-1");
        self.voice = normalize_non_empty(&self.voice, "amber");
        self.api_key = self
            .api_key
            .as_ref()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    /// Environment variables beat the settings file for deploy-time
    /// overrides; `KESHRA_API_KEY` in particular keeps the key out of the
    /// file entirely.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("KESHRA_SERVICE_URL") {
            self.service_url = url;
        }
        if let Ok(key) = std::env::var("KESHRA_API_KEY") {
            self.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("KESHRA_MODEL") {
            self.model = model;
        }
        if let Ok(voice) = std::env::var("KESHRA_VOICE") {
            self.voice = voice;
        }
        self.normalize();
    }
}

fn normalize_non_empty(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        fallback.into()
    } else {
        trimmed.into()
    }
}

pub fn data_dir() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("keshra")
}

pub fn default_settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

pub fn default_history_path() -> PathBuf {
    data_dir().join("keshra.db")
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
