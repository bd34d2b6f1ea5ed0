//! Persistent host settings — JSON file in a configured data directory,
//! mirroring `argus-core`'s teacher-derived `AppSettings` conventions:
//! `camelCase`, `#[serde(default)]`, a `Default` impl, and a `normalize()`
//! clamp pass. Loading this file is thin glue — a missing or malformed file
//! falls back to defaults and never blocks startup.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    pub chat_base_url: String,
    pub chat_model: String,
    pub camera_index: i32,
    pub camera_width: u32,
    pub camera_height: u32,
    pub camera_fps: f32,
    pub proactive_idle_sec: f64,
    pub proactive_cooldown_sec: f64,
    pub max_tool_rounds: usize,
    pub max_tool_calls_per_turn: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".into(),
            chat_base_url: "http://localhost:11434/api".into(),
            chat_model: "llama3.2".into(),
            camera_index: 0,
            camera_width: 320,
            camera_height: 240,
            camera_fps: 30.0,
            proactive_idle_sec: 120.0,
            proactive_cooldown_sec: 300.0,
            max_tool_rounds: 3,
            max_tool_calls_per_turn: 4,
        }
    }
}

impl Settings {
    pub fn normalize(&mut self) {
        self.camera_width = self.camera_width.clamp(64, 1920);
        self.camera_height = self.camera_height.clamp(48, 1080);
        self.camera_fps = self.camera_fps.clamp(1.0, 60.0);
        self.proactive_idle_sec = self.proactive_idle_sec.clamp(5.0, 3600.0);
        self.proactive_cooldown_sec = self.proactive_cooldown_sec.clamp(5.0, 3600.0);
        self.max_tool_rounds = self.max_tool_rounds.clamp(1, 8);
        self.max_tool_calls_per_turn = self.max_tool_calls_per_turn.clamp(1, 16);
        if self.chat_base_url.trim().is_empty() {
            self.chat_base_url = Self::default().chat_base_url;
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Argus")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("argus")
    }
}

pub fn load_settings(path: &Path) -> Settings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<Settings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &Settings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_out_of_range_camera_dims() {
        let mut settings = Settings { camera_width: 10, camera_height: 5000, ..Settings::default() };
        settings.normalize();
        assert_eq!(settings.camera_width, 64);
        assert_eq!(settings.camera_height, 1080);
    }

    #[test]
    fn normalize_restores_default_on_empty_chat_url() {
        let mut settings = Settings { chat_base_url: "  ".into(), ..Settings::default() };
        settings.normalize();
        assert_eq!(settings.chat_base_url, Settings::default().chat_base_url);
    }

    #[test]
    fn load_settings_falls_back_to_default_when_file_missing() {
        let settings = load_settings(Path::new("/nonexistent/argus-settings.json"));
        assert_eq!(settings.bind_addr, Settings::default().bind_addr);
    }
}
