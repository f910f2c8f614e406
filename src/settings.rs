// src/settings.rs
//
// Application settings, stored as TOML in the user's config directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::io::events::DEFAULT_QUEUE_CAPACITY;
use crate::io::LinkConfig;

const SETTINGS_DIR: &str = "AirLink";
const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppSettings {
    #[serde(default = "default_port_refresh_interval_secs")]
    pub port_refresh_interval_secs: u64,
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
    #[serde(default = "default_show_pings")]
    pub show_pings: bool,
    /// Enables file logging when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    // Tables serialize after plain values
    #[serde(default)]
    pub serial: LinkConfig,
}

fn default_port_refresh_interval_secs() -> u64 {
    5
}
fn default_event_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_drain_interval_ms() -> u64 {
    100
}
fn default_show_pings() -> bool {
    true
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            port_refresh_interval_secs: default_port_refresh_interval_secs(),
            event_queue_capacity: default_event_queue_capacity(),
            drain_interval_ms: default_drain_interval_ms(),
            show_pings: default_show_pings(),
            log_dir: None,
            serial: LinkConfig::default(),
        }
    }
}

/// `<config_dir>/AirLink/settings.toml`, falling back to the working directory
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(SETTINGS_DIR)
        .join(SETTINGS_FILE)
}

/// Load settings from `path`. A missing file yields defaults.
pub fn load_settings(path: &Path) -> Result<AppSettings, String> {
    if !path.exists() {
        return Ok(AppSettings::default());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read settings {}: {}", path.display(), e))?;
    let settings: AppSettings = toml::from_str(&contents)
        .map_err(|e| format!("Failed to parse settings {}: {}", path.display(), e))?;

    tlog!("[settings] Loaded {}", path.display());
    Ok(settings)
}

/// Write settings to `path`, creating parent directories
pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create settings dir: {}", e))?;
    }

    let contents = toml::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;
    std::fs::write(path, contents)
        .map_err(|e| format!("Failed to write settings {}: {}", path.display(), e))?;

    tlog!("[settings] Saved {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, AppSettings::default());
        assert_eq!(settings.serial.baud_rate, 115_200);
        assert_eq!(settings.port_refresh_interval_secs, 5);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(
            &path,
            "show_pings = false\n\n[serial]\nbaud_rate = 9600\nmax_line_length = 512\n",
        )
        .unwrap();

        let settings = load_settings(&path).unwrap();
        assert!(!settings.show_pings);
        assert_eq!(settings.serial.baud_rate, 9600);
        assert_eq!(settings.serial.max_line_length, 512);
        assert_eq!(settings.serial.read_timeout_ms, 500);
        assert_eq!(settings.drain_interval_ms, 100);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "serial = [not toml").unwrap();

        let err = load_settings(&path).unwrap_err();
        assert!(err.starts_with("Failed to parse settings"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let mut settings = AppSettings::default();
        settings.serial.read_timeout_ms = 250;
        settings.log_dir = Some(dir.path().join("logs"));

        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path).unwrap(), settings);
    }

    #[test]
    fn test_default_path_ends_in_airlink_settings() {
        let path = default_settings_path();
        assert!(path.ends_with(Path::new(SETTINGS_DIR).join(SETTINGS_FILE)));
    }
}
