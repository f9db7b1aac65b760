//! Configuration module.
//!
//! Process-level configuration comes from environment variables with
//! sensible defaults. User settings are a single JSON blob persisted at
//! a fixed path; corrupt or missing data falls back to built-in
//! defaults without surfacing an error beyond a log line.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the sensor backend (default: "http://localhost:5000")
    pub base_url: String,
    /// Path to the cache database file (default: "plantomio-cache.db")
    pub cache_db_path: String,
    /// Path to the persisted settings blob (default: "plantomio-settings.json")
    pub settings_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            cache_db_path: "plantomio-cache.db".to_string(),
            settings_path: "plantomio-settings.json".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PLANTOMIO_BASE_URL`: backend base URL
    /// - `PLANTOMIO_CACHE_DB`: cache database path
    /// - `PLANTOMIO_SETTINGS_PATH`: settings blob path
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(base_url) = env::var("PLANTOMIO_BASE_URL") {
            cfg.base_url = base_url.trim_end_matches('/').to_string();
        }

        if let Ok(path) = env::var("PLANTOMIO_CACHE_DB") {
            cfg.cache_db_path = path;
        }

        if let Ok(path) = env::var("PLANTOMIO_SETTINGS_PATH") {
            cfg.settings_path = path;
        }

        cfg
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartTimeRange {
    Day,
    Week,
    Month,
}

impl ChartTimeRange {
    /// Window covered by this range.
    pub fn window(&self) -> Duration {
        match self {
            ChartTimeRange::Day => Duration::from_secs(24 * 60 * 60),
            ChartTimeRange::Week => Duration::from_secs(7 * 24 * 60 * 60),
            ChartTimeRange::Month => Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// User settings persisted as one JSON blob.
///
/// Field names match the blob the dashboard has always written, so an
/// existing settings file keeps working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Refresh interval in milliseconds.
    pub refresh_interval: u64,
    /// Distance reading at which the tank is 100% full.
    pub tank_min_distance: f64,
    /// Distance reading at which the tank is empty.
    pub tank_max_distance: f64,
    pub temperature_unit: TemperatureUnit,
    pub theme: String,
    pub chart_time_range: ChartTimeRange,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_interval: 30_000,
            tank_min_distance: 2.0,
            tank_max_distance: 20.0,
            temperature_unit: TemperatureUnit::Celsius,
            theme: "green".to_string(),
            chart_time_range: ChartTimeRange::Day,
        }
    }
}

impl Settings {
    /// Load settings from the blob at `path`.
    ///
    /// Missing file is the normal first-run case; a corrupt blob is
    /// logged and replaced by defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };

        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(
                    "Corrupt settings blob at {}: {}; using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Persist settings as the JSON blob at `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let raw = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, raw)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval)
    }

    /// Tank calibration span in cm.
    pub fn tank_range(&self) -> f64 {
        self.tank_max_distance - self.tank_min_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.refresh_interval, 30_000);
        assert_eq!(settings.tank_min_distance, 2.0);
        assert_eq!(settings.tank_max_distance, 20.0);
        assert_eq!(settings.temperature_unit, TemperatureUnit::Celsius);
        assert_eq!(settings.chart_time_range, ChartTimeRange::Day);
    }

    #[test]
    fn test_settings_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = Settings::default();
        settings.refresh_interval = 10_000;
        settings.theme = "dark".to_string();
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_corrupt_blob_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn test_missing_blob_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        assert_eq!(Settings::load(dir.path().join("none.json")), Settings::default());
    }

    #[test]
    fn test_partial_blob_keeps_remaining_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"refreshInterval": 5000}"#).unwrap();

        let loaded = Settings::load(&path);
        assert_eq!(loaded.refresh_interval, 5_000);
        assert_eq!(loaded.tank_max_distance, 20.0);
    }
}
