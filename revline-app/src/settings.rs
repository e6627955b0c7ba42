//! Persistent host settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use revline_core::{buffering::DEFAULT_CAPACITY_FRAMES, PlaybackConfig};
use serde::{Deserialize, Serialize};

/// Overrides the settings file location.
pub const SETTINGS_ENV: &str = "REVLINE_SETTINGS";

/// Smallest target lead the host accepts. Half of it (a safety reset lands at
/// half the target) stays above common device block sizes.
pub const MIN_TARGET_LEAD_MS: u32 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// `"sine"` or `"engine"`.
    pub source: String,
    pub tone_frequency_hz: f64,
    pub amplitude: f32,
    /// Fixed throttle fed to the engine source.
    pub throttle: f64,
    pub engine_script: Option<PathBuf>,
    pub asset_base: Option<PathBuf>,
    pub sample_rate: u32,
    pub target_lead_ms: u32,
    pub max_lead_ms: u32,
    pub warmup_ms: u32,
    pub report_interval_cycles: u32,
    pub preferred_output_device: Option<String>,
    /// Stop after this many seconds; `None` runs until Ctrl-C.
    pub duration_secs: Option<u64>,
}

impl Default for AppSettings {
    fn default() -> Self {
        let playback = PlaybackConfig::default();
        Self {
            source: "sine".into(),
            tone_frequency_hz: 220.0,
            amplitude: 0.5,
            throttle: 0.1,
            engine_script: None,
            asset_base: None,
            sample_rate: playback.sample_rate,
            target_lead_ms: playback.target_lead_ms,
            max_lead_ms: playback.max_lead_ms,
            warmup_ms: playback.warmup_ms,
            report_interval_cycles: playback.report_interval_cycles,
            preferred_output_device: None,
            duration_secs: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.source = normalize_source(&self.source);
        self.tone_frequency_hz = if self.tone_frequency_hz.is_finite() {
            self.tone_frequency_hz.clamp(20.0, 20_000.0)
        } else {
            220.0
        };
        self.amplitude = self.amplitude.clamp(0.0, 1.0);
        self.throttle = if self.throttle.is_finite() {
            self.throttle.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.sample_rate = self.sample_rate.clamp(8_000, 192_000);
        self.target_lead_ms = self.target_lead_ms.clamp(MIN_TARGET_LEAD_MS, 1_000);
        self.max_lead_ms = self
            .max_lead_ms
            .clamp(self.target_lead_ms + 10, 5_000);
        self.warmup_ms = self.warmup_ms.min(10_000);
        self.report_interval_cycles = self.report_interval_cycles.min(6_000);
        self.preferred_output_device = self
            .preferred_output_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.engine_script = self
            .engine_script
            .take()
            .filter(|p| !p.as_os_str().is_empty());
        self.duration_secs = self.duration_secs.filter(|s| *s > 0);
    }

    /// Playback configuration with a ring large enough for the chosen max lead.
    pub fn playback_config(&self) -> PlaybackConfig {
        let mut config = PlaybackConfig {
            sample_rate: self.sample_rate,
            target_lead_ms: self.target_lead_ms,
            max_lead_ms: self.max_lead_ms,
            warmup_ms: self.warmup_ms,
            report_interval_cycles: self.report_interval_cycles,
            preferred_output_device: self.preferred_output_device.clone(),
            ..PlaybackConfig::default()
        };
        let needed = config.max_lead_frames() + config.frames_per_cycle() + 1;
        config.capacity_frames = DEFAULT_CAPACITY_FRAMES.max(needed);
        config
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }
}

pub fn normalize_source(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "engine" | "stub" | "stub-engine" => "engine".into(),
        _ => "sine".into(),
    }
}

/// `$REVLINE_SETTINGS` if set, otherwise the platform default location.
pub fn settings_path() -> PathBuf {
    std::env::var_os(SETTINGS_ENV)
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(default_settings_path)
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Revline")
            .join("settings.json")
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("Library")
            .join("Application Support")
            .join("Revline")
            .join("settings.json")
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
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
            .join("revline")
            .join("settings.json")
    }
}

/// Missing or unreadable files fall back to defaults.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_produce_a_valid_playback_config() {
        let config = AppSettings::default().playback_config();
        assert_eq!(config, PlaybackConfig::default());
        config.validate().expect("valid config");
    }

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let mut settings = AppSettings {
            source: " ENGINE ".into(),
            tone_frequency_hz: f64::INFINITY,
            amplitude: 3.0,
            throttle: -1.0,
            target_lead_ms: 2,
            max_lead_ms: 1,
            preferred_output_device: Some("   ".into()),
            duration_secs: Some(0),
            ..AppSettings::default()
        };
        settings.normalize();
        assert_eq!(settings.source, "engine");
        assert_eq!(settings.tone_frequency_hz, 220.0);
        assert_eq!(settings.amplitude, 1.0);
        assert_eq!(settings.throttle, 0.0);
        assert_eq!(settings.target_lead_ms, MIN_TARGET_LEAD_MS);
        assert_eq!(settings.max_lead_ms, MIN_TARGET_LEAD_MS + 10);
        assert!(settings.preferred_output_device.is_none());
        assert!(settings.duration().is_none());
        settings.playback_config().validate().expect("valid config");
    }

    #[test]
    fn large_max_lead_grows_the_ring() {
        let mut settings = AppSettings {
            target_lead_ms: 1_000,
            max_lead_ms: 4_000,
            ..AppSettings::default()
        };
        settings.normalize();
        let config = settings.playback_config();
        assert!(config.capacity_frames > DEFAULT_CAPACITY_FRAMES);
        config.validate().expect("valid config");
    }

    #[test]
    fn snap_point_clears_large_device_blocks_at_every_rate() {
        for sample_rate in [8_000, 22_050, 44_100, 192_000] {
            let mut settings = AppSettings {
                sample_rate,
                target_lead_ms: 1,
                ..AppSettings::default()
            };
            settings.normalize();
            let half_target = settings.playback_config().target_lead_frames() / 2;
            // 20 ms covers a 1024-frame block at 48 kHz.
            assert!(half_target >= sample_rate as usize / 50, "{sample_rate} Hz: {half_target}");
        }
    }

    #[test]
    fn unknown_source_falls_back_to_sine() {
        assert_eq!(normalize_source("theremin"), "sine");
        assert_eq!(normalize_source("stub"), "engine");
    }

    #[test]
    fn missing_file_loads_defaults_and_save_round_trips() {
        let dir = std::env::temp_dir().join(format!("revline-settings-{}", std::process::id()));
        let path = dir.join("settings.json");
        let _ = fs::remove_dir_all(&dir);

        let loaded = load_settings(&path);
        assert_eq!(loaded.source, "sine");

        let custom = AppSettings {
            source: "engine".into(),
            throttle: 0.35,
            duration_secs: Some(30),
            ..AppSettings::default()
        };
        save_settings(&path, &custom).expect("save settings");
        let reloaded = load_settings(&path);
        assert_eq!(reloaded.source, "engine");
        assert_eq!(reloaded.throttle, 0.35);
        assert_eq!(reloaded.duration(), Some(Duration::from_secs(30)));

        let _ = fs::remove_dir_all(&dir);
    }
}
