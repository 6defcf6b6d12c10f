//! Configuration management for playcore
//!
//! This module handles loading and managing the controller's tunables from
//! a TOML settings file and environment variables. Every retry interval and
//! threshold the controller uses lives here so deployments can adjust them
//! without a rebuild.

use crate::utils::error::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Retry and polling intervals
    pub timing: TimingSettings,

    /// Audio sink tunables
    pub audio: AudioSettings,

    /// Video feed tunables
    pub video: VideoSettings,

    /// General settings
    pub general: GeneralSettings,
}

/// Retry and polling intervals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Delay before re-trying decoder instantiation when the source has not
    /// produced a format yet, in milliseconds
    pub scan_sources_retry_ms: u64,

    /// Delay before re-trying a decoder input request after the source
    /// reported it would block, in milliseconds
    pub decoder_backpressure_retry_ms: u64,

    /// Interval of the duration poller for dynamic-duration sources,
    /// in milliseconds
    pub poll_duration_interval_ms: u64,
}

/// Audio sink tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Buffer depth requested when opening the sink
    pub sink_buffer_count: u32,

    /// Minimum content duration before a video-less session opens the sink
    /// in deep-buffer mode, in microseconds
    pub deep_buffer_min_duration_us: i64,
}

/// Video feed tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSettings {
    /// Renderer-reported lateness beyond which non-reference frames are
    /// dropped before decode, in microseconds
    pub late_frame_threshold_us: i64,

    /// Enable dropping of late non-reference frames
    pub allow_frame_drop: bool,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timing: TimingSettings::default(),
            audio: AudioSettings::default(),
            video: VideoSettings::default(),
            general: GeneralSettings::default(),
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            scan_sources_retry_ms: 100,
            decoder_backpressure_retry_ms: 10,
            poll_duration_interval_ms: 1000,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sink_buffer_count: 8,
            deep_buffer_min_duration_us: 5_000_000,
        }
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            late_frame_threshold_us: 100_000,
            allow_frame_drop: true,
        }
    }
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the user settings file and the environment
    ///
    /// Values are applied in order (later sources override earlier):
    /// 1. Defaults
    /// 2. User settings file (~/.config/playcore/settings.toml on Linux)
    /// 3. Environment variables (PLAYCORE_* prefix)
    pub fn load() -> Result<Self> {
        let mut settings = Self::default();

        if let Some(user_path) = Self::user_settings_path() {
            if user_path.exists() {
                settings.merge_from_file(&user_path)?;
            }
        }

        settings.apply_env_overrides()?;
        settings.validate()?;

        Ok(settings)
    }

    /// Save settings to the user settings file
    pub fn save(&self) -> Result<()> {
        let path = Self::user_settings_path()
            .ok_or_else(|| PlayerError::Config("cannot determine settings path".to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PlayerError::Config(format!("failed to create settings dir: {}", e)))?;
        }

        let toml = toml::to_string_pretty(self)
            .map_err(|e| PlayerError::Config(format!("failed to serialize settings: {}", e)))?;

        std::fs::write(&path, toml)
            .map_err(|e| PlayerError::Config(format!("failed to write settings file: {}", e)))?;

        Ok(())
    }

    fn merge_from_file(&mut self, path: &Path) -> Result<()> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PlayerError::Config(format!("failed to read settings file: {}", e)))?;

        let file_settings: Settings = toml::from_str(&contents)
            .map_err(|e| PlayerError::Config(format!("failed to parse settings file: {}", e)))?;

        *self = file_settings;

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        // Example: PLAYCORE_SCAN_RETRY_MS=250
        if let Ok(value) = std::env::var("PLAYCORE_SCAN_RETRY_MS") {
            self.timing.scan_sources_retry_ms = value
                .parse()
                .map_err(|_| PlayerError::Config("invalid PLAYCORE_SCAN_RETRY_MS".to_string()))?;
        }

        if let Ok(value) = std::env::var("PLAYCORE_SINK_BUFFER_COUNT") {
            self.audio.sink_buffer_count = value
                .parse()
                .map_err(|_| PlayerError::Config("invalid PLAYCORE_SINK_BUFFER_COUNT".to_string()))?;
        }

        if let Ok(value) = std::env::var("PLAYCORE_LATE_FRAME_THRESHOLD_US") {
            self.video.late_frame_threshold_us = value.parse().map_err(|_| {
                PlayerError::Config("invalid PLAYCORE_LATE_FRAME_THRESHOLD_US".to_string())
            })?;
        }

        if let Ok(log_level) = std::env::var("PLAYCORE_LOG_LEVEL") {
            self.general.log_level = log_level;
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.audio.sink_buffer_count == 0 {
            return Err(PlayerError::Config(
                "sink buffer count must be non-zero".to_string(),
            ));
        }

        if self.video.late_frame_threshold_us < 0 {
            return Err(PlayerError::Config(
                "late frame threshold must be non-negative".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(PlayerError::Config(format!(
                "invalid log level '{}', must be one of: {:?}",
                self.general.log_level, valid_log_levels
            )));
        }

        Ok(())
    }

    fn user_settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("playcore").join("settings.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.timing.scan_sources_retry_ms, 100);
        assert_eq!(settings.timing.decoder_backpressure_retry_ms, 10);
        assert_eq!(settings.timing.poll_duration_interval_ms, 1000);
        assert_eq!(settings.audio.sink_buffer_count, 8);
        assert_eq!(settings.video.late_frame_threshold_us, 100_000);
        assert!(settings.video.allow_frame_drop);
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.audio.sink_buffer_count = 0;
        assert!(settings.validate().is_err());

        settings.audio.sink_buffer_count = 8;
        settings.video.late_frame_threshold_us = -1;
        assert!(settings.validate().is_err());

        settings.video.late_frame_threshold_us = 100_000;
        settings.general.log_level = "loud".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_serialization() {
        let settings = Settings::default();
        let toml = toml::to_string(&settings).unwrap();
        let deserialized: Settings = toml::from_str(&toml).unwrap();

        assert_eq!(
            settings.timing.scan_sources_retry_ms,
            deserialized.timing.scan_sources_retry_ms
        );
        assert_eq!(
            settings.audio.sink_buffer_count,
            deserialized.audio.sink_buffer_count
        );
    }
}
