//! Configuration management for the voice capture pipeline.
//!
//! Handles loading, saving, and providing defaults for the recording
//! policy, the transcription endpoint, and logging.

use crate::session::SessionPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recording: RecordingConfig,
    pub transcription: TranscriptionConfig,
    pub logging: LoggingConfig,
}

/// Recording duration and size policy.
///
/// These bounds are policy defaults inherited from the kiosk UI, not
/// protocol invariants; they are all overridable here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Recordings shorter than this are discarded without submission.
    pub min_duration_secs: f32,
    /// The watchdog stops the recording automatically at this duration.
    pub max_duration_secs: f32,
    /// Assembled containers larger than this are discarded.
    pub max_payload_bytes: usize,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            min_duration_secs: 0.5,
            max_duration_secs: 60.0,
            max_payload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl RecordingConfig {
    /// Convert into the policy consumed by the recording session.
    pub fn policy(&self) -> SessionPolicy {
        SessionPolicy {
            min_duration: Duration::from_secs_f32(self.min_duration_secs),
            max_duration: Duration::from_secs_f32(self.max_duration_secs),
            max_payload_bytes: self.max_payload_bytes,
        }
    }
}

/// Transcription endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// URL of the transcription endpoint.
    pub endpoint: String,
    /// Language tag sent alongside each recording.
    pub language: String,
    /// Results below this confidence get a low-confidence warning in the
    /// presentation layer. Display policy only.
    pub low_confidence_threshold: f32,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5000/api/speech/transcribe".to_string(),
            language: "zh-HK".to_string(),
            low_confidence_threshold: 0.85,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: LogLevel,
}

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to a tracing filter directive string for this crate.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "ordervoice=error",
            LogLevel::Warn => "ordervoice=warn",
            LogLevel::Info => "ordervoice=info",
            LogLevel::Debug => "ordervoice=debug",
            LogLevel::Trace => "ordervoice=trace",
        }
    }
}

impl Config {
    /// Returns the default config directory path.
    /// `~/.config/ordervoice/` (or `$XDG_CONFIG_HOME/ordervoice/`)
    pub fn config_dir() -> Result<PathBuf> {
        let xdg = xdg::BaseDirectories::with_prefix("ordervoice");
        xdg.get_config_home()
            .context("Failed to get XDG config directory (HOME not set?)")
    }

    /// Returns the default config file path.
    /// `~/.config/ordervoice/config.toml`
    pub fn config_path() -> Result<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    /// Load configuration from the default path.
    /// Returns defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file as TOML")
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
