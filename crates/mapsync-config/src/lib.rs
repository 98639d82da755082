use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {config_path}: {source}")]
    ConfigReadError {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {config_path}: {source}")]
    ConfigParseError {
        config_path: PathBuf,
        source: toml::de::Error,
    },
}

/// Tuning knobs for the reconciliation engine.
///
/// The grace window is a race mitigation, not a correctness guarantee: a
/// just-opened editor with no keystrokes may still accept a concurrent
/// remote edit within this window. Keep it configurable rather than
/// load-bearing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// How long after an editor opens a remote full-apply is still allowed,
    /// provided no local keystrokes have landed yet.
    pub grace_window_ms: u64,
    /// Attempts when polling for an editing widget to reappear after a
    /// forced re-layout.
    pub widget_poll_attempts: u32,
    /// Fixed backoff between widget polls.
    pub widget_poll_interval_ms: u64,
    /// Attempts when reasserting focus on a restored editing widget.
    pub focus_retry_attempts: u32,
    /// Fixed backoff between focus reassertion attempts.
    pub focus_retry_interval_ms: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            grace_window_ms: 2000,
            widget_poll_attempts: 10,
            widget_poll_interval_ms: 50,
            focus_retry_attempts: 5,
            focus_retry_interval_ms: 30,
        }
    }
}

impl Tuning {
    pub fn grace_window(&self) -> Duration {
        Duration::from_millis(self.grace_window_ms)
    }

    pub fn widget_poll_interval(&self) -> Duration {
        Duration::from_millis(self.widget_poll_interval_ms)
    }

    pub fn focus_retry_interval(&self) -> Duration {
        Duration::from_millis(self.focus_retry_interval_ms)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tuning: Tuning,
}

impl Config {
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Option<Self>, ConfigError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(config_path).map_err(|source| {
            ConfigError::ConfigReadError {
                config_path: config_path.to_path_buf(),
                source,
            }
        })?;

        let config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::ConfigParseError {
                config_path: config_path.to_path_buf(),
                source,
            })?;

        Ok(Some(config))
    }

    pub fn load() -> Result<Option<Self>, ConfigError> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, config_path: P) -> anyhow::Result<()> {
        let config_path = config_path.as_ref();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        self.save_to_path(&config_path)
    }

    pub fn config_path() -> PathBuf {
        let config_dir = shellexpand::tilde("~/.config/mapsync");
        PathBuf::from(config_dir.as_ref()).join("config.toml")
    }
}
