//! Configuration for Quill hosts.
//!
//! Configuration is read from a TOML file (`quill.toml` or `.quill.toml` at the
//! workspace root, or the path in [`QUILL_CONFIG_ENV_VAR`]). Every section is
//! optional; missing keys fall back to defaults tuned for interactive editing.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod logging;

pub use logging::{init_tracing, LoggingConfig};

pub const QUILL_CONFIG_ENV_VAR: &str = "QUILL_CONFIG_PATH";

const CONFIG_FILE_NAMES: [&str; 2] = ["quill.toml", ".quill.toml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    Toml(String),
    #[error("invalid value for `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // Keep only the message; the default `Display` quotes the offending input.
        ConfigError::Toml(err.message().to_owned())
    }
}

/// Timing of the re-parse pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReparseConfig {
    /// Delay between the first unpatchable edit and the background full parse.
    #[serde(default = "ReparseConfig::default_debounce_ms")]
    pub debounce_ms: u64,

    /// Quiet period after a provisional patch before a confirming full parse is forced.
    #[serde(default = "ReparseConfig::default_idle_confirmation_ms")]
    pub idle_confirmation_ms: u64,
}

impl ReparseConfig {
    fn default_debounce_ms() -> u64 {
        250
    }

    fn default_idle_confirmation_ms() -> u64 {
        500
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn idle_confirmation(&self) -> Duration {
        Duration::from_millis(self.idle_confirmation_ms)
    }
}

impl Default for ReparseConfig {
    fn default() -> Self {
        Self {
            debounce_ms: Self::default_debounce_ms(),
            idle_confirmation_ms: Self::default_idle_confirmation_ms(),
        }
    }
}

/// Timing of the batched derived-artifact worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    #[serde(default = "BatchConfig::default_delay_ms")]
    pub delay_ms: u64,
}

impl BatchConfig {
    fn default_delay_ms() -> u64 {
        1_000
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            delay_ms: Self::default_delay_ms(),
        }
    }
}

/// Thread budget overrides. Unset values keep the scheduler defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSettings {
    #[serde(default)]
    pub parse_threads: Option<usize>,
    #[serde(default)]
    pub batch_threads: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuillConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub reparse: ReparseConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

impl QuillConfig {
    /// Load and validate a config file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    /// Parse and validate a config from TOML text.
    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let config: QuillConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reparse.debounce_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "reparse.debounce_ms",
                message: "must be at least 1".to_owned(),
            });
        }
        if self.reparse.idle_confirmation_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "reparse.idle_confirmation_ms",
                message: "must be at least 1".to_owned(),
            });
        }
        if self.batch.delay_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "batch.delay_ms",
                message: "must be at least 1".to_owned(),
            });
        }
        if self.scheduler.parse_threads == Some(0) {
            return Err(ConfigError::Invalid {
                field: "scheduler.parse_threads",
                message: "must be at least 1".to_owned(),
            });
        }
        if self.scheduler.batch_threads == Some(0) {
            return Err(ConfigError::Invalid {
                field: "scheduler.batch_threads",
                message: "must be at least 1".to_owned(),
            });
        }
        self.logging.validate()
    }
}

/// Find the config file for a workspace.
///
/// [`QUILL_CONFIG_ENV_VAR`] wins when set (relative paths resolve against
/// `workspace_root`); otherwise the first existing file among `quill.toml` and
/// `.quill.toml` is used.
pub fn discover_config_path(workspace_root: &Path) -> Option<PathBuf> {
    if let Some(value) = std::env::var_os(QUILL_CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
        let path = PathBuf::from(value);
        return Some(if path.is_absolute() {
            path
        } else {
            workspace_root.join(path)
        });
    }

    CONFIG_FILE_NAMES
        .iter()
        .map(|name| workspace_root.join(name))
        .find(|path| path.is_file())
}

/// Load the workspace config, or defaults when no config file exists.
pub fn load_for_workspace(
    workspace_root: &Path,
) -> Result<(QuillConfig, Option<PathBuf>), ConfigError> {
    match discover_config_path(workspace_root) {
        Some(path) => {
            let config = QuillConfig::load_from_path(&path)?;
            tracing::debug!(target: "quill.config", path = %path.display(), "loaded config");
            Ok((config, Some(path)))
        }
        None => Ok((QuillConfig::default(), None)),
    }
}
