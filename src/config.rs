//! Configuration for the sensor stream viewer.

use crate::core::{LatchPolicy, DEFAULT_EXPORT_THRESHOLD, DEFAULT_WINDOW_SIZE};
use crate::export::{ExportScope, DEFAULT_MANUAL_EXPORT_NAME};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default stream endpoint.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8000/ws";

/// Identity announced to the endpoint right after connecting.
pub const DEFAULT_VIEWER_ID: &str = "viewer";

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// WebSocket URL of the stream hub
    pub endpoint: String,

    /// Identity sent in the connection announcement
    pub viewer_id: String,

    /// Number of samples in a recent window
    pub window_size: usize,

    /// Stream length at which a device's automatic export fires
    pub export_threshold: usize,

    /// Comparison used by the automatic export latch
    pub latch_policy: LatchPolicy,

    /// Samples written by a manual export
    pub export_scope: ExportScope,

    /// File name used for manual exports
    pub manual_export_name: String,

    /// Directory receiving CSV exports
    pub export_path: PathBuf,

    /// Directory for persisted statistics
    pub data_path: PathBuf,

    /// Upper bound on connection establishment
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Port of the local HTTP API, when served
    pub server_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensor-stream");

        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            viewer_id: DEFAULT_VIEWER_ID.to_string(),
            window_size: DEFAULT_WINDOW_SIZE,
            export_threshold: DEFAULT_EXPORT_THRESHOLD,
            latch_policy: LatchPolicy::Exact,
            export_scope: ExportScope::FullSequence,
            manual_export_name: DEFAULT_MANUAL_EXPORT_NAME.to_string(),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
            connect_timeout: Duration::from_secs(10),
            server_port: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensor-stream")
            .join("config.json")
    }

    /// Path of the persisted ingest statistics.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("ingest_stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
