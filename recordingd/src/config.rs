use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub connections: ConnectionConfig,
    #[serde(default)]
    pub recordings: RecordingDefaults,
    #[serde(default)]
    pub targets: Vec<StaticTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Base URL clients reach this daemon at; download and report links are
    /// only emitted when it is set
    #[serde(default)]
    pub external_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_max_idle")]
    pub max_idle_per_target: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
}

/// Operator-configured recording defaults, overlaid on the defaults a target announces.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RecordingDefaults {
    #[serde(default)]
    pub to_disk: Option<bool>,
    #[serde(default)]
    pub max_age_ms: Option<i64>,
    #[serde(default)]
    pub max_size_bytes: Option<i64>,
}

/// A target registered from the config file rather than by discovery.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticTarget {
    pub connect_url: String,
    #[serde(default)]
    pub alias: Option<String>,
}

fn default_listen() -> String {
    "[::]:8181".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/recordingd/recordings.db")
}

fn default_max_idle() -> usize {
    2
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_task_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            external_url: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_idle_per_target: default_max_idle(),
            connect_timeout_secs: default_connect_timeout(),
            task_timeout_secs: default_task_timeout(),
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
