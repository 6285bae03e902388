use std::{env, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::probe::{BODY_CAPTURE_CHARS, PROBE_TIMEOUT_MS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFailed(#[source] std::io::Error),

    #[error("failed to write config file: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("no config path available (neither $XDG_CONFIG_HOME nor $HOME set)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub probe: ProbeConfig,
    pub alerts: AlertConfig,
    pub vuln: VulnConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: path::PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub timeout_ms: u64,
    pub body_capture_chars: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Alerts are POSTed here as JSON; when unset they go to the log.
    pub webhook_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VulnConfig {
    /// Base URL of the fingerprinting API; scanning is disabled when unset.
    pub source_url: Option<String>,
    pub api_key: Option<String>,
    /// Local wall-clock hour (0-23) the daily batch starts at.
    pub daily_hour: u32,
    pub batch_delay_seconds: u64,
    pub on_demand_delay_seconds: u64,
    pub history_retention_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            probe: ProbeConfig::default(),
            alerts: AlertConfig::default(),
            vuln: VulnConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: path::PathBuf::from("vigil.db") }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { timeout_ms: PROBE_TIMEOUT_MS, body_capture_chars: BODY_CAPTURE_CHARS }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { webhook_url: None }
    }
}

impl Default for VulnConfig {
    fn default() -> Self {
        Self {
            source_url: None,
            api_key: None,
            daily_hour: 8,
            batch_delay_seconds: 30,
            on_demand_delay_seconds: 5,
            history_retention_days: 30,
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/vigil/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("vigil/config.toml"))
}

impl Config {
    /// Load the config from the given path, or from the default location,
    /// writing a default config file if none exists yet.
    pub fn from_config(optional_path: Option<&path::Path>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path)
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(ConfigError::ReadFailed)?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        fs::write(path, config_str).map_err(ConfigError::WriteFailed)
    }
}
