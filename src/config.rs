//! Client configuration.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! `MURMUR_*` environment variables. Command-line flags are applied on top by
//! the binary.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8181";

pub const ENV_SERVER_URL: &str = "MURMUR_WS_URL";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "MURMUR_MAX_RECONNECT_ATTEMPTS";
pub const ENV_RECONNECT_INTERVAL_MS: &str = "MURMUR_RECONNECT_INTERVAL_MS";
pub const ENV_RECONNECT_BACKOFF_MULTIPLIER: &str = "MURMUR_RECONNECT_BACKOFF_MULTIPLIER";
pub const ENV_PING_INTERVAL_MS: &str = "MURMUR_PING_INTERVAL_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_interval_ms: u64,
    pub reconnect_backoff_multiplier: f64,
    pub ping_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            max_reconnect_attempts: 5,
            reconnect_interval_ms: 3000,
            reconnect_backoff_multiplier: 1.5,
            ping_interval_ms: 30000,
        }
    }
}

impl ClientConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Delay before reconnect attempt `attempt` (1-indexed). Grows without bound.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.reconnect_interval_ms as f64 * self.reconnect_backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(millis / 1000.0).unwrap_or(Duration::MAX)
    }

    /// Default location of the config file, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("murmur").join("config.json"))
    }

    /// Load a JSON config file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ClientConfig = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve the full configuration: defaults, then the file at `path` (or the
    /// default location when it exists), then the process environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::load(&default)?,
                _ => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment-style lookups.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_SERVER_URL) {
            self.server_url = url;
        }
        if let Some(value) = lookup(ENV_MAX_RECONNECT_ATTEMPTS) {
            self.max_reconnect_attempts = parse_env(ENV_MAX_RECONNECT_ATTEMPTS, value)?;
        }
        if let Some(value) = lookup(ENV_RECONNECT_INTERVAL_MS) {
            self.reconnect_interval_ms = parse_env(ENV_RECONNECT_INTERVAL_MS, value)?;
        }
        if let Some(value) = lookup(ENV_RECONNECT_BACKOFF_MULTIPLIER) {
            self.reconnect_backoff_multiplier = parse_env(ENV_RECONNECT_BACKOFF_MULTIPLIER, value)?;
        }
        if let Some(value) = lookup(ENV_PING_INTERVAL_MS) {
            self.ping_interval_ms = parse_env(ENV_PING_INTERVAL_MS, value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server URL is empty".to_string()));
        }
        if !self.reconnect_backoff_multiplier.is_finite() || self.reconnect_backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "reconnect backoff multiplier must be >= 1, got {}",
                self.reconnect_backoff_multiplier
            )));
        }
        if self.ping_interval_ms == 0 {
            return Err(ConfigError::Invalid("ping interval must be positive".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}
