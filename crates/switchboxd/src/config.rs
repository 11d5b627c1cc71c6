//! Configuration file parsing and structures.
//!
//! switchboxd uses a single TOML file. Only `[device]` is required; every
//! other section has defaults.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use crate::engine::EngineConfig;
use crate::engine::Mode;
use crate::engine::RELAY_COUNT;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,

    /// Push notifications from the device. When present the engine stops
    /// polling and relies on the listener instead.
    #[serde(default)]
    pub notifications: Option<NotificationsConfig>,

    #[serde(default)]
    pub engine: EngineSettings,

    /// Host-facing HTTP API
    #[serde(default)]
    pub api: Option<ApiConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(
    Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `"switchboxd::engine" = "debug"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Build the log filter, with `level` replacing the configured default.
    pub fn filter(&self, level: Option<LogLevel>) -> Targets {
        let default = level.unwrap_or(self.level);
        self.overrides.iter().fold(
            Targets::new().with_default(LevelFilter::from(default)),
            |targets, (target, level)| targets.with_target(target.clone(), LevelFilter::from(*level)),
        )
    }
}

fn default_name() -> String {
    "SwitchboxD".to_string()
}

fn default_names() -> Vec<String> {
    (0..RELAY_COUNT).map(|i| format!("Switch {}", i)).collect()
}

/// The switchbox being bridged
#[derive(Debug, Deserialize)]
pub struct DeviceConfig {
    /// IP address (or hostname) of the device
    pub ip: String,

    /// Display name of the device
    #[serde(default = "default_name")]
    pub name: String,

    /// Display names of the relays, by relay id
    #[serde(default = "default_names")]
    pub names: Vec<String>,
}

fn default_listen_all() -> String {
    "0.0.0.0".to_string()
}

/// Listener for "status changed" pings sent by the device
#[derive(Debug, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_listen_all")]
    pub listen: String,

    pub port: u16,
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_write_failure_delay_secs() -> u64 {
    3
}

fn default_request_timeout_secs() -> u64 {
    10
}

/// Cache and request timing
#[derive(Debug, Deserialize)]
pub struct EngineSettings {
    /// Background refresh period and cache lifetime
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Delay before a failed switch command is reported
    #[serde(default = "default_write_failure_delay_secs")]
    pub write_failure_delay_secs: u64,

    /// Timeout for a single device request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            write_failure_delay_secs: default_write_failure_delay_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl EngineSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_api_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8565
}

/// Host-facing HTTP API configuration
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_listen")]
    pub listen: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.device.ip.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "device.ip must not be empty".to_string(),
            ));
        }

        if self.device.names.len() != RELAY_COUNT {
            return Err(ConfigError::Invalid(format!(
                "device.names must list exactly {} names, got {}",
                RELAY_COUNT,
                self.device.names.len()
            )));
        }

        if self.engine.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "engine.refresh_interval_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Polling unless the device pushes notifications to us
    pub fn mode(&self) -> Mode {
        if self.notifications.is_some() {
            Mode::Push
        } else {
            Mode::Polling
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            refresh_interval: Duration::from_secs(self.engine.refresh_interval_secs),
            write_failure_delay: Duration::from_secs(self.engine.write_failure_delay_secs),
            mode: self.mode(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
