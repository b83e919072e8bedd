//! Configuration module for the EZ1-MQTT bridge
//!
//! Loads configuration from a TOML file:
//! - [default] - General settings (log_level)
//! - [ez1] - Inverter connection and polling settings
//! - [mqtt] - MQTT broker settings

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::coordinator::{CoordinatorConfig, NotifyMode, MIN_INTERVAL};
use crate::ez1::client::{DEFAULT_PORT, DEFAULT_TIMEOUT};

/// Log level for the application
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing LevelFilter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub default: DefaultConfig,
    pub ez1: Ez1Config,
    pub mqtt: MqttConfig,
}

/// General application settings
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DefaultConfig {
    /// Log level: TRACE, DEBUG, INFO, WARN, ERROR
    #[serde(default)]
    pub log_level: LogLevel,
}

/// EZ1 connection configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Ez1Config {
    /// Inverter hostname or IP address (required)
    pub host: String,

    /// Local API port (default 8050)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Device name used in sensor ids and display names
    #[serde(default = "default_name")]
    pub name: String,

    /// Output data poll interval (e.g., "10s")
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Per-request timeout (e.g., "8s")
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Alarm, power limit and on/off status interval (e.g., "5m")
    #[serde(default = "default_info_interval", with = "humantime_serde")]
    pub info_interval: Duration,

    /// When the published sensor values are refreshed: always (every cycle),
    /// success_transition (only when the inverter goes offline or comes back,
    /// so values stay frozen while it is online) or data_change
    #[serde(default)]
    pub notify: NotifyMode,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_name() -> String {
    "solar".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_info_interval() -> Duration {
    Duration::from_secs(300)
}

impl Ez1Config {
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            interval: self.interval,
            // Leave the client room to report its own timeout first
            fetch_timeout: self.timeout + Duration::from_secs(2),
            notify: self.notify,
        }
    }
}

/// MQTT broker configuration
#[derive(Deserialize, Clone)]
pub struct MqttConfig {
    /// MQTT root topic (e.g., "ez1")
    #[serde(default = "default_mqtt_root")]
    pub root: String,

    /// MQTT broker hostname
    pub host: String,

    /// MQTT broker port (default 1883)
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// MQTT username, empty for anonymous access
    #[serde(default)]
    pub username: String,

    /// MQTT password
    #[serde(default)]
    pub password: String,
}

fn default_mqtt_root() -> String {
    "ez1".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field("root", &self.root)
            .finish()
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the config.toml file
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or validated
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(
                path.to_string_lossy().to_string(),
            ));
        }

        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration logic (semantic validation beyond type checks)
    fn validate(&self) -> Result<(), ConfigError> {
        if self.ez1.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "ez1.host must not be empty".to_string(),
            ));
        }

        if self.ez1.interval < MIN_INTERVAL {
            return Err(ConfigError::ValidationError(format!(
                "ez1.interval must be at least {:?}",
                MIN_INTERVAL
            )));
        }

        if self.ez1.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "ez1.timeout must be greater than zero".to_string(),
            ));
        }

        if self.ez1.info_interval < self.ez1.interval {
            return Err(ConfigError::ValidationError(
                "ez1.info_interval must not be shorter than ez1.interval".to_string(),
            ));
        }

        if self.mqtt.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "mqtt.host must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
