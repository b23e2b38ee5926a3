//! Gateway configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via METROLOGY_CONFIG or --config)
//! 3. Environment variables

use metrology_client::SerialConfig;
use metrology_meter::pulsar;
use metrology_protocol::Address;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Gateway configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration.
    pub log: LogConfig,
    /// Seconds services get to stop after a stop signal (0 = wait forever).
    pub grace_period_secs: u64,
    /// Polling configuration.
    pub poll: PollConfig,
    /// MQTT broker configuration.
    pub mqtt: MqttConfig,
    /// Home Assistant discovery configuration.
    pub home_assistant: HomeAssistantConfig,
    /// Serial ports by name.
    pub serial: BTreeMap<String, SerialConfig>,
    /// Meters by name.
    pub meters: BTreeMap<String, MeterConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            grace_period_secs: 10,
            poll: PollConfig::default(),
            mqtt: MqttConfig::default(),
            home_assistant: HomeAssistantConfig::default(),
            serial: BTreeMap::new(),
            meters: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads configuration from `path` if given, then applies environment
    /// variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(&|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: &dyn Fn(&str) -> Option<String>) {
        self.log.apply_overrides(var);
        if let Some(secs) = var("METROLOGY_GRACE_PERIOD").and_then(|v| v.parse().ok()) {
            self.grace_period_secs = secs;
        }
        self.poll.apply_overrides(var);
        self.mqtt.apply_overrides(var);
        self.home_assistant.apply_overrides(var);
    }

    /// Returns the grace period as Duration.
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Validates cross references and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.period_secs == 0 {
            return Err(ConfigError::ValidationError(
                "poll.period_secs must be positive".to_string(),
            ));
        }
        if self.poll.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll.request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.mqtt.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "mqtt.host must not be empty".to_string(),
            ));
        }

        for (name, port) in &self.serial {
            port.validate().map_err(|e| {
                ConfigError::ValidationError(format!("serial port '{}': {}", name, e))
            })?;
        }

        for (name, meter) in &self.meters {
            if meter.kind != pulsar::TYPE {
                return Err(ConfigError::ValidationError(format!(
                    "meter '{}': unsupported type '{}'",
                    name, meter.kind
                )));
            }
            if !self.serial.contains_key(&meter.port) {
                return Err(ConfigError::ValidationError(format!(
                    "meter '{}': port '{}' not found in serial ports",
                    name, meter.port
                )));
            }
            meter.address().map_err(|e| {
                ConfigError::ValidationError(format!("meter '{}': {}", name, e))
            })?;
        }

        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when RUST_LOG is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl LogConfig {
    fn apply_overrides(&mut self, var: &dyn Fn(&str) -> Option<String>) {
        if let Some(level) = var("METROLOGY_LOG_LEVEL") {
            self.level = level;
        }

        if let Some(format) = var("METROLOGY_LOG_FORMAT") {
            self.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            };
        }
    }
}

/// Polling configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Seconds between two polls of a meter.
    pub period_secs: u64,
    /// Milliseconds a device has to answer one request.
    pub request_timeout_ms: u64,
    /// Poll once right after startup instead of after the first period.
    pub run_immediately: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            period_secs: 60,
            request_timeout_ms: 1000,
            run_immediately: false,
        }
    }
}

impl PollConfig {
    fn apply_overrides(&mut self, var: &dyn Fn(&str) -> Option<String>) {
        if let Some(secs) = var("METROLOGY_POLL_PERIOD").and_then(|v| v.parse().ok()) {
            self.period_secs = secs;
        }

        if let Some(ms) = var("METROLOGY_REQUEST_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.request_timeout_ms = ms;
        }

        if let Some(run) = var("METROLOGY_RUN_IMMEDIATELY") {
            self.run_immediately = run == "1" || run.to_lowercase() == "true";
        }
    }

    /// Returns the polling period as Duration.
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    /// Returns the request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// MQTT broker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "metrology-master".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
        }
    }
}

impl MqttConfig {
    fn apply_overrides(&mut self, var: &dyn Fn(&str) -> Option<String>) {
        if let Some(host) = var("METROLOGY_MQTT_HOST") {
            self.host = host;
        }

        if let Some(port) = var("METROLOGY_MQTT_PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }

        if let Some(id) = var("METROLOGY_MQTT_CLIENT_ID") {
            self.client_id = id;
        }

        if let Some(username) = var("METROLOGY_MQTT_USERNAME") {
            self.username = Some(username);
        }

        if let Some(password) = var("METROLOGY_MQTT_PASSWORD") {
            self.password = Some(password);
        }
    }

    /// Returns the keep-alive interval as Duration.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Home Assistant MQTT discovery configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    /// Publish discovery descriptors on startup.
    pub auto_discovery: bool,
    /// Discovery topic prefix.
    pub prefix: String,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            auto_discovery: false,
            prefix: "homeassistant".to_string(),
        }
    }
}

impl HomeAssistantConfig {
    fn apply_overrides(&mut self, var: &dyn Fn(&str) -> Option<String>) {
        if let Some(enabled) = var("METROLOGY_HA_AUTO_DISCOVERY") {
            self.auto_discovery = enabled == "1" || enabled.to_lowercase() == "true";
        }

        if let Some(prefix) = var("METROLOGY_HA_PREFIX") {
            self.prefix = prefix;
        }
    }
}

/// One meter on a serial port.
#[derive(Debug, Clone, Deserialize)]
pub struct MeterConfig {
    /// Driver name, e.g. `pulsar_electro`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Bus address as hex, e.g. `"0x08833976"`.
    pub address: String,
    /// Name of the serial port in `serial`.
    pub port: String,
}

impl MeterConfig {
    /// Parses the bus address.
    pub fn address(&self) -> Result<Address, metrology_protocol::ProtocolError> {
        self.address.parse()
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
