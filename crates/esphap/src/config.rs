//! Configuration file parsing and structures.
//!
//! esphap uses TOML for declarative configuration: a list of device
//! endpoints, discovery settings, the global retry interval, and the
//! accessory exclusion list.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

/// Default MQTT endpoint port for a device entry.
pub const DEFAULT_DEVICE_PORT: u16 = 1883;

/// Default seconds between reconnection attempts.
pub const DEFAULT_RETRY_INTERVAL: u64 = 90;

/// Default milliseconds to listen for device advertisements.
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 5_000;

fn default_port() -> u16 {
    DEFAULT_DEVICE_PORT
}

fn default_retry_interval() -> u64 {
    DEFAULT_RETRY_INTERVAL
}

fn default_discovery_timeout() -> u64 {
    DEFAULT_DISCOVERY_TIMEOUT_MS
}

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Seconds between connection attempts, unless a device overrides it.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,

    /// Component display names that must never be exposed as accessories.
    #[serde(default)]
    pub blacklist: Vec<String>,

    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            discovery: DiscoveryConfig::default(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            blacklist: Vec::new(),
            devices: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
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

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,
}

/// Network discovery settings.
#[derive(Debug, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub enabled: bool,

    /// How long to listen for advertisements before merging results once.
    #[serde(default = "default_discovery_timeout")]
    pub timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: DEFAULT_DISCOVERY_TIMEOUT_MS,
        }
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// One configured device endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceEntry {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Topic prefix the device publishes under. Defaults to the first
    /// label of the host name.
    #[serde(default)]
    pub topic_prefix: Option<String>,

    /// Per-device override of the global retry interval, in seconds.
    #[serde(default)]
    pub retry_interval: Option<u64>,
}

impl DeviceEntry {
    /// An entry with only a host, everything else defaulted. Discovery uses
    /// this for devices that have no static configuration.
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_DEVICE_PORT,
            username: None,
            password: None,
            topic_prefix: None,
            retry_interval: None,
        }
    }

    /// The topic prefix this device publishes under.
    pub fn prefix(&self) -> String {
        match &self.topic_prefix {
            Some(prefix) => prefix.clone(),
            None => self
                .host
                .split('.')
                .next()
                .unwrap_or(&self.host)
                .to_string(),
        }
    }

    /// Retry interval for this device, falling back to the global setting.
    pub fn retry(&self, global_seconds: u64) -> Duration {
        Duration::from_secs(self.retry_interval.unwrap_or(global_seconds))
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        toml::from_str(&contents).map_err(ConfigError::Parse)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [[devices]]
            host = "garage.local"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.retry_interval, 90);
        assert!(!config.discovery.enabled);
        assert_eq!(config.devices.len(), 1);

        let device = &config.devices[0];
        assert_eq!(device.host, "garage.local");
        assert_eq!(device.port, DEFAULT_DEVICE_PORT);
        assert_eq!(device.prefix(), "garage");
        assert_eq!(device.retry(config.retry_interval), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_full_device_entry() {
        let toml = r#"
            retry_interval = 30
            blacklist = ["Utility Light"]

            [logging]
            level = "debug"

            [discovery]
            enabled = true
            timeout_ms = 2000

            [[devices]]
            host = "10.0.0.7"
            port = 8883
            username = "bridge"
            password = "hunter2"
            topic_prefix = "workshop"
            retry_interval = 15
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.timeout(), Duration::from_millis(2000));
        assert_eq!(config.blacklist, vec!["Utility Light"]);

        let device = &config.devices[0];
        assert_eq!(device.port, 8883);
        assert_eq!(device.prefix(), "workshop");
        assert_eq!(device.retry(config.retry_interval), Duration::from_secs(15));
    }

    #[test]
    fn test_empty_config_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.devices.is_empty());
        assert!(config.blacklist.is_empty());
        assert_eq!(config.retry_interval, DEFAULT_RETRY_INTERVAL);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[devices]]\nhost = \"bedroom.local\"\ntopic_prefix = \"bedroom\""
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.devices[0].prefix(), "bedroom");
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file("/nonexistent/esphap.toml");
        assert!(matches!(result, Err(ConfigError::Io(_, _))));
    }

    #[test]
    fn test_bad_toml_is_a_parse_error() {
        let result: Result<Config, _> = toml::from_str("devices = 3").map_err(ConfigError::from);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
