use clap::ArgMatches;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = ".cc2mqtt.conf";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Client identification, also used as the MQTT client id
    pub client_name: String,

    pub serial: SerialConfig,
    pub mqtt: MqttConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    /// Prefix for liveness records (`status`, `version`, `ip`, `pid`, `ping`).
    pub client_topic: String,
    /// Prefix for per-reading telemetry.
    pub base_topic: String,
    pub request_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub reconnect_backoff_secs: u64,
    pub quiescence_secs: u64,
    pub tick_secs: u64,
    pub reading_interval_secs: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 57600,
            read_timeout_secs: 10,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive_secs: 60,
            client_topic: "/clients/cc2mqtt/".to_string(),
            base_topic: "/raw/currentcost/cc128/".to_string(),
            request_capacity: 64,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff_secs: 30,
            quiescence_secs: 20,
            tick_secs: 10,
            reading_interval_secs: 0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_name: "cc2mqtt".to_string(),
            serial: SerialConfig::default(),
            mqtt: MqttConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl TimingConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn quiescence(&self) -> Duration {
        Duration::from_secs(self.quiescence_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn reading_interval(&self) -> Option<Duration> {
        (self.reading_interval_secs > 0).then(|| Duration::from_secs(self.reading_interval_secs))
    }
}

impl Config {
    /// Resolves the configuration for a run: file first (explicit `--config`,
    /// else `~/.cc2mqtt.conf` when it exists), then command line overrides.
    pub fn load(matches: &ArgMatches) -> Result<Self, ConfigError> {
        let mut config = match matches.get_one::<String>("config") {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_matches(matches)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_matches(&mut self, matches: &ArgMatches) -> Result<(), ConfigError> {
        if let Some(port) = matches.get_one::<String>("port") {
            self.serial.port = port.clone();
        }
        if let Some(baud) = matches.get_one::<String>("baud") {
            self.serial.baud_rate = baud
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("baud rate '{}' is not a number", baud)))?;
        }
        if let Some(host) = matches.get_one::<String>("broker") {
            self.mqtt.host = host.clone();
        }
        if let Some(port) = matches.get_one::<String>("broker-port") {
            self.mqtt.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("broker port '{}' is not a number", port)))?;
        }
        if let Some(topic) = matches.get_one::<String>("client-topic") {
            self.mqtt.client_topic = topic.clone();
        }
        if let Some(topic) = matches.get_one::<String>("base-topic") {
            self.mqtt.base_topic = topic.clone();
        }
        Ok(())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        info!("📄 Loading configuration from {}", path.as_ref().display());
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        // Create directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_name.is_empty() {
            return Err(ConfigError::Invalid("client_name must not be empty".into()));
        }
        if self.serial.port.is_empty() {
            return Err(ConfigError::Invalid("serial port must not be empty".into()));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud rate must be greater than zero".into()));
        }
        if self.serial.read_timeout_secs == 0 {
            return Err(ConfigError::Invalid("read_timeout_secs must be greater than zero".into()));
        }
        if self.mqtt.host.is_empty() {
            return Err(ConfigError::Invalid("broker host must not be empty".into()));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::Invalid("broker port must not be zero".into()));
        }
        // Topics are built by plain concatenation
        for (name, topic) in [("client_topic", &self.mqtt.client_topic), ("base_topic", &self.mqtt.base_topic)] {
            if !topic.ends_with('/') {
                return Err(ConfigError::Invalid(format!("{} '{}' must end with '/'", name, topic)));
            }
        }
        if self.mqtt.keep_alive_secs == 0 {
            return Err(ConfigError::Invalid("keep_alive_secs must be greater than zero".into()));
        }
        if self.timing.tick_secs == 0 {
            return Err(ConfigError::Invalid("tick_secs must be greater than zero".into()));
        }
        if self.mqtt.request_capacity == 0 {
            return Err(ConfigError::Invalid("request_capacity must be greater than zero".into()));
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(DEFAULT_CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_device_and_broker_conventions() {
        let config = Config::default();
        assert_eq!(config.serial.baud_rate, 57600);
        assert_eq!(config.serial.read_timeout(), Duration::from_secs(10));
        assert_eq!(config.timing.reconnect_backoff(), Duration::from_secs(30));
        assert_eq!(config.timing.quiescence(), Duration::from_secs(20));
        assert_eq!(config.timing.tick(), Duration::from_secs(10));
        assert_eq!(config.timing.reading_interval(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [serial]
            port = "/dev/ttyS1"

            [mqtt]
            host = "broker.local"
            "#,
        )
        .unwrap();

        assert_eq!(config.serial.port, "/dev/ttyS1");
        assert_eq!(config.serial.baud_rate, 57600);
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.client_name, "cc2mqtt");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join(format!("cc2mqtt-config-{}", std::process::id()));
        let path = dir.join("cc2mqtt.toml");

        let mut config = Config::default();
        config.mqtt.host = "10.0.0.5".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, config);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_validate_rejects_topic_without_separator() {
        let mut config = Config::default();
        config.mqtt.base_topic = "/raw/currentcost".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let mut config = Config::default();
        config.serial.read_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.timing.tick_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.mqtt.keep_alive_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        // Zero is the documented "off" value for the reading interval
        let mut config = Config::default();
        config.timing.reading_interval_secs = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_baud() {
        let mut config = Config::default();
        config.serial.baud_rate = 0;
        assert!(config.validate().is_err());
    }
}
