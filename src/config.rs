use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
pub const DEFAULT_API_LISTEN: &str = "0.0.0.0:8081";
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_TELEMETRY_APP: &str = "FT-WABATAR";
pub const DEFAULT_MAX_OUTSTANDING: usize = 100;
pub const DEFAULT_TELEMETRY_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP address for `/v1/status` and `/v1/setpoint`.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Line-JSON API used by `wabatar-ctl`.
    #[serde(default = "default_api_listen")]
    pub api_listen: String,
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub url: String,
    #[serde(default = "default_telemetry_app")]
    pub app: String,
    #[serde(default = "default_max_outstanding")]
    pub max_outstanding: usize,
    /// Per-request limit; a stalled collector frees its slot once this expires.
    #[serde(default = "default_telemetry_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration lists no devices")]
    NoDevices,
    #[error("device name must not be empty")]
    EmptyName,
    #[error("cannot have two devices with the same name: {0}")]
    DuplicateDevice(String),
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_api_listen() -> String {
    DEFAULT_API_LISTEN.to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_telemetry_app() -> String {
    DEFAULT_TELEMETRY_APP.to_string()
}

fn default_max_outstanding() -> usize {
    DEFAULT_MAX_OUTSTANDING
}

fn default_telemetry_timeout_ms() -> u64 {
    DEFAULT_TELEMETRY_TIMEOUT_MS
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.name.is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if !seen.insert(device.name.as_str()) {
                return Err(ConfigError::DuplicateDevice(device.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_applied() {
        let config =
            Config::from_json(r#"{"devices":[{"name":"avatar","port":"/dev/ttyUSB0"}]}"#).unwrap();

        assert_eq!(config.listen, DEFAULT_LISTEN);
        assert_eq!(config.api_listen, DEFAULT_API_LISTEN);
        assert_eq!(config.devices[0].baud_rate, DEFAULT_BAUD_RATE);
        assert!(config.telemetry.is_none());
    }

    #[test]
    fn test_telemetry_defaults() {
        let config = Config::from_json(
            r#"{"devices":[{"name":"a","port":"p"}],"telemetry":{"url":"http://collector/ft.gif"}}"#,
        )
        .unwrap();

        let telemetry = config.telemetry.unwrap();
        assert_eq!(telemetry.app, DEFAULT_TELEMETRY_APP);
        assert_eq!(telemetry.max_outstanding, DEFAULT_MAX_OUTSTANDING);
        assert_eq!(telemetry.timeout_ms, DEFAULT_TELEMETRY_TIMEOUT_MS);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Config::from_json(
            r#"{"devices":[{"name":"a","port":"p1"},{"name":"a","port":"p2"}]}"#,
        );
        assert!(matches!(result, Err(ConfigError::DuplicateDevice(name)) if name == "a"));
    }

    #[test]
    fn test_empty_device_list_rejected() {
        assert!(matches!(
            Config::from_json(r#"{"devices":[]}"#),
            Err(ConfigError::NoDevices)
        ));
        assert!(matches!(
            Config::from_json(r#"{"devices":[{"name":"","port":"p"}]}"#),
            Err(ConfigError::EmptyName)
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"listen":"127.0.0.1:9000","devices":[{{"name":"lab","port":"/dev/ttyS1","baud_rate":19200}}]}}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.devices[0].name, "lab");
        assert_eq!(config.devices[0].baud_rate, 19200);

        assert!(matches!(
            Config::load(file.path().with_extension("missing")),
            Err(ConfigError::Io(_))
        ));
    }
}
