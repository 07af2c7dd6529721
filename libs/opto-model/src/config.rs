//! Service configuration.
//!
//! Loaded from a JSON file with `OPTOLINK_`-prefixed environment variables
//! layered on top, then validated before anything touches the serial link.
//! Folder and file name patterns are chrono strftime strings; the poll loop
//! substitutes the pass timestamp into them.

use std::path::Path;

use figment::{
    providers::{Env, Format, Json},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::register::RegisterSpec;

/// Configuration loading or validation failure.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// The heating units to poll. Each device gets its own polling loop and
    /// serial session; nothing is shared between them but the log sink.
    pub devices: Vec<DeviceConfig>,

    /// Optional connectivity checks, each running its own loop.
    #[serde(default)]
    pub online_checks: Vec<OnlineCheckEntry>,

    /// Optional local toggle page.
    #[serde(default)]
    pub web: Option<WebConfig>,
}

/// One polled device: serial link, register list, pacing and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    pub device: String,

    /// Seconds between the start of consecutive sampling passes.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Request-window limits of the half-duplex protocol.
    #[serde(default)]
    pub window: WindowLimits,

    /// Log folder pattern (strftime), relative to the data directory.
    #[serde(default)]
    pub log_folder: String,

    /// Log file name pattern (strftime).
    pub log_file_pattern: String,

    /// Registers to sample, in log column order.
    pub registers: Vec<RegisterSpec>,

    /// Alarm mail transport; alarms are disabled entirely when absent.
    #[serde(default)]
    pub alarm_smtp: Option<SmtpConfig>,
}

fn default_interval_secs() -> u64 {
    10
}

/// How many requests one sync handshake is good for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowLimits {
    /// Requests answered per handshake before the device needs a new sync.
    #[serde(default = "default_max_requests")]
    pub max_requests_per_handshake: u32,

    /// Elapsed-time bound per handshake in milliseconds. The effective
    /// ceiling is `min(750, max_window_millis)`; the device itself stops
    /// answering after roughly 750 ms regardless of configuration.
    #[serde(default = "default_max_window_millis")]
    pub max_window_millis: u64,
}

fn default_max_requests() -> u32 {
    8
}

fn default_max_window_millis() -> u64 {
    750
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            max_requests_per_handshake: default_max_requests(),
            max_window_millis: default_max_window_millis(),
        }
    }
}

/// Alarm mail transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Use implicit TLS; plain connection otherwise.
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from: String,
    pub to: String,
    /// Base subject line; dispatch prefixes `Coming: ` / `Going: `.
    pub subject: String,
}

fn default_smtp_port() -> u16 {
    25
}

/// One connectivity-check target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineCheckEntry {
    pub url: String,
    #[serde(default = "default_check_interval_secs")]
    pub interval_secs: u64,
    /// Log folder pattern (strftime), relative to the data directory.
    #[serde(default)]
    pub folder: String,
    /// Log file name pattern (strftime).
    pub file_pattern: String,
    /// Per-hit log line pattern (strftime).
    pub log_pattern: String,
}

fn default_check_interval_secs() -> u64 {
    60
}

/// Local toggle page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

fn default_web_host() -> String {
    "0.0.0.0".to_string()
}

fn default_web_port() -> u16 {
    8000
}

/// Load and validate the configuration.
///
/// Sources, lowest priority first: the JSON file, then environment
/// variables prefixed `OPTOLINK_` (nested fields separated by `__`, e.g.
/// `OPTOLINK_DEVICE__INTERVAL_SECS=30`).
pub fn load(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let figment = Figment::new()
        .merge(Json::file(path.as_ref()))
        .merge(Env::prefixed("OPTOLINK_").split("__"));

    let config: AppConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}

impl AppConfig {
    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one device must be configured".to_string(),
            ));
        }
        for device in &self.devices {
            device.validate()?;
        }
        for entry in &self.online_checks {
            if entry.url.is_empty() {
                return Err(ConfigError::Invalid(
                    "online check URL cannot be empty".to_string(),
                ));
            }
            if entry.interval_secs == 0 {
                return Err(ConfigError::Invalid(
                    "online check interval must be greater than zero".to_string(),
                ));
            }
            if entry.file_pattern.is_empty() {
                return Err(ConfigError::Invalid(
                    "online check file pattern cannot be empty".to_string(),
                ));
            }
            validate_pattern(&entry.folder, "online check folder")?;
            validate_pattern(&entry.file_pattern, "online check file pattern")?;
            validate_pattern(&entry.log_pattern, "online check log pattern")?;
        }
        Ok(())
    }
}

/// Patterns are substituted with chrono's strftime at runtime; a bad token
/// there would only surface mid-pass, so catch it at load time.
fn validate_pattern(pattern: &str, what: &str) -> Result<(), ConfigError> {
    use chrono::format::{Item, StrftimeItems};
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(ConfigError::Invalid(format!(
            "{what} is not a valid strftime pattern: '{pattern}'"
        )));
    }
    Ok(())
}

impl DeviceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.device.is_empty() {
            return Err(ConfigError::Invalid(
                "serial device path cannot be empty".to_string(),
            ));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.log_file_pattern.is_empty() {
            return Err(ConfigError::Invalid(
                "log file pattern cannot be empty".to_string(),
            ));
        }
        if self.registers.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one register must be configured".to_string(),
            ));
        }
        validate_pattern(&self.log_folder, "log folder")?;
        validate_pattern(&self.log_file_pattern, "log file pattern")?;
        for spec in &self.registers {
            if spec.byte_length == 0 || spec.byte_length > 4 {
                return Err(ConfigError::Invalid(format!(
                    "register 0x{:X}: byte length must be 1..=4, got {}",
                    spec.address, spec.byte_length
                )));
            }
            if spec.decimal_places > 6 {
                return Err(ConfigError::Invalid(format!(
                    "register 0x{:X}: decimal places must be at most 6, got {}",
                    spec.address, spec.decimal_places
                )));
            }
        }
        if self.window.max_requests_per_handshake == 0 {
            return Err(ConfigError::Invalid(
                "max requests per handshake must be greater than zero".to_string(),
            ));
        }
        if let Some(smtp) = &self.alarm_smtp {
            if smtp.server.is_empty() || smtp.from.is_empty() || smtp.to.is_empty() {
                return Err(ConfigError::Invalid(
                    "alarm SMTP settings need server, from and to".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "devices": [{
            "device": "/dev/ttyUSB0",
            "interval_secs": 60,
            "window": { "max_requests_per_handshake": 4, "max_window_millis": 900 },
            "log_folder": "%Y-%m",
            "log_file_pattern": "heizung-%Y-%m-%d.log",
            "registers": [
                {
                    "label": "Kesseltemperatur",
                    "address": "0x0802",
                    "alarm_hi": 95.0,
                    "alarm_hi_delay_count": 2
                },
                { "address": 21553, "byte_length": 4, "format": "hhmmss" }
            ],
            "alarm_smtp": {
                "server": "smtp.example.org",
                "port": 465,
                "ssl": true,
                "username": "heizung",
                "password": "secret",
                "from": "heizung@example.org",
                "to": "owner@example.org",
                "subject": "Heizung Alarm"
            }
        }],
        "online_checks": [
            {
                "url": "http://tv.local/",
                "interval_secs": 300,
                "file_pattern": "online-%Y-%m.log",
                "log_pattern": "%H:%M:%S online"
            }
        ],
        "web": { "port": 8000 }
    }"#;

    fn write_sample(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("optolink.json");
        std::fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    fn test_load_full_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(write_sample(&dir)).unwrap();

        assert_eq!(config.devices.len(), 1);
        let device = &config.devices[0];
        assert_eq!(device.device, "/dev/ttyUSB0");
        assert_eq!(device.interval_secs, 60);
        assert_eq!(device.window.max_requests_per_handshake, 4);
        assert_eq!(device.window.max_window_millis, 900);
        assert_eq!(device.registers.len(), 2);
        assert_eq!(device.registers[0].address, 0x0802);
        assert_eq!(device.registers[0].alarm_hi, Some(95.0));
        assert_eq!(device.registers[1].address, 21553);
        assert_eq!(device.registers[1].byte_length, 4);

        let smtp = device.alarm_smtp.as_ref().unwrap();
        assert!(smtp.ssl);
        assert_eq!(smtp.port, 465);

        assert_eq!(config.online_checks.len(), 1);
        assert_eq!(config.online_checks[0].interval_secs, 300);
        assert_eq!(config.web.as_ref().unwrap().port, 8000);
        assert_eq!(config.web.as_ref().unwrap().host, "0.0.0.0");
    }

    /// Wraps one device JSON fragment into a full application config.
    fn config_with_device(device_json: &str) -> AppConfig {
        serde_json::from_str(&format!(r#"{{ "devices": [{device_json}] }}"#)).unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = config_with_device(
            r#"{
                "device": "/dev/ttyUSB0",
                "log_file_pattern": "heizung.log",
                "registers": [ { "address": 1 } ]
            }"#,
        );
        let device = &config.devices[0];
        assert_eq!(device.interval_secs, 10);
        assert_eq!(device.window.max_requests_per_handshake, 8);
        assert_eq!(device.window.max_window_millis, 750);
        assert!(device.alarm_smtp.is_none());
        assert!(config.online_checks.is_empty());
        assert!(config.web.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_no_devices() {
        let config: AppConfig = serde_json::from_str(r#"{ "devices": [] }"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_registers() {
        let config = config_with_device(
            r#"{
                "device": "/dev/ttyUSB0",
                "log_file_pattern": "heizung.log",
                "registers": []
            }"#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_byte_length() {
        let config = config_with_device(
            r#"{
                "device": "/dev/ttyUSB0",
                "log_file_pattern": "heizung.log",
                "registers": [ { "address": 1, "byte_length": 5 } ]
            }"#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let config = config_with_device(
            r#"{
                "device": "/dev/ttyUSB0",
                "interval_secs": 0,
                "log_file_pattern": "heizung.log",
                "registers": [ { "address": 1 } ]
            }"#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_strftime_pattern() {
        let config = config_with_device(
            r#"{
                "device": "/dev/ttyUSB0",
                "log_file_pattern": "heizung-%Q!.log",
                "registers": [ { "address": 1 } ]
            }"#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_incomplete_smtp() {
        let config = config_with_device(
            r#"{
                "device": "/dev/ttyUSB0",
                "log_file_pattern": "heizung.log",
                "registers": [ { "address": 1 } ],
                "alarm_smtp": {
                    "server": "",
                    "from": "a@b.c",
                    "to": "d@e.f",
                    "subject": "Alarm"
                }
            }"#,
        );
        assert!(config.validate().is_err());
    }
}
