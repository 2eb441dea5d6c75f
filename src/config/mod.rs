//! # Configuration Management Module
//!
//! Settings for the uploader live in a TOML file (default `wsjtx2eqsl.toml`).
//! The file holds the eQSL.cc password, so [`Config::save`] restricts it to
//! the owner on Unix.
//!
//! ## Configuration Structure
//!
//! - [`EqslConfig`] - account credentials, auto-upload default, endpoint and timeout
//! - [`ListenerConfig`] - UDP address/port WSJT-X broadcasts to
//! - [`DisplayConfig`] - status refresh cadence
//! - [`LoggingConfig`] - log level and files
//!
//! ## Configuration File Format
//!
//! ```toml
//! [eqsl]
//! username = "K5JCJ"
//! password = "secret"
//! auto_upload = true
//! endpoint = "https://www.eqsl.cc/qslcard/ImportADIF.cfm"
//! timeout_seconds = 10
//!
//! [listener]
//! bind_address = "0.0.0.0"
//! port = 2333
//!
//! [display]
//! tick_ms = 1000
//!
//! [logging]
//! level = "info"
//! file = "wsjtx2eqsl.log"
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use wsjtx2eqsl::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("wsjtx2eqsl.toml").await?;
//!     config.validate()?;
//!     println!("Listening on UDP port {}", config.listener.port);
//!     Ok(())
//! }
//! ```
//!
//! The core only ever reads these values. The one setting it observes live is
//! `auto_upload`, handed to the bridge as a `tokio::sync::watch` receiver.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

pub const DEFAULT_UDP_PORT: u16 = 2333;
pub const DEFAULT_EQSL_ENDPOINT: &str = "https://www.eqsl.cc/qslcard/ImportADIF.cfm";

/// Problems that make a configuration unusable for `start`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("eQSL.cc username is empty (run `wsjtx2eqsl credentials`)")]
    MissingUsername,
    #[error("eQSL.cc password is empty (run `wsjtx2eqsl credentials`)")]
    MissingPassword,
    #[error("listener port must be non-zero")]
    InvalidPort,
    #[error("request timeout must be between 1 and 120 seconds (got {0})")]
    InvalidTimeout(u64),
    #[error("display tick must be at least 100ms (got {0})")]
    InvalidTick(u64),
    #[error("endpoint must be an http(s) URL (got '{0}')")]
    InvalidEndpoint(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub eqsl: EqslConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EqslConfig {
    /// eQSL.cc account name, normally the operator's callsign.
    pub username: String,
    pub password: String,
    /// Upload each decoded contact as it arrives. Can be toggled at runtime.
    #[serde(default = "default_auto_upload")]
    pub auto_upload: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Bound on a single upload request, connect through response body.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Receive buffer size; larger datagrams are truncated by the OS.
    #[serde(default = "default_max_datagram")]
    pub max_datagram_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    /// Separate append-only record of contacts and upload outcomes.
    #[serde(default)]
    pub qso_file: Option<String>,
}

fn default_auto_upload() -> bool {
    true
}

fn default_endpoint() -> String {
    DEFAULT_EQSL_ENDPOINT.to_string()
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_UDP_PORT
}

fn default_max_datagram() -> usize {
    8192
}

fn default_tick_ms() -> u64 {
    1000
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_datagram_bytes: default_max_datagram(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("wsjtx2eqsl.log".to_string()),
            qso_file: None,
        }
    }
}

impl Default for EqslConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            auto_upload: default_auto_upload(),
            endpoint: default_endpoint(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            eqsl: EqslConfig::default(),
            listener: ListenerConfig::default(),
            display: DisplayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EqslConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl ListenerConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl DisplayConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Write the configuration, owner read/write only on Unix.
    pub async fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| anyhow!("Failed to restrict permissions on {}: {}", path, e))?;
        }

        Ok(())
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        Config::default().save(path).await
    }

    /// Check everything `start` depends on.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.eqsl.username.trim().is_empty() {
            return Err(ConfigError::MissingUsername);
        }
        if self.eqsl.password.is_empty() {
            return Err(ConfigError::MissingPassword);
        }
        if !(1..=120).contains(&self.eqsl.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.eqsl.timeout_seconds));
        }
        let endpoint = self.eqsl.endpoint.to_ascii_lowercase();
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(ConfigError::InvalidEndpoint(self.eqsl.endpoint.clone()));
        }
        if self.listener.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.display.tick_ms < 100 {
            return Err(ConfigError::InvalidTick(self.display.tick_ms));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Config {
        let mut config = Config::default();
        config.eqsl.username = "K5JCJ".to_string();
        config.eqsl.password = "hunter22".to_string();
        config
    }

    #[test]
    fn defaults_match_wsjtx_setup() {
        let config = Config::default();
        assert_eq!(config.listener.port, 2333);
        assert_eq!(config.listener.socket_addr(), "0.0.0.0:2333");
        assert!(config.eqsl.auto_upload);
        assert_eq!(config.eqsl.timeout(), Duration::from_secs(10));
        assert_eq!(config.display.tick(), Duration::from_secs(1));
    }

    #[test]
    fn default_config_needs_credentials() {
        assert_eq!(Config::default().validate(), Err(ConfigError::MissingUsername));
        let mut config = configured();
        config.eqsl.password.clear();
        assert_eq!(config.validate(), Err(ConfigError::MissingPassword));
        assert_eq!(configured().validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = configured();
        config.listener.port = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort));

        let mut config = configured();
        config.eqsl.timeout_seconds = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidTimeout(0)));

        let mut config = configured();
        config.eqsl.endpoint = "ftp://eqsl.cc".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidEndpoint(_))));

        let mut config = configured();
        config.display.tick_ms = 10;
        assert_eq!(config.validate(), Err(ConfigError::InvalidTick(10)));
    }

    #[test]
    fn minimal_toml_fills_defaults() {
        let text = r#"
            [eqsl]
            username = "W1AW"
            password = "pw"
            auto_upload = false
        "#;
        let config: Config = toml::from_str(text).expect("parse");
        assert!(!config.eqsl.auto_upload);
        assert_eq!(config.eqsl.endpoint, DEFAULT_EQSL_ENDPOINT);
        assert_eq!(config.listener.port, DEFAULT_UDP_PORT);
        assert_eq!(config.logging.level, "info");
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("wsjtx2eqsl.toml");
        let path = path.to_str().expect("utf8 path");

        let mut config = configured();
        config.listener.port = 2237;
        config.save(path).await.expect("save");

        let loaded = Config::load(path).await.expect("load");
        assert_eq!(loaded.eqsl.username, "K5JCJ");
        assert_eq!(loaded.listener.port, 2237);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(path).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
