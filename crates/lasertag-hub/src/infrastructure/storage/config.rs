//! TOML-based configuration persistence for the hub.
//!
//! ```toml
//! [log]
//! level = "info"
//!
//! [transport]
//! mode = "local"            # or "cloud"
//! # session_id = "arena-7"  # required in cloud mode
//! device_port = 80
//! ws_path = "/ws"
//!
//! [link]
//! heartbeat_interval_ms = 5000
//! heartbeat_timeout_ms = 10000
//! ack_timeout_ms = 5000
//! backoff_base_ms = 1000
//! backoff_cap_ms = 30000
//!
//! [[devices]]
//! id = "w1"
//! address = "192.168.4.21"
//! ```
//!
//! Every field has a serde default, so partial files (and no file at all)
//! are valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::link::LinkConfig;
use crate::application::registry::RegistryOptions;
use crate::domain::{ReconnectPolicy, TransportMode};
use crate::infrastructure::transport::local::{DEFAULT_DEVICE_PORT, DEFAULT_WS_PATH};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("cloud mode requires transport.session_id")]
    MissingSessionId,

    #[error("invalid config value: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HubConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub link: LinkSettings,
    /// Devices registered at start-up.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Local,
    Cloud,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    #[serde(default)]
    pub mode: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Port used for device addresses that do not carry one.
    #[serde(default = "default_device_port")]
    pub device_port: u16,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

/// Link timing as stored on disk (milliseconds).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkSettings {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// Connect each device as soon as it is registered.
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceEntry {
    pub id: String,
    pub address: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_device_port() -> u16 {
    DEFAULT_DEVICE_PORT
}
fn default_ws_path() -> String {
    DEFAULT_WS_PATH.to_string()
}
fn default_true() -> bool {
    true
}
fn default_heartbeat_interval_ms() -> u64 {
    5_000
}
fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_ack_timeout_ms() -> u64 {
    5_000
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_backoff_cap_ms() -> u64 {
    30_000
}
fn default_backoff_jitter() -> f64 {
    0.2
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportKind::default(),
            session_id: None,
            device_port: default_device_port(),
            ws_path: default_ws_path(),
        }
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            auto_reconnect: default_true(),
            auto_connect: default_true(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_factor: default_backoff_factor(),
            backoff_cap_ms: default_backoff_cap_ms(),
            backoff_jitter: default_backoff_jitter(),
        }
    }
}

// ── Load / save ───────────────────────────────────────────────────────────────

impl HubConfig {
    /// Loads the config at `path`, returning defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system errors other than "not
    /// found" and [`ConfigError::Parse`] if the TOML is malformed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Writes the config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    // ── Conversions ───────────────────────────────────────────────────────────

    /// The session's transport mode.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSessionId`] in cloud mode without a
    /// non-empty session id.
    pub fn transport_mode(&self) -> Result<TransportMode, ConfigError> {
        match self.transport.mode {
            TransportKind::Local => Ok(TransportMode::Local),
            TransportKind::Cloud => match self.transport.session_id.as_deref() {
                Some(session_id) if !session_id.trim().is_empty() => {
                    Ok(TransportMode::cloud(session_id))
                }
                _ => Err(ConfigError::MissingSessionId),
            },
        }
    }

    /// Link timing, validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for zero intervals, a heartbeat
    /// timeout not longer than the interval, or backoff values out of range.
    pub fn link_config(&self) -> Result<LinkConfig, ConfigError> {
        let link = &self.link;
        for (name, value) in [
            ("heartbeat_interval_ms", link.heartbeat_interval_ms),
            ("heartbeat_timeout_ms", link.heartbeat_timeout_ms),
            ("connect_timeout_ms", link.connect_timeout_ms),
            ("ack_timeout_ms", link.ack_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("link.{name} must be positive")));
            }
        }
        if link.heartbeat_timeout_ms <= link.heartbeat_interval_ms {
            return Err(ConfigError::Invalid(
                "link.heartbeat_timeout_ms must exceed link.heartbeat_interval_ms".to_string(),
            ));
        }
        if link.backoff_factor.is_nan() || link.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "link.backoff_factor must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&link.backoff_jitter) {
            return Err(ConfigError::Invalid(
                "link.backoff_jitter must lie in [0, 1]".to_string(),
            ));
        }

        Ok(LinkConfig {
            heartbeat_interval: Duration::from_millis(link.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(link.heartbeat_timeout_ms),
            connect_timeout: Duration::from_millis(link.connect_timeout_ms),
            ack_timeout: Duration::from_millis(link.ack_timeout_ms),
            auto_reconnect: link.auto_reconnect,
            reconnect: ReconnectPolicy {
                base: Duration::from_millis(link.backoff_base_ms),
                factor: link.backoff_factor,
                cap: Duration::from_millis(link.backoff_cap_ms),
                jitter: link.backoff_jitter,
            },
        })
    }

    pub fn registry_options(&self) -> Result<RegistryOptions, ConfigError> {
        Ok(RegistryOptions {
            link: self.link_config()?,
            auto_connect: self.link.auto_connect,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
