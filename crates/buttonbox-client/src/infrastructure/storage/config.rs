//! TOML-based configuration persistence for the ButtonBox client.
//!
//! Reads and writes [`ClientConfig`] at the platform-appropriate location:
//! - Windows:  `%APPDATA%\ButtonBox\client.toml`
//! - Linux:    `$XDG_CONFIG_HOME/buttonbox/client.toml` or `~/.config/buttonbox/client.toml`
//! - macOS:    `~/Library/Application Support/ButtonBox/client.toml`
//!
//! Example file:
//!
//! ```toml
//! [client]
//! log_level = "info"
//!
//! [endpoint]
//! host = "10.0.0.5"
//! port = 5005
//!
//! [heartbeat]
//! health_check_interval_ms = 5000
//! ping_timeout_ms = 2000
//!
//! [commands]
//! await_ack = false
//! ```
//!
//! # Serde default values
//!
//! Every field has a `#[serde(default = "...")]` so a config file written by
//! an older version, or a hand-written file with only an `[endpoint]`
//! section, still loads.  The `[endpoint]` table is optional; without it the
//! client starts in `NoConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use buttonbox_core::Endpoint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::heartbeat_monitor::{
    CommandAckPolicy, HeartbeatSettings, DEFAULT_COMMAND_MAX_RETRIES,
    DEFAULT_HEALTH_CHECK_INTERVAL, DEFAULT_MAX_FAILED_CHECKS,
    DEFAULT_MIN_SUCCESSES_FOR_CONNECTED, DEFAULT_PING_TIMEOUT,
};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The values parse but cannot drive the heartbeat.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default)]
    pub client: GeneralConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointConfig>,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

/// General client behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneralConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Address of the companion process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
}

/// Heartbeat timing and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatConfig {
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    #[serde(default = "default_max_failed_checks")]
    pub max_failed_checks: u32,
    #[serde(default = "default_min_successes_for_connected")]
    pub min_successes_for_connected: u32,
    #[serde(default = "default_receive_buffer_size")]
    pub receive_buffer_size: usize,
}

/// Command delivery mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandsConfig {
    /// Wait for `MACRO_ACK` and retransmit unacknowledged commands.
    #[serde(default)]
    pub await_ack: bool,
    #[serde(default = "default_ping_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_health_check_interval_ms() -> u64 {
    DEFAULT_HEALTH_CHECK_INTERVAL.as_millis() as u64
}
fn default_ping_timeout_ms() -> u64 {
    DEFAULT_PING_TIMEOUT.as_millis() as u64
}
fn default_max_failed_checks() -> u32 {
    DEFAULT_MAX_FAILED_CHECKS
}
fn default_min_successes_for_connected() -> u32 {
    DEFAULT_MIN_SUCCESSES_FOR_CONNECTED
}
fn default_receive_buffer_size() -> usize {
    buttonbox_core::protocol::RECEIVE_BUFFER_SIZE
}
fn default_max_retries() -> u8 {
    DEFAULT_COMMAND_MAX_RETRIES
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: default_health_check_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            max_failed_checks: default_max_failed_checks(),
            min_successes_for_connected: default_min_successes_for_connected(),
            receive_buffer_size: default_receive_buffer_size(),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            await_ack: false,
            ack_timeout_ms: default_ping_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl ClientConfig {
    /// Checks the values that would make the heartbeat misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let hb = &self.heartbeat;
        if hb.health_check_interval_ms == 0 {
            return Err(invalid("heartbeat.health_check_interval_ms must be > 0"));
        }
        if hb.ping_timeout_ms < 2 {
            return Err(invalid("heartbeat.ping_timeout_ms must be >= 2"));
        }
        if hb.max_failed_checks == 0 {
            return Err(invalid("heartbeat.max_failed_checks must be > 0"));
        }
        if hb.min_successes_for_connected == 0 {
            return Err(invalid("heartbeat.min_successes_for_connected must be > 0"));
        }
        if hb.receive_buffer_size < 512 {
            return Err(invalid("heartbeat.receive_buffer_size must be >= 512"));
        }
        if self.commands.await_ack && self.commands.ack_timeout_ms == 0 {
            return Err(invalid("commands.ack_timeout_ms must be > 0"));
        }
        Ok(())
    }

    /// Converts the stored values into engine settings.
    pub fn heartbeat_settings(&self) -> HeartbeatSettings {
        let hb = &self.heartbeat;
        let command_ack = if self.commands.await_ack {
            CommandAckPolicy::AwaitAck {
                timeout: Duration::from_millis(self.commands.ack_timeout_ms),
                max_retries: self.commands.max_retries,
            }
        } else {
            CommandAckPolicy::FireAndForget
        };
        HeartbeatSettings {
            health_check_interval: Duration::from_millis(hb.health_check_interval_ms),
            ping_timeout: Duration::from_millis(hb.ping_timeout_ms),
            max_failed_checks: hb.max_failed_checks,
            min_successes_for_connected: hb.min_successes_for_connected,
            receive_buffer_size: hb.receive_buffer_size,
            command_ack,
        }
    }

    /// The configured endpoint, if present and complete.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint
            .as_ref()
            .and_then(|e| Endpoint::new(e.host.clone(), e.port))
    }

    /// Replaces (or removes) the stored endpoint.
    pub fn set_endpoint(&mut self, endpoint: Option<&Endpoint>) {
        self.endpoint = endpoint.map(|e| EndpointConfig {
            host: e.host.clone(),
            port: e.port,
        });
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid(reason.to_string())
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Reads and writes one config file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// A store for an explicit file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A store for the platform-default file path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoPlatformConfigDir`] when the base directory
    /// cannot be determined from the environment.
    pub fn at_default_location() -> Result<Self, ConfigError> {
        let dir = platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)?;
        Ok(Self::new(dir.join("client.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the config, returning defaults if the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system errors other than "not
    /// found", [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for unusable values.
    pub fn load(&self) -> Result<ClientConfig, ConfigError> {
        let config = match std::fs::read_to_string(&self.path) {
            Ok(content) => toml::from_str::<ClientConfig>(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ClientConfig::default(),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Persists `config`, creating the parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system failures or
    /// [`ConfigError::Serialize`] if serialization fails.
    pub fn save(&self, config: &ClientConfig) -> Result<(), ConfigError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let content = toml::to_string_pretty(config)?;
        std::fs::write(&self.path, content).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Resolves the platform config directory including the `ButtonBox` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("ButtonBox"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("ButtonBox")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("buttonbox"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
