#![deny(unsafe_code)]

//! Configuration loading and validation for solo.
//!
//! Loads TOML configuration files and validates them. Provides the
//! [`AppConfig`] type as the central configuration structure. Every section
//! and field has a default, so an empty file (or no file at all) yields a
//! working single-instance setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// The endpoint name shared by every instance of the application.
pub const DEFAULT_ENDPOINT_NAME: &str = "solo-instance";

/// Default log message pattern.
pub const DEFAULT_MESSAGE_PATTERN: &str = "%{time} %{type} %{category}: %{message}";

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Local rendezvous endpoint.
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Dispatch client timeouts.
    #[serde(default)]
    pub client: ClientConfig,

    /// Resident server behaviour.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging defaults applied at startup.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Periodic background work of the resident instance.
    #[serde(default)]
    pub ticker: TickerConfig,
}

/// Where the local endpoint lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Endpoint name. Must be identical across instances that should find
    /// each other.
    #[serde(default = "default_endpoint_name")]
    pub name: String,

    /// Directory holding the socket and guard lock. Falls back to
    /// `$XDG_RUNTIME_DIR`, then the system temp directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: default_endpoint_name(),
            dir: None,
        }
    }
}

fn default_endpoint_name() -> String {
    DEFAULT_ENDPOINT_NAME.to_string()
}

/// Timeouts used by an invocation probing for a resident instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Bound on connecting to the endpoint.
    #[serde(default = "default_client_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bound on flushing the request.
    #[serde(default = "default_client_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Bound on waiting for the first reply bytes.
    #[serde(default = "default_client_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Dispatch attempts after losing the endpoint to a concurrent invocation.
    #[serde(default = "default_race_retries")]
    pub race_retries: u32,

    /// Delay between those attempts.
    #[serde(default = "default_race_retry_delay_ms")]
    pub race_retry_delay_ms: u64,
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn race_retry_delay(&self) -> Duration {
        Duration::from_millis(self.race_retry_delay_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_client_timeout_ms(),
            write_timeout_ms: default_client_timeout_ms(),
            read_timeout_ms: default_client_timeout_ms(),
            race_retries: default_race_retries(),
            race_retry_delay_ms: default_race_retry_delay_ms(),
        }
    }
}

fn default_client_timeout_ms() -> u64 {
    300
}

fn default_race_retries() -> u32 {
    5
}

fn default_race_retry_delay_ms() -> u64 {
    50
}

/// Resident server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Upper bound on bytes consumed from a single readiness event.
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,

    /// Bound on writing a response back to a peer.
    #[serde(default = "default_server_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Shut down the write half after answering. When false the connection
    /// stays open for further rounds until the peer closes it.
    #[serde(default)]
    pub close_after_response: bool,
}

impl ServerConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: default_max_request_bytes(),
            write_timeout_ms: default_server_write_timeout_ms(),
            close_after_response: false,
        }
    }
}

fn default_max_request_bytes() -> usize {
    64 * 1024
}

fn default_server_write_timeout_ms() -> u64 {
    1000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directives (e.g. `"info"`, `"info,solo_core::ticker=off"`).
    /// `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_rules")]
    pub rules: String,

    /// Message pattern with `%{...}` placeholders.
    #[serde(default = "default_message_pattern")]
    pub message_pattern: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            rules: default_log_rules(),
            message_pattern: default_message_pattern(),
        }
    }
}

fn default_log_rules() -> String {
    "info".to_string()
}

fn default_message_pattern() -> String {
    DEFAULT_MESSAGE_PATTERN.to_string()
}

/// Periodic background messages emitted by the resident instance.
///
/// An interval of `0` disables that particular loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerConfig {
    #[serde(default = "default_ticker_enabled")]
    pub enabled: bool,

    #[serde(default = "default_debug_interval_ms")]
    pub debug_interval_ms: u64,

    #[serde(default = "default_info_interval_ms")]
    pub info_interval_ms: u64,

    #[serde(default = "default_warn_interval_ms")]
    pub warn_interval_ms: u64,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            enabled: default_ticker_enabled(),
            debug_interval_ms: default_debug_interval_ms(),
            info_interval_ms: default_info_interval_ms(),
            warn_interval_ms: default_warn_interval_ms(),
        }
    }
}

fn default_ticker_enabled() -> bool {
    true
}

fn default_debug_interval_ms() -> u64 {
    50
}

fn default_info_interval_ms() -> u64 {
    300
}

fn default_warn_interval_ms() -> u64 {
    3000
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading configuration");
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.endpoint.name;
        if name.is_empty() {
            return Err(ConfigError::Validation(
                "endpoint.name must not be empty".to_string(),
            ));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(ConfigError::Validation(format!(
                "endpoint.name must not contain a path separator, got {name:?}"
            )));
        }

        let timeouts = [
            ("client.connect_timeout_ms", self.client.connect_timeout_ms),
            ("client.write_timeout_ms", self.client.write_timeout_ms),
            ("client.read_timeout_ms", self.client.read_timeout_ms),
            ("server.write_timeout_ms", self.server.write_timeout_ms),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "{field} must be non-zero"
                )));
            }
        }

        if self.server.max_request_bytes == 0 {
            return Err(ConfigError::Validation(
                "server.max_request_bytes must be non-zero".to_string(),
            ));
        }

        if self.logging.rules.trim().is_empty() {
            return Err(ConfigError::Validation(
                "logging.rules must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
