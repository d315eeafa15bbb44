//! TOML Configuration File Support
//!
//! Centralized configuration loading for the session client, with a TOML
//! file at `~/.config/chat-session/client.toml`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller after loading)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [transport]
//! base_url = "https://chat.example.com"
//! open_timeout_ms = 10000
//! send_timeout_ms = 30000
//! socket_enabled = true
//!
//! [reconnect]
//! base_delay_ms = 1000
//! max_attempts = 5
//!
//! [heartbeat]
//! # Only for servers that answer `ping` frames
//! enabled = false
//! ping_interval_ms = 30000
//! latency_window = 10
//!
//! [limits]
//! max_message_chars = 50000
//! history_page_size = 50
//! history_max_pages = 4
//! event_capacity = 256
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::latency::HeartbeatConfig;
use crate::reconnect::ReconnectConfig;
use crate::transport::config::TransportConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Transport section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportToml {
    /// Server base URL
    pub base_url: Option<String>,

    /// Open timeout per transport in milliseconds
    pub open_timeout_ms: Option<u64>,

    /// Timeout for one outbound call in milliseconds
    pub send_timeout_ms: Option<u64>,

    /// Whether to try the socket transport
    pub socket_enabled: Option<bool>,
}

/// Reconnect section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectToml {
    /// Delay before the first attempt in milliseconds
    pub base_delay_ms: Option<u64>,

    /// Attempts before giving up
    pub max_attempts: Option<u32>,
}

/// Heartbeat section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatToml {
    /// Whether to send pings
    pub enabled: Option<bool>,

    /// Ping interval in milliseconds
    pub ping_interval_ms: Option<u64>,

    /// Round-trip samples averaged
    pub latency_window: Option<usize>,
}

/// Limits section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsToml {
    /// Longest accepted outbound message, in characters
    pub max_message_chars: Option<usize>,

    /// History page size
    pub history_page_size: Option<u32>,

    /// History pages fetched at most
    pub history_max_pages: Option<u32>,

    /// Capacity of the host event channel
    pub event_capacity: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Transport configuration section
    pub transport: TransportToml,

    /// Reconnect configuration section
    pub reconnect: ReconnectToml,

    /// Heartbeat configuration section
    pub heartbeat: HeartbeatToml,

    /// Limits configuration section
    pub limits: LimitsToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Client-side limits
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientLimits {
    /// Longest accepted outbound message, in characters
    pub max_message_chars: usize,
    /// History page size
    pub history_page_size: u32,
    /// History pages fetched at most
    pub history_max_pages: u32,
    /// Capacity of the host event channel
    pub event_capacity: usize,
}

impl Default for ClientLimits {
    fn default() -> Self {
        Self {
            max_message_chars: 50_000,
            history_page_size: 50,
            history_max_pages: 4,
            event_capacity: 256,
        }
    }
}

/// Complete session client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Transport configuration
    pub transport: TransportConfig,

    /// Reconnection backoff
    pub reconnect: ReconnectConfig,

    /// Heartbeat and latency tracking
    pub heartbeat: HeartbeatConfig,

    /// Client-side limits
    pub limits: ClientLimits,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            limits: ClientLimits::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults pointed at a specific server
    pub fn for_server(base_url: impl Into<String>) -> Self {
        Self {
            transport: TransportConfig::new(base_url),
            ..Self::default()
        }
    }

    /// Override the server from a command-line argument
    pub fn with_cli_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.transport.base_url = base_url.into();
        self.source = ConfigSource::Cli;
        self
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check values that would make the client misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.transport.base_url).map_err(|e| {
            ConfigError::ValidationError(format!(
                "base_url {:?} is not a URL: {e}",
                self.transport.base_url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "base_url must be http or https, got {}",
                url.scheme()
            )));
        }
        if self.transport.open_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "open_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.transport.send_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "send_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat.enabled && self.heartbeat.ping_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "ping_interval_ms must be greater than 0 when heartbeat is enabled".to_string(),
            ));
        }
        if self.limits.max_message_chars == 0 || self.limits.event_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "limits must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chat-session/client.toml` or
/// `~/.config/chat-session/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chat-session").join("client.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the merged configuration is invalid. A missing config file is not an
/// error (defaults are used).
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    load_with_env(path, |key| std::env::var(key).ok())
}

/// Load with an injectable environment lookup
fn load_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ClientConfig, ConfigError> {
    let mut config = ClientConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ClientToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml) {
    // Transport settings
    if let Some(ref url) = toml.transport.base_url {
        config.transport.base_url = url.clone();
    }
    if let Some(timeout) = toml.transport.open_timeout_ms {
        config.transport.open_timeout_ms = timeout;
    }
    if let Some(timeout) = toml.transport.send_timeout_ms {
        config.transport.send_timeout_ms = timeout;
    }
    if let Some(enabled) = toml.transport.socket_enabled {
        config.transport.socket_enabled = enabled;
    }

    // Reconnect settings
    if let Some(delay) = toml.reconnect.base_delay_ms {
        config.reconnect.base_delay_ms = delay;
    }
    if let Some(attempts) = toml.reconnect.max_attempts {
        config.reconnect.max_attempts = attempts;
    }

    // Heartbeat settings
    if let Some(enabled) = toml.heartbeat.enabled {
        config.heartbeat.enabled = enabled;
    }
    if let Some(interval) = toml.heartbeat.ping_interval_ms {
        config.heartbeat.ping_interval_ms = interval;
    }
    if let Some(window) = toml.heartbeat.latency_window {
        config.heartbeat.latency_window = window;
    }

    // Limits
    if let Some(max) = toml.limits.max_message_chars {
        config.limits.max_message_chars = max;
    }
    if let Some(size) = toml.limits.history_page_size {
        config.limits.history_page_size = size;
    }
    if let Some(pages) = toml.limits.history_max_pages {
        config.limits.history_max_pages = pages;
    }
    if let Some(capacity) = toml.limits.event_capacity {
        config.limits.event_capacity = capacity;
        config.transport.inbound_buffer = capacity;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ClientConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(url) = env("CHAT_SESSION_URL") {
        config.transport.base_url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("CHAT_SESSION_OPEN_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.transport.open_timeout_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("CHAT_SESSION_SEND_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.transport.send_timeout_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(n) = env("CHAT_SESSION_RECONNECT_ATTEMPTS").and_then(|v| v.parse::<u32>().ok()) {
        config.reconnect.max_attempts = n;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("CHAT_SESSION_RECONNECT_DELAY_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.reconnect.base_delay_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(mode) = env("CHAT_SESSION_TRANSPORT") {
        match mode.to_lowercase().as_str() {
            "auto" => config.transport.socket_enabled = true,
            "stream" => config.transport.socket_enabled = false,
            other => {
                tracing::warn!(value = other, "Ignoring unknown CHAT_SESSION_TRANSPORT");
                return;
            }
        }
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// Tests
// =============================================================================
