//! TOML Configuration File Support
//!
//! Centralized configuration loading for the client, supporting a TOML
//! configuration file at `~/.config/mini-ufo/client.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [connection]
//! endpoint = "ws://127.0.0.1:8000/ws"
//! connect_timeout_ms = 5000
//! heartbeat_enabled = true
//! heartbeat_interval_secs = 30
//! reconnect_delay_ms = 5000
//!
//! [streaming]
//! debounce_ms = 120
//! plan_first = false
//!
//! [output]
//! chunk_size = 2048
//! queue_capacity = 256
//!
//! [storage]
//! api_base = "http://127.0.0.1:8000/projects"
//! request_timeout_secs = 10
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controller::ControllerConfig;
use crate::persistence::DEFAULT_API_BASE;
use crate::streaming::OutputQueueConfig;
use crate::transport::TransportConfig;

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

/// Connection section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionToml {
    /// Backend channel URL
    pub endpoint: Option<String>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
    /// Whether to enable heartbeat
    pub heartbeat_enabled: Option<bool>,
    /// Heartbeat interval in seconds
    pub heartbeat_interval_secs: Option<u64>,
    /// Fixed reconnect delay in milliseconds
    pub reconnect_delay_ms: Option<u64>,
    /// Queue capacity of the channel
    pub channel_capacity: Option<usize>,
}

/// Streaming section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingToml {
    /// Prose debounce window in milliseconds
    pub debounce_ms: Option<u64>,
    /// Ask for a plan before implementing by default
    pub plan_first: Option<bool>,
}

/// Output section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputToml {
    /// Maximum characters per display chunk
    pub chunk_size: Option<usize>,
    /// Chunks held before enqueue waits
    pub queue_capacity: Option<usize>,
}

/// Storage section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageToml {
    /// Base URL of the session storage API
    pub api_base: Option<String>,
    /// Per-request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Root of the TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// `[connection]`
    pub connection: ConnectionToml,
    /// `[streaming]`
    pub streaming: StreamingToml,
    /// `[output]`
    pub output: OutputToml,
    /// `[storage]`
    pub storage: StorageToml,
}

// =============================================================================
// Unified Configuration
// =============================================================================

/// Centralized configuration for the client
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Transport configuration
    pub transport: TransportConfig,

    /// Prose debounce window
    pub debounce: Duration,

    /// Plan before implementing by default
    pub plan_first: bool,

    /// Output queue configuration
    pub output: OutputQueueConfig,

    /// Base URL of the session storage API
    pub api_base: String,

    /// Per-request timeout for the storage API
    pub request_timeout: Duration,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            debounce: Duration::from_millis(120),
            plan_first: false,
            output: OutputQueueConfig::default(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(10),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Settings for the session controller
    #[must_use]
    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            debounce: self.debounce,
            plan_first: self.plan_first,
            output: self.output.clone(),
            ..ControllerConfig::default()
        }
    }

    /// Reject values the client cannot run with
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = &self.transport.endpoint;
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(ConfigError::ValidationError(format!(
                "endpoint must be a ws:// or wss:// URL, got {endpoint}"
            )));
        }
        if !(self.api_base.starts_with("http://") || self.api_base.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "api_base must be an http(s) URL, got {}",
                self.api_base
            )));
        }
        if self.transport.heartbeat_enabled && self.transport.heartbeat_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "heartbeat interval must be at least 1 second (or disable the heartbeat)"
                    .to_string(),
            ));
        }
        if self.output.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if self.output.capacity == 0 || self.transport.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "queue capacities must be at least 1".to_string(),
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
/// Returns `$XDG_CONFIG_HOME/mini-ufo/client.toml` or
/// `~/.config/mini-ufo/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("mini-ufo").join("client.toml"))
}

/// Load configuration from all sources with proper priority
///
/// CLI arguments are not handled here; apply [`ConfigOverrides`] after.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration, reading environment values through `env`
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env(
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

    Ok(config)
}

fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml) {
    let connection = &toml.connection;
    if let Some(ref endpoint) = connection.endpoint {
        config.transport.endpoint.clone_from(endpoint);
    }
    if let Some(timeout) = connection.connect_timeout_ms {
        config.transport.connect_timeout_ms = timeout;
    }
    if let Some(enabled) = connection.heartbeat_enabled {
        config.transport.heartbeat_enabled = enabled;
    }
    if let Some(interval) = connection.heartbeat_interval_secs {
        config.transport.heartbeat_interval_ms = interval.saturating_mul(1000);
    }
    if let Some(delay) = connection.reconnect_delay_ms {
        config.transport.reconnect_delay_ms = delay;
    }
    if let Some(capacity) = connection.channel_capacity {
        config.transport.channel_capacity = capacity;
    }

    if let Some(ms) = toml.streaming.debounce_ms {
        config.debounce = Duration::from_millis(ms);
    }
    if let Some(plan_first) = toml.streaming.plan_first {
        config.plan_first = plan_first;
    }

    if let Some(size) = toml.output.chunk_size {
        config.output.chunk_size = size;
    }
    if let Some(capacity) = toml.output.queue_capacity {
        config.output.capacity = capacity;
    }

    if let Some(ref base) = toml.storage.api_base {
        config.api_base.clone_from(base);
    }
    if let Some(secs) = toml.storage.request_timeout_secs {
        config.request_timeout = Duration::from_secs(secs);
    }
}

fn apply_env_config(config: &mut ClientConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(endpoint) = env("UFO_ENDPOINT") {
        config.transport.endpoint = endpoint;
        config.source = ConfigSource::Env;
    }
    if let Some(base) = env("UFO_API_BASE") {
        config.api_base = base;
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = env("UFO_HEARTBEAT_INTERVAL").and_then(|v| v.parse::<u64>().ok()) {
        config.transport.heartbeat_interval_ms = secs.saturating_mul(1000);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("UFO_RECONNECT_DELAY").and_then(|v| v.parse::<u64>().ok()) {
        config.transport.reconnect_delay_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("UFO_DEBOUNCE_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.debounce = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(size) = env("UFO_CHUNK_SIZE").and_then(|v| v.parse::<usize>().ok()) {
        config.output.chunk_size = size;
        config.source = ConfigSource::Env;
    }
    if let Some(value) = env("UFO_PLAN_FIRST") {
        config.plan_first = value == "1" || value.eq_ignore_ascii_case("true");
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Backend endpoint override
    pub endpoint: Option<String>,

    /// Storage API base override
    pub api_base: Option<String>,

    /// Plan-first override
    pub plan_first: Option<bool>,

    /// Debounce window override (milliseconds)
    pub debounce_ms: Option<u64>,

    /// Reconnect delay override (milliseconds)
    pub reconnect_delay_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set endpoint override
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set storage API base override
    #[must_use]
    pub fn with_api_base(mut self, base: String) -> Self {
        self.api_base = Some(base);
        self
    }

    /// Set plan-first override
    #[must_use]
    pub fn with_plan_first(mut self, plan_first: bool) -> Self {
        self.plan_first = Some(plan_first);
        self
    }

    /// Set debounce override
    #[must_use]
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = Some(ms);
        self
    }

    /// Set reconnect delay override
    #[must_use]
    pub fn with_reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.reconnect_delay_ms = Some(ms);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ClientConfig) {
        if self.endpoint.is_some()
            || self.api_base.is_some()
            || self.plan_first.is_some()
            || self.debounce_ms.is_some()
            || self.reconnect_delay_ms.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref endpoint) = self.endpoint {
            config.transport.endpoint.clone_from(endpoint);
        }
        if let Some(ref base) = self.api_base {
            config.api_base.clone_from(base);
        }
        if let Some(plan_first) = self.plan_first {
            config.plan_first = plan_first;
        }
        if let Some(ms) = self.debounce_ms {
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = self.reconnect_delay_ms {
            config.transport.reconnect_delay_ms = ms;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
