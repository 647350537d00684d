//! Transport Configuration
//!
//! Endpoint and timing for the backend channel.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::heartbeat::HeartbeatConfig;

/// Default backend channel endpoint
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8000/ws";

/// Transport configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Backend channel URL
    pub endpoint: String,

    /// Connection timeout in milliseconds
    ///
    /// How long a single connect attempt may take.
    pub connect_timeout_ms: u64,

    /// Whether to enable heartbeat
    pub heartbeat_enabled: bool,

    /// Heartbeat interval in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Fixed delay before a reconnect attempt, in milliseconds
    pub reconnect_delay_ms: u64,

    /// Capacity of the inbound and outbound queues of a channel
    pub channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout_ms: 5000,
            heartbeat_enabled: true,
            heartbeat_interval_ms: 30_000,
            reconnect_delay_ms: 5000,
            channel_capacity: 256,
        }
    }
}

impl TransportConfig {
    /// Configuration pointing at a specific endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the reconnect delay
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Disable the heartbeat
    #[must_use]
    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat_enabled = false;
        self
    }

    /// Delay before a reconnect attempt
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Timeout for a single connect attempt
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Heartbeat settings derived from this configuration
    #[must_use]
    pub fn heartbeat(&self) -> HeartbeatConfig {
        if self.heartbeat_enabled {
            HeartbeatConfig::default()
                .with_interval(Duration::from_millis(self.heartbeat_interval_ms))
        } else {
            HeartbeatConfig::disabled()
        }
    }
}
