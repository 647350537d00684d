//! Heartbeat for the Backend Channel
//!
//! Keeps the persistent channel warm through idle periods by sending
//! `{"type":"heartbeat"}` every `interval`. The backend does not answer, so
//! this is fire-and-forget: a heartbeat that cannot be queued is skipped,
//! and the task ends on its own once the channel's outbound queue closes.
//!
//! # Usage
//!
//! ```ignore
//! let task = HeartbeatTask::new(channel.outbound.clone(), HeartbeatConfig::default());
//! let handle = task.spawn();
//! // ... on channel loss
//! handle.abort();
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::intents::HEARTBEAT_TEXT;

/// Configuration for heartbeat behavior
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between heartbeats (default: 30 seconds)
    pub interval: Duration,
    /// Whether heartbeat is enabled (can be disabled for testing)
    pub enabled: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            enabled: true,
        }
    }
}

impl HeartbeatConfig {
    /// Create a config with heartbeat disabled (for testing)
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Set the heartbeat interval
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Create a config suitable for testing (shorter interval)
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            interval: Duration::from_millis(100),
            enabled: true,
        }
    }
}

/// Periodic heartbeat sender bound to one channel
pub struct HeartbeatTask {
    outbound: mpsc::Sender<String>,
    config: HeartbeatConfig,
    sent: Arc<AtomicU64>,
}

impl HeartbeatTask {
    /// Create a heartbeat task for a channel's outbound queue
    #[must_use]
    pub fn new(outbound: mpsc::Sender<String>, config: HeartbeatConfig) -> Self {
        Self {
            outbound,
            config,
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of heartbeats queued so far
    #[must_use]
    pub fn sent_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.sent)
    }

    /// Spawn the task onto the runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until the outbound queue closes or the task is aborted
    pub async fn run(self) {
        if !self.config.enabled {
            tracing::debug!("Heartbeat disabled");
            return;
        }

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; the channel was just opened.
        interval.tick().await;

        loop {
            interval.tick().await;

            match self.outbound.try_send(HEARTBEAT_TEXT.to_string()) {
                Ok(()) => {
                    let count = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::trace!(count, "Heartbeat queued");
                }
                Err(TrySendError::Full(_)) => {
                    tracing::debug!("Outbound queue full, skipping heartbeat");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!("Channel closed, heartbeat task stopping");
                    break;
                }
            }
        }
    }
}
