//! Connection Manager
//!
//! Owns the persistent channel's lifecycle on top of any [`ChannelTransport`].
//!
//! # Lifecycle
//!
//! ```text
//!            connect() ok                     remote close / error
//!  ┌──────┐ ───────────────▶ ┌──────┐ ─────────────────────────────▶ ┌──────┐
//!  │ Idle │                  │ Open │                                │ Lost │
//!  └──────┘ ◀─────────────── └──────┘ ◀──── reconnect() ok ───────── └──────┘
//!             disconnect()                 (after the fixed delay)
//! ```
//!
//! - Establishment clears any pending reconnect timer and starts the heartbeat.
//! - A loss schedules exactly one reconnect timer. Losses observed while a
//!   timer is pending do not schedule another one.
//! - While suppressed (a generation is running) a loss schedules nothing; the
//!   reconnect is scheduled when suppression is lifted.
//!
//! [`ConnectionManager::next_event`] is cancel-safe so it can sit in a
//! `tokio::select!` next to other sources. When the reconnect timer fires it
//! returns [`ConnectionEvent::ReconnectDue`] and the owner calls
//! [`ConnectionManager::connect`].

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::intents::Intent;

use super::config::TransportConfig;
use super::heartbeat::HeartbeatTask;
use super::traits::{Channel, ChannelEvent, ChannelTransport, TransportError};

/// Lifecycle events surfaced to the owner
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The channel is open
    Connected {
        /// Whether an earlier connection existed
        reconnected: bool,
    },
    /// One text message from the backend
    Text(String),
    /// The channel was lost
    Disconnected {
        /// Cause, if known
        reason: Option<String>,
    },
    /// The reconnect timer fired; call `connect()`
    ReconnectDue,
}

/// Counters kept by the manager
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Successful connects, initial one included
    pub connects: u64,
    /// Failed connect attempts
    pub failed_attempts: u64,
    /// Channel losses observed
    pub losses: u64,
    /// Reconnect timers scheduled
    pub reconnects_scheduled: u64,
    /// Text messages sent
    pub sent: u64,
}

struct OpenChannel {
    channel: Channel,
    heartbeat: JoinHandle<()>,
}

impl Drop for OpenChannel {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

/// Lifecycle owner for the backend channel
pub struct ConnectionManager<T: ChannelTransport> {
    transport: T,
    config: TransportConfig,
    open: Option<OpenChannel>,
    reconnect_at: Option<Instant>,
    suppressed: bool,
    deferred: bool,
    ever_connected: bool,
    stats: ConnectionStats,
}

impl<T: ChannelTransport> ConnectionManager<T> {
    /// Create a manager; nothing is opened until [`connect`](Self::connect)
    pub fn new(transport: T, config: TransportConfig) -> Self {
        Self {
            transport,
            config,
            open: None,
            reconnect_at: None,
            suppressed: false,
            deferred: false,
            ever_connected: false,
            stats: ConnectionStats::default(),
        }
    }

    /// Open the channel.
    ///
    /// On success any pending reconnect timer is cleared and the heartbeat
    /// starts. On failure a reconnect is scheduled as for any other loss.
    ///
    /// # Errors
    ///
    /// Returns the transport's error, or `InvalidState` if already open.
    pub async fn connect(&mut self) -> Result<ConnectionEvent, TransportError> {
        if self.open.is_some() {
            return Err(TransportError::InvalidState(
                "channel already open".to_string(),
            ));
        }

        match self.transport.open().await {
            Ok(channel) => {
                let heartbeat =
                    HeartbeatTask::new(channel.outbound.clone(), self.config.heartbeat()).spawn();
                self.open = Some(OpenChannel { channel, heartbeat });
                self.reconnect_at = None;
                self.deferred = false;
                self.stats.connects += 1;

                let reconnected = self.ever_connected;
                self.ever_connected = true;
                tracing::info!(
                    endpoint = %self.transport.endpoint(),
                    reconnected,
                    "Channel open"
                );
                Ok(ConnectionEvent::Connected { reconnected })
            }
            Err(e) => {
                self.stats.failed_attempts += 1;
                tracing::warn!(
                    endpoint = %self.transport.endpoint(),
                    error = %e,
                    "Connect attempt failed"
                );
                self.after_loss();
                Err(e)
            }
        }
    }

    /// Wait for the next lifecycle event.
    ///
    /// Cancel-safe. Pends forever when the channel is closed and no
    /// reconnect is scheduled (e.g. while suppressed).
    pub async fn next_event(&mut self) -> ConnectionEvent {
        if let Some(open) = self.open.as_mut() {
            let event = open.channel.inbound.recv().await;
            return match event {
                Some(ChannelEvent::Text(text)) => ConnectionEvent::Text(text),
                Some(ChannelEvent::Closed { reason }) => self.report_loss(reason),
                None => self.report_loss(Some("channel dropped".to_string())),
            };
        }

        match self.reconnect_at {
            Some(at) => {
                tokio::time::sleep_until(at).await;
                self.reconnect_at = None;
                tracing::debug!("Reconnect timer fired");
                ConnectionEvent::ReconnectDue
            }
            None => std::future::pending().await,
        }
    }

    /// Record a channel loss noticed by the owner (e.g. a failed send).
    ///
    /// Idempotent: a loss on an already-closed channel only returns the event.
    pub fn report_loss(&mut self, reason: Option<String>) -> ConnectionEvent {
        if self.open.take().is_some() {
            self.stats.losses += 1;
            tracing::warn!(reason = ?reason, "Channel lost");
            self.after_loss();
        }
        ConnectionEvent::Disconnected { reason }
    }

    fn after_loss(&mut self) {
        if self.suppressed {
            self.deferred = true;
            tracing::debug!("Reconnect deferred while suppressed");
        } else {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) -> bool {
        if self.open.is_some() || self.reconnect_at.is_some() {
            return false;
        }
        let delay = self.config.reconnect_delay();
        self.reconnect_at = Some(Instant::now() + delay);
        self.stats.reconnects_scheduled += 1;
        tracing::info!(delay_ms = duration_ms(delay), "Reconnect scheduled");
        true
    }

    /// Suppress or re-enable automatic reconnect.
    ///
    /// Lifting suppression schedules the reconnect a suppressed loss skipped.
    pub fn set_suppressed(&mut self, suppressed: bool) {
        if self.suppressed == suppressed {
            return;
        }
        self.suppressed = suppressed;
        if !suppressed && self.deferred {
            self.deferred = false;
            if self.open.is_none() {
                self.schedule_reconnect();
            }
        }
    }

    /// Send an intent.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when the channel is not open, `SendFailed` if
    /// the writer side is gone.
    pub async fn send(&mut self, intent: &Intent) -> Result<(), TransportError> {
        let text = intent.encode()?;
        self.send_text(text).await?;
        tracing::debug!(intent = intent.name(), "Intent sent");
        Ok(())
    }

    /// Send raw text.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when the channel is not open, `SendFailed` if
    /// the writer side is gone.
    pub async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let Some(open) = self.open.as_ref() else {
            return Err(TransportError::InvalidState("channel not open".to_string()));
        };
        open.channel
            .outbound
            .send(text)
            .await
            .map_err(|_| TransportError::SendFailed("channel writer closed".to_string()))?;
        self.stats.sent += 1;
        Ok(())
    }

    /// Close the channel and cancel any pending reconnect
    pub fn disconnect(&mut self) {
        if self.open.take().is_some() {
            tracing::info!("Channel closed by client");
        }
        self.reconnect_at = None;
        self.deferred = false;
    }

    /// Whether the channel is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Whether a reconnect timer is pending
    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_at.is_some()
    }

    /// Endpoint of the underlying transport
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        self.stats.clone()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
