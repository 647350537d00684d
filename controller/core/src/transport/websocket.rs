//! WebSocket Transport
//!
//! Production channel to the generation backend. Each `open()` performs one
//! connect attempt (bounded by the configured timeout) and spawns two helper
//! tasks that own the socket halves:
//!
//! ```text
//!   Channel.outbound ──▶ writer task ──▶ ws sink
//!   Channel.inbound  ◀── reader task ◀── ws stream
//! ```
//!
//! The reader reports a single [`ChannelEvent::Closed`] when the socket ends.
//! Dropping the channel's outbound sender makes the writer send a close frame
//! and exit.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::config::TransportConfig;
use super::traits::{Channel, ChannelEvent, ChannelTransport, TransportError};

/// WebSocket client transport
pub struct WebSocketTransport {
    url: String,
    connect_timeout: Duration,
    capacity: usize,
}

impl WebSocketTransport {
    /// Create a transport from configuration
    #[must_use]
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            url: config.endpoint.clone(),
            connect_timeout: config.connect_timeout(),
            capacity: config.channel_capacity.max(1),
        }
    }
}

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    async fn open(&mut self) -> Result<Channel, TransportError> {
        let connect = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()));
        let (stream, _response) = match connect.await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(TransportError::ConnectionFailed(e.to_string())),
            Err(_) => {
                return Err(TransportError::Timeout(
                    u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX),
                ))
            }
        };

        tracing::info!(url = %self.url, "WebSocket connected");

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(self.capacity);
        let (in_tx, in_rx) = mpsc::channel(self.capacity);

        // Writer: drains outbound text until the controller drops its sender.
        let writer_events = in_tx.clone();
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!(error = %e, "WebSocket write failed");
                    let _ = writer_events
                        .send(ChannelEvent::Closed {
                            reason: Some(format!("write failed: {e}")),
                        })
                        .await;
                    return;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            tracing::debug!("WebSocket writer finished");
        });

        // Reader: forwards text frames, reports the first terminal condition.
        tokio::spawn(async move {
            let reason = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(ChannelEvent::Text(text)).await.is_err() {
                            // Controller dropped the channel.
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if in_tx.send(ChannelEvent::Text(text)).await.is_err() {
                                return;
                            }
                        }
                        Err(_) => tracing::warn!("Dropping non-UTF-8 binary message"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|f| format!("closed by backend: {}", f.reason));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(format!("read failed: {e}")),
                    None => break None,
                }
            };
            tracing::debug!(reason = ?reason, "WebSocket reader finished");
            let _ = in_tx.send(ChannelEvent::Closed { reason }).await;
        });

        Ok(Channel {
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}
