//! In-Process Transport
//!
//! Direct channel-based communication with a backend living in the same
//! process. Every `open()` hands the backend side a [`PeerConnection`]
//! through the paired [`InProcessBackend`], which can push frames, read the
//! intents the client sent, close the connection, or refuse the next connect
//! attempts.
//!
//! # Usage
//!
//! ```ignore
//! let (transport, mut backend) = InProcessTransport::new_pair();
//!
//! // Give transport to the ConnectionManager, then on the backend side:
//! let mut peer = backend.accept().await.unwrap();
//! let intent = peer.next_intent().await;
//! peer.send_frame(&Frame::Message("Hello".into())).await;
//! peer.send_frame(&Frame::EndOfStream).await;
//! ```

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::frames::Frame;
use crate::intents::Intent;

use super::traits::{Channel, ChannelEvent, ChannelTransport, TransportError};

const IN_PROCESS_ENDPOINT: &str = "in-process";

/// Client side of the in-process transport
pub struct InProcessTransport {
    peers: mpsc::UnboundedSender<PeerConnection>,
    shared: Arc<Shared>,
    capacity: usize,
}

#[derive(Default)]
struct Shared {
    refuse_next: AtomicU32,
    attempts: AtomicU64,
}

/// Backend side: accepts connections opened by the client
pub struct InProcessBackend {
    peers: mpsc::UnboundedReceiver<PeerConnection>,
    shared: Arc<Shared>,
}

/// Backend end of one open connection
pub struct PeerConnection {
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<ChannelEvent>,
}

impl InProcessTransport {
    /// Create a new in-process transport pair
    #[must_use]
    pub fn new_pair() -> (Self, InProcessBackend) {
        Self::new_pair_with_capacity(100)
    }

    /// Create with custom channel capacity
    #[must_use]
    pub fn new_pair_with_capacity(capacity: usize) -> (Self, InProcessBackend) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        let transport = Self {
            peers: peers_tx,
            shared: Arc::clone(&shared),
            capacity,
        };
        let backend = InProcessBackend {
            peers: peers_rx,
            shared,
        };

        (transport, backend)
    }
}

#[async_trait]
impl ChannelTransport for InProcessTransport {
    async fn open(&mut self) -> Result<Channel, TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .shared
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::ConnectionFailed(
                "in-process backend refused connection".to_string(),
            ));
        }

        let (out_tx, out_rx) = mpsc::channel(self.capacity);
        let (in_tx, in_rx) = mpsc::channel(self.capacity);

        let peer = PeerConnection {
            from_client: out_rx,
            to_client: in_tx,
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::ConnectionFailed("in-process backend gone".to_string()))?;

        Ok(Channel {
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    fn endpoint(&self) -> &str {
        IN_PROCESS_ENDPOINT
    }
}

impl InProcessBackend {
    /// Wait for the client to open the next connection
    pub async fn accept(&mut self) -> Option<PeerConnection> {
        self.peers.recv().await
    }

    /// Refuse the next `count` connect attempts
    pub fn refuse_next(&self, count: u32) {
        self.shared.refuse_next.store(count, Ordering::SeqCst);
    }

    /// Number of connect attempts the client has made, refused ones included
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

impl PeerConnection {
    /// Push one frame to the client
    ///
    /// Returns `false` if the client has dropped the connection.
    pub async fn send_frame(&self, frame: &Frame) -> bool {
        self.send_text(frame.to_json()).await
    }

    /// Push raw text to the client
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client
            .send(ChannelEvent::Text(text.into()))
            .await
            .is_ok()
    }

    /// Receive the next raw text the client sent
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Receive the next non-heartbeat intent the client sent
    pub async fn next_intent(&mut self) -> Option<Intent> {
        while let Some(text) = self.from_client.recv().await {
            match Intent::decode(&text) {
                Intent::Heartbeat => continue,
                intent => return Some(intent),
            }
        }
        None
    }

    /// Close the connection as a remote close would
    pub async fn close(self, reason: impl Into<String>) {
        let _ = self
            .to_client
            .send(ChannelEvent::Closed {
                reason: Some(reason.into()),
            })
            .await;
    }
}
