//! Transport Layer for the Backend Channel
//!
//! Provides abstraction over the persistent full-duplex text channel to the
//! generation backend:
//! - `WebSocket`: the production channel (`ws://127.0.0.1:8000/ws`)
//! - `InProcess`: a channel pair, for embedding and tests
//!
//! # Design Philosophy
//!
//! A transport only knows how to open a channel. Everything about the
//! channel's lifecycle (heartbeat, loss detection, reconnect timing and
//! suppression while a generation runs) lives in [`ConnectionManager`], so
//! both transports get identical recovery behavior.

pub mod config;
pub mod heartbeat;
pub mod in_process;
pub mod manager;
pub mod traits;
#[cfg(feature = "websocket")]
pub mod websocket;

// Re-exports for convenience
pub use config::TransportConfig;
pub use heartbeat::{HeartbeatConfig, HeartbeatTask};
pub use in_process::{InProcessBackend, InProcessTransport, PeerConnection};
pub use manager::{ConnectionEvent, ConnectionManager, ConnectionStats};
pub use traits::{Channel, ChannelEvent, ChannelTransport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
