//! Controller Core - Streaming Session Controller for mini-ufo
//!
//! This crate holds the client-side logic of the mini-ufo code-generation
//! assistant, independent of any display. It can drive a terminal client,
//! be embedded in another front end, or run headless against an in-process
//! backend for testing.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Surfaces                                │
//! │    ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐    │
//! │    │  Terminal    │   │   Embedded   │   │     Headless     │    │
//! │    │   client     │   │   front end  │   │     (tests)      │    │
//! │    └──────┬───────┘   └──────┬───────┘   └────────┬─────────┘    │
//! │           └──────────────────┼────────────────────┘              │
//! │              ControllerCommand (up) / ControllerMessage (down)   │
//! │                      OutputSink (display text)                   │
//! └──────────────────────────────┼───────────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┼───────────────────────────────────┐
//! │                      CONTROLLER CORE                             │
//! │  ┌───────────────────────────┴───────────────────────────────┐   │
//! │  │                   SessionController                       │   │
//! │  │  ┌────────────┐ ┌───────────┐ ┌──────────┐ ┌────────────┐ │   │
//! │  │  │ Connection │ │  Demux +  │ │ Workflow │ │ Persistence│ │   │
//! │  │  │  Manager   │ │  Buffers  │ │  State   │ │   Bridge   │ │   │
//! │  │  └─────┬──────┘ └─────┬─────┘ └──────────┘ └─────┬──────┘ │   │
//! │  └────────┼──────────────┼──────────────────────────┼────────┘   │
//! │           │        OutputQueue                      │            │
//! └───────────┼──────────────────────────────────────────┼───────────┘
//!       WebSocket / in-process                   Session storage API
//! ```
//!
//! # Key Types
//!
//! - [`SessionController`]: owns every piece of session state and runs the event loop
//! - [`ControllerCommand`]: requests from a surface
//! - [`ControllerMessage`]: updates for a surface
//! - [`Frame`]: one inbound unit from the backend
//! - [`Intent`]: one outbound request to the backend
//!
//! # Quick Start
//!
//! ```ignore
//! use controller_core::{
//!     ControllerConfig, MemorySessionStore, SessionController, TransportConfig,
//!     transport::WebSocketTransport,
//! };
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport_config = TransportConfig::default();
//!     let transport = WebSocketTransport::new(&transport_config);
//!     let (tx, mut rx) = mpsc::channel(100);
//!
//!     let controller = SessionController::new(
//!         transport,
//!         transport_config,
//!         MemorySessionStore::new(),
//!         &ControllerConfig::default(),
//!         tx,
//!     );
//!     let handle = controller.spawn();
//!     handle.submit("a snake game in pygame").await.unwrap();
//!
//!     while let Some(message) = rx.recv().await {
//!         // Render message
//!     }
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`frames`]: inbound frame parsing
//! - [`intents`]: outbound intent encoding
//! - [`transport`]: channel transports and the connection manager
//! - [`streaming`]: demultiplexer, flush rules, debounce and the output queue
//! - [`workflow`]: the plan/implement state machine
//! - [`persistence`]: session records, storage clients and the save bridge
//! - [`controller`]: the session controller
//! - [`config`]: TOML/env/CLI configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod controller;
pub mod frames;
pub mod intents;
pub mod persistence;
pub mod streaming;
pub mod transport;
pub mod workflow;

// Re-exports for convenience
pub use controller::{
    ControllerCommand, ControllerConfig, ControllerError, ControllerHandle, ControllerMessage,
    ControllerStats, NotifyLevel, SessionController, DEFAULT_DEBOUNCE,
};
pub use frames::{Frame, FrameKind, ProtocolError};
pub use intents::Intent;
pub use workflow::{Completion, RunId, Workflow, WorkflowError, WorkflowState};

// Persistence exports
pub use persistence::{
    HttpSessionStore, LoadedSession, MemorySessionStore, PersistenceBridge, PersistenceError,
    Session, SessionDraft, SessionId, SessionStore, SessionSummary, TreeNode, TreeNodeKind,
};

// Streaming exports
pub use streaming::{
    Block, Debounce, Demultiplexer, OutputQueue, OutputQueueConfig, OutputSink, QueueStats,
    RoutingPhase, SinkError,
};

// Transport exports
pub use transport::{
    ChannelTransport, ConnectionEvent, ConnectionManager, InProcessBackend, InProcessTransport,
    PeerConnection, TransportConfig, TransportError,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ClientConfig, ConfigError,
    ConfigOverrides, ConfigSource,
};
