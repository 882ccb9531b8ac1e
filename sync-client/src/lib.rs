//! # sync-client
//!
//! Client library for the chatsync realtime chat client.
//!
//! Applications start one [`SyncEngine`] per logged-in user and render the
//! [`ChatSnapshot`]s it publishes.
//!
//! ## Features
//!
//! - **Single-connection manager**: at most one live socket, fixed-delay
//!   reconnect, keepalive pings
//! - **Hybrid feeds**: push frames and 2s polls merged without duplicates
//! - **Transport Abstraction**: Pluggable transport layer (WebSocket, mock)
//! - **Pure State Machine**: Uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use chatsync_client::{session, ClientConfig, MemoryBackend, SyncEngine, WebSocketTransport};
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let user = session::login(backend.as_ref(), "alice@example.com", "secret").await?;
//!
//! let engine = SyncEngine::start(backend, Arc::new(WebSocketTransport::new()), &ClientConfig::default(), user)?;
//! engine.send_message("hello").await?;
//!
//! let view = engine.snapshot();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod connection;
pub mod engine;
pub mod session;
pub mod transport;

pub use backend::{ApiError, Backend, Call, MemoryBackend};
pub use config::{connection_address, ClientConfig, ConfigError};
pub use connection::{ConnectionEvent, ConnectionManager};
pub use engine::{ChatSnapshot, EngineError, SyncEngine};
pub use transport::{
    Connection, FrameSink, FrameStream, MockTransport, Transport, TransportError,
    WebSocketTransport,
};
