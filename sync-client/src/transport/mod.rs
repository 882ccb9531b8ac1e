//! Transport abstraction for chatsync.
//!
//! This module provides a pluggable transport layer that abstracts
//! the underlying socket (WebSocket, mock for testing).
//!
//! # Design
//!
//! The transport is a connection factory. Each successful `connect()`
//! returns a [`Connection`] whose two halves are owned separately:
//! - [`FrameSink`] sends text frames and closes the socket
//! - [`FrameStream`] receives text frames until the socket goes away
//!
//! Nothing is shared between connections, so a late frame from an old
//! socket can never be mistaken for one from its replacement.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! let Connection { mut sink, mut stream } =
//!     transport.connect("ws://localhost:8080/ws?username=alice").await?;
//! sink.send(ClientFrame::Ping.encode()?).await?;
//! let text = stream.recv().await?;
//! ```

mod mock;
mod websocket;

pub use mock::MockTransport;
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// Outbound half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the socket gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Inbound half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next text frame.
    ///
    /// Blocks until a frame arrives. Returns `ConnectionClosed` once the
    /// socket is gone.
    async fn recv(&mut self) -> Result<String, TransportError>;
}

/// A live connection, split into its two halves.
pub struct Connection {
    /// Outbound half.
    pub sink: Box<dyn FrameSink>,
    /// Inbound half.
    pub stream: Box<dyn FrameStream>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Transport trait for opening chat socket connections.
///
/// Implementations handle the underlying connection mechanism
/// (WebSocket, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to the given address
    /// (`ws(s)://<host>/ws?username=<name>`).
    async fn connect(&self, address: &str) -> Result<Connection, TransportError>;
}
