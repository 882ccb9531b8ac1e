//! Mock transport for testing.
//!
//! Plays the server side of every connection it hands out: frames can be
//! pushed to the newest live connection, the connection can be dropped from
//! the "server" end, and everything clients send is captured for
//! verification.

use super::{Connection, FrameSink, FrameStream, Transport, TransportError};
use async_trait::async_trait;
use chatsync_types::{ClientFrame, ServerFrame};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while the code under
/// test owns another.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    addresses: Vec<String>,
    fail_next_connect: VecDeque<String>,
    unreachable: bool,
    connect_delay: Duration,
    next_id: u64,
    /// Server-side end of every live connection, keyed by connection id.
    live: BTreeMap<u64, mpsc::UnboundedSender<String>>,
    sent: Vec<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        lock(&self.inner)
    }

    /// Number of `connect()` calls so far, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.lock().addresses.len()
    }

    /// Every address passed to `connect()`, in call order.
    pub fn connected_addresses(&self) -> Vec<String> {
        self.lock().addresses.clone()
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect.push_back(error.to_string());
    }

    /// Make every connect() fail until reset.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Delay every connect() by `delay` before it resolves.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = delay;
    }

    /// Number of connections that are open on both ends.
    pub fn live_connections(&self) -> usize {
        self.lock().live.len()
    }

    /// Deliver raw text to the newest live connection.
    ///
    /// Returns `false` if there is no live connection.
    pub fn push_text(&self, text: &str) -> bool {
        let inner = self.lock();
        match inner.live.values().next_back() {
            Some(tx) => tx.send(text.to_string()).is_ok(),
            None => false,
        }
    }

    /// Deliver an encoded server frame to the newest live connection.
    pub fn push_frame(&self, frame: &ServerFrame) -> bool {
        match frame.encode() {
            Ok(text) => self.push_text(&text),
            Err(_) => false,
        }
    }

    /// Close the newest live connection from the server side.
    ///
    /// The client's stream half sees `ConnectionClosed`.
    pub fn drop_connection(&self) -> bool {
        let mut inner = self.lock();
        match inner.live.keys().next_back().copied() {
            Some(id) => inner.live.remove(&id).is_some(),
            None => false,
        }
    }

    /// All text frames sent by clients, across connections.
    pub fn sent_frames(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    /// Sent frames that decode as client frames.
    pub fn sent_client_frames(&self) -> Vec<ClientFrame> {
        self.lock()
            .sent
            .iter()
            .filter_map(|text| ClientFrame::decode(text).ok())
            .collect()
    }

    /// Forget captured frames.
    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }
}

fn lock(inner: &Mutex<MockTransportInner>) -> MutexGuard<'_, MockTransportInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<Connection, TransportError> {
        let delay = {
            let mut inner = self.lock();
            inner.addresses.push(address.to_string());
            inner.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.pop_front() {
            return Err(TransportError::ConnectionFailed(error));
        }
        if inner.unreachable {
            return Err(TransportError::ConnectionFailed("unreachable".into()));
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.live.insert(id, tx);

        Ok(Connection {
            sink: Box::new(MockSink {
                id,
                inner: Arc::clone(&self.inner),
            }),
            stream: Box::new(MockStream { rx }),
        })
    }
}

struct MockSink {
    id: u64,
    inner: Arc<Mutex<MockTransportInner>>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let mut inner = lock(&self.inner);
        if !inner.live.contains_key(&self.id) {
            return Err(TransportError::ConnectionClosed);
        }
        inner.sent.push(text);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        lock(&self.inner).live.remove(&self.id);
        Ok(())
    }
}

impl Drop for MockSink {
    fn drop(&mut self) {
        lock(&self.inner).live.remove(&self.id);
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn recv(&mut self) -> Result<String, TransportError> {
        self.rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }
}
