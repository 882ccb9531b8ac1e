//! ConnectionManager - one live socket per session.
//!
//! The manager is an actor task. It owns the pure [`ConnectionState`] machine
//! from sync-core and interprets its actions: connecting, tearing down,
//! arming the reconnect and keepalive deadlines, writing pings. Socket I/O
//! runs in per-connection reader/writer tasks that report back over a queue.
//!
//! ```text
//! ConnectionManager (handle) ──commands──▶ actor ──Connect──▶ Transport
//!                                            ▲  ◀─frames/lost─ reader task
//!        ConnectionEvent ◀──────────────────┘  ──text──▶ writer task
//! ```
//!
//! Every connection attempt gets a fresh generation number. Results tagged
//! with an older generation (a connect that completes after `close()`, a
//! frame from a replaced socket) are discarded, so at most one socket is
//! ever live.

use std::sync::Arc;

use chatsync_core::{
    Action, ConnectionSnapshot, ConnectionState, ConnectionTimings, Event, SessionEvent,
};
use chatsync_types::{ClientFrame, ServerFrame};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use url::Url;

use crate::config::connection_address;
use crate::transport::{Connection, Transport, TransportError};

/// Notifications from the connection to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Status or retry count changed.
    StateChanged(ConnectionSnapshot),
    /// The socket is live.
    Opened {
        /// `false` for the first open after an `open()` call.
        reconnect: bool,
    },
    /// The socket went away.
    Closed {
        /// Why.
        reason: String,
    },
    /// A decoded inbound frame of a known type.
    Frame(ServerFrame),
}

#[derive(Debug)]
enum Command {
    Open { username: String },
    Close,
    Send(ClientFrame),
}

enum Internal {
    Connected {
        generation: u64,
        result: Result<Connection, TransportError>,
    },
    Frame {
        generation: u64,
        text: String,
    },
    Lost {
        generation: u64,
        reason: String,
    },
}

/// Handle to the connection actor.
///
/// All methods are fire-and-forget; progress is observed through
/// [`ConnectionEvent`]s and [`ConnectionManager::snapshot`]. Dropping every
/// handle closes the connection and stops the actor.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
}

impl ConnectionManager {
    /// Spawn the actor. Must be called within a tokio runtime.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        base_url: Url,
        timings: ConnectionTimings,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ConnectionSnapshot::default());

        let actor = ConnectionActor {
            transport,
            base_url,
            timings,
            state: ConnectionState::new(),
            username: None,
            generation: 0,
            link: None,
            connecting: None,
            reconnect_at: None,
            keepalive: None,
            internal: internal_tx,
            events: events_tx,
            snapshot: snapshot_tx,
        };
        tokio::spawn(actor.run(commands_rx, internal_rx));

        (
            Self {
                commands: commands_tx,
                snapshot: snapshot_rx,
            },
            events_rx,
        )
    }

    /// Open the connection for `username`.
    ///
    /// No-op while connecting or open for the same user. Connects at once
    /// if a reconnect is pending. A different username supersedes the
    /// current connection.
    pub fn open(&self, username: &str) {
        self.command(Command::Open {
            username: username.to_string(),
        });
    }

    /// Close the connection and cancel pending reconnect/keepalive timers.
    pub fn close(&self) {
        self.command(Command::Close);
    }

    /// Send a frame. Silently dropped unless the connection is open.
    pub fn send(&self, frame: ClientFrame) {
        self.command(Command::Send(frame));
    }

    /// Current status and retry count.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        *self.snapshot.borrow()
    }

    /// Receiver that tracks the connection snapshot.
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot.clone()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Connection actor already stopped");
        }
    }
}

/// Writer and reader of the current socket.
struct Link {
    writer: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
}

struct ConnectionActor {
    transport: Arc<dyn Transport>,
    base_url: Url,
    timings: ConnectionTimings,
    state: ConnectionState,
    username: Option<String>,
    generation: u64,
    link: Option<Link>,
    connecting: Option<JoinHandle<()>>,
    reconnect_at: Option<Instant>,
    /// Next ping deadline and the interval.
    keepalive: Option<(Instant, std::time::Duration)>,
    internal: mpsc::UnboundedSender<Internal>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    snapshot: watch::Sender<ConnectionSnapshot>,
}

impl ConnectionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(message) = internal.recv() => self.handle_internal(message),
                _ = wait_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.dispatch(Event::ReconnectTimer);
                }
                _ = wait_until(self.keepalive.map(|(at, _)| at)) => {
                    if let Some((at, every)) = self.keepalive {
                        self.keepalive = Some((at + every, every));
                    }
                    self.dispatch(Event::KeepaliveTick);
                }
            }
        }

        tracing::debug!("Connection handle dropped, shutting down");
        self.dispatch(Event::CloseRequested);
        self.teardown();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open { username } => {
                let active = !matches!(self.state, ConnectionState::Idle | ConnectionState::Closed);
                if let Some(current) = self.username.as_deref() {
                    if active && current != username {
                        tracing::info!("Superseding connection of {} with {}", current, username);
                        self.dispatch(Event::CloseRequested);
                    }
                }
                if self.state.is_reconnecting() {
                    tracing::debug!("Open requested, skipping the reconnect delay");
                }
                self.username = Some(username);
                self.dispatch(Event::OpenRequested);
            }
            Command::Close => self.dispatch(Event::CloseRequested),
            Command::Send(frame) => {
                if self.state.is_open() {
                    self.write(&frame);
                } else {
                    tracing::debug!("Dropping {} frame: connection not open", frame.kind());
                }
            }
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Connected { generation, result } => {
                if generation != self.generation {
                    if let Ok(connection) = result {
                        tracing::debug!("Closing connection of a superseded attempt");
                        tokio::spawn(close_connection(connection));
                    }
                    return;
                }
                self.connecting = None;
                match result {
                    Ok(connection) => {
                        self.install(connection);
                        self.dispatch(Event::ConnectSucceeded);
                    }
                    Err(e) => self.dispatch(Event::ConnectFailed {
                        error: e.to_string(),
                    }),
                }
            }
            Internal::Frame { generation, text } => {
                if generation == self.generation {
                    self.on_frame(&text);
                }
            }
            Internal::Lost { generation, reason } => {
                if generation != self.generation {
                    return;
                }
                self.teardown();
                self.dispatch(Event::ConnectionLost { reason });
            }
        }
    }

    fn on_frame(&mut self, text: &str) {
        match ServerFrame::decode(text) {
            Ok(ServerFrame::Unknown { kind }) => {
                tracing::debug!("Ignoring frame of unknown type {}", kind);
            }
            Ok(frame) => {
                tracing::debug!("Received {} frame", frame.kind());
                self.emit(ConnectionEvent::Frame(frame));
            }
            Err(e) => tracing::warn!("Dropping malformed frame: {}", e),
        }
    }

    /// Run one event through the state machine and execute its actions.
    fn dispatch(&mut self, event: Event) {
        let state = std::mem::take(&mut self.state);
        let (next, actions) = state.on_event(event, &self.timings);
        self.state = next;
        self.publish();
        for action in actions {
            self.perform(action);
        }
    }

    fn perform(&mut self, action: Action) {
        match action {
            Action::Connect => self.start_connect(),
            Action::Disconnect => self.teardown(),
            Action::StartKeepalive { interval } => {
                self.keepalive = Some((Instant::now() + interval, interval));
            }
            Action::StopKeepalive => self.keepalive = None,
            Action::SendPing => self.write(&ClientFrame::Ping),
            Action::StartReconnectTimer { delay } => {
                self.reconnect_at = Some(Instant::now() + delay);
            }
            Action::CancelReconnect => self.reconnect_at = None,
            Action::Emit(event) => self.emit_session(event),
        }
    }

    fn start_connect(&mut self) {
        let Some(username) = self.username.as_deref() else {
            tracing::warn!("Connect requested without a username");
            return;
        };
        let address = connection_address(&self.base_url, username).to_string();

        self.teardown();
        let generation = self.generation;
        tracing::info!(
            "Connecting to {} (retry {})",
            address,
            self.state.retry_count()
        );

        let transport = Arc::clone(&self.transport);
        let internal = self.internal.clone();
        self.connecting = Some(tokio::spawn(async move {
            let result = transport.connect(&address).await;
            let _ = internal.send(Internal::Connected { generation, result });
        }));
    }

    /// Spawn reader and writer tasks for a fresh connection.
    fn install(&mut self, connection: Connection) {
        let Connection {
            mut sink,
            mut stream,
        } = connection;
        let generation = self.generation;

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();
        let internal = self.internal.clone();
        tokio::spawn(async move {
            while let Some(text) = writer_rx.recv().await {
                if let Err(e) = sink.send(text).await {
                    let _ = internal.send(Internal::Lost {
                        generation,
                        reason: e.to_string(),
                    });
                    return;
                }
            }
            // Writer dropped by teardown
            let _ = sink.close().await;
        });

        let internal = self.internal.clone();
        let reader = tokio::spawn(async move {
            loop {
                match stream.recv().await {
                    Ok(text) => {
                        if internal.send(Internal::Frame { generation, text }).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = internal.send(Internal::Lost {
                            generation,
                            reason: e.to_string(),
                        });
                        return;
                    }
                }
            }
        });

        self.link = Some(Link {
            writer: writer_tx,
            reader,
        });
    }

    /// Invalidate the current attempt and drop its socket.
    fn teardown(&mut self) {
        self.generation += 1;
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(link) = self.link.take() {
            link.reader.abort();
        }
    }

    fn write(&self, frame: &ClientFrame) {
        let Some(link) = &self.link else {
            return;
        };
        match frame.encode() {
            Ok(text) => {
                let _ = link.writer.send(text);
            }
            Err(e) => tracing::warn!("Failed to encode {} frame: {}", frame.kind(), e),
        }
    }

    fn emit_session(&self, event: SessionEvent) {
        match event {
            SessionEvent::Opened { reconnect } => {
                if reconnect {
                    tracing::info!("Connection re-established");
                } else {
                    tracing::info!("Connection open");
                }
                self.emit(ConnectionEvent::Opened { reconnect });
            }
            SessionEvent::Closed { reason, will_retry } => {
                if will_retry {
                    tracing::warn!(
                        "Connection closed: {} (reconnecting in {:?})",
                        reason,
                        self.timings.reconnect_delay
                    );
                } else {
                    tracing::info!("Connection closed: {}", reason);
                }
                self.emit(ConnectionEvent::Closed { reason });
            }
            SessionEvent::ConnectFailed { attempt, error } => {
                tracing::warn!(
                    "Connection attempt {} failed: {} (retrying in {:?})",
                    attempt,
                    error,
                    self.timings.reconnect_delay
                );
            }
        }
    }

    fn publish(&self) {
        let snapshot = self.state.snapshot();
        let changed = self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
        if changed {
            self.emit(ConnectionEvent::StateChanged(snapshot));
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // Owner gone means nobody is listening; nothing to do.
        let _ = self.events.send(event);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn close_connection(mut connection: Connection) {
    if let Err(e) = connection.sink.close().await {
        tracing::debug!("Close of superseded connection failed: {}", e);
    }
}
