//! SyncEngine - the session actor.
//!
//! The engine owns every reconciler from sync-core and is their only writer.
//! Three sources feed it, all as messages into one `select!` loop:
//!
//! ```text
//! ConnectionManager ──ConnectionEvent──▶ ┐
//! poll ticker (2s) ──spawned calls──▶    ├─▶ engine actor ──▶ watch<ChatSnapshot>
//! SyncEngine handle ──Command──▶         ┘
//! ```
//!
//! Backend calls never run on the actor itself. Each one is a spawned task
//! that reports its result back, so a hung call only stalls its own cycle.
//! The rendering side reads cloned [`ChatSnapshot`]s and never mutates
//! reconciler state.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant as StdInstant;

use chatsync_core::validation;
use chatsync_core::{
    ChannelOrderStore, ConnectionSnapshot, Epoch, LoadOutcome, LoadTicket, MessageReconciler,
    PresenceDirectory, PushOutcome, ReactionAggregator, ReactionChange, StatusCounts,
    ValidationError,
};
use chatsync_types::{Channel, ChannelId, ClientFrame, Message, MessageId, ServerFrame, User, UserStatus};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::backend::{ApiError, Backend};
use crate::config::{ClientConfig, ConfigError};
use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::transport::Transport;

/// Errors returned by engine commands.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input rejected locally; no backend call was made.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The backend rejected the call.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Invalid client configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The engine actor is no longer running.
    #[error("engine stopped")]
    Stopped,
}

/// Read-only view of the session, published after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSnapshot {
    /// Connectivity indicator.
    pub connection: ConnectionSnapshot,
    /// The logged-in user.
    pub me: User,
    /// User directory in display order (online first, then by username).
    pub users: Vec<User>,
    /// Users per status.
    pub status_counts: StatusCounts,
    /// Channels in local display order.
    pub channels: Vec<Channel>,
    /// Name of the active channel.
    pub active_channel: Option<String>,
    /// Messages of the active channel, first-seen order.
    pub messages: Vec<Message>,
    /// Messages carrying unconfirmed reaction toggles.
    pub pending_reactions: usize,
    /// When the oldest unconfirmed toggle was applied.
    pub oldest_pending_reaction: Option<StdInstant>,
}

impl ChatSnapshot {
    /// Directory without the logged-in user.
    pub fn others(&self) -> impl Iterator<Item = &User> {
        self.users
            .iter()
            .filter(move |u| u.username != self.me.username)
    }

    /// Look up a message of the active channel.
    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Look up a channel by name.
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

enum Command {
    Activate {
        name: String,
        reply: Reply<()>,
    },
    Send {
        text: String,
        post: bool,
        reply: Reply<()>,
    },
    ToggleReaction {
        id: MessageId,
        emoji: String,
        reply: Reply<ReactionChange>,
    },
    SetStatus {
        status: UserStatus,
        reply: Reply<bool>,
    },
    CreateChannel {
        name: String,
        description: String,
        reply: Reply<Channel>,
    },
    DeleteChannel {
        name: String,
        reply: Reply<()>,
    },
    Reorder {
        dragged: ChannelId,
        target: ChannelId,
        reply: Reply<bool>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Completed backend calls.
enum Done {
    Channels {
        epoch: Epoch,
        result: Result<Vec<Channel>, ApiError>,
    },
    Users(Result<Vec<User>, ApiError>),
    Messages {
        ticket: LoadTicket,
        result: Result<Vec<Message>, ApiError>,
    },
    Sent {
        result: Result<(), ApiError>,
        reply: Reply<()>,
    },
    Reacted {
        result: Result<(), ApiError>,
        change: ReactionChange,
        reply: Reply<ReactionChange>,
    },
    StatusSet {
        status: UserStatus,
        result: Result<bool, ApiError>,
        reply: Reply<bool>,
    },
    ChannelCreated {
        result: Result<Channel, ApiError>,
        reply: Reply<Channel>,
    },
    ChannelDeleted {
        name: String,
        result: Result<(), ApiError>,
        reply: Reply<()>,
    },
}

/// Handle to a running session.
///
/// Dropping every handle stops the engine and closes its connection.
#[derive(Clone)]
pub struct SyncEngine {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ChatSnapshot>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("me", &self.snapshot.borrow().me.username)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Start a session for `user`.
    ///
    /// Opens the connection, activates `config.default_channel` and loads
    /// users, channels and messages right away. Must be called within a
    /// tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if `config.server_url` is not a WebSocket URL.
    pub fn start(
        backend: Arc<dyn Backend>,
        transport: Arc<dyn Transport>,
        config: &ClientConfig,
        user: User,
    ) -> Result<Self, EngineError> {
        let base_url = config.base_url()?;
        let (connection, connection_events) =
            ConnectionManager::spawn(transport, base_url, config.timings());

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let mut presence = PresenceDirectory::new();
        presence.upsert_status(&user.username, user.status);

        let mut actor = EngineActor {
            backend,
            connection,
            me: user,
            presence,
            channels: Vec::new(),
            order: ChannelOrderStore::new(),
            messages: MessageReconciler::new(),
            reactions: ReactionAggregator::new(),
            connection_state: ConnectionSnapshot::default(),
            done: done_tx,
            snapshot: watch::channel(initial_snapshot()).0,
        };
        let snapshot_rx = actor.snapshot.subscribe();

        tracing::info!("Starting session for {}", actor.me.username);
        actor.connection.open(&actor.me.username);
        actor.activate(&config.default_channel);
        actor.load_directory();
        actor.publish();

        let poll_interval = config.poll_interval();
        tokio::spawn(actor.run(commands_rx, done_rx, connection_events, poll_interval));

        Ok(Self {
            commands: commands_tx,
            snapshot: snapshot_rx,
        })
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that tracks snapshots.
    pub fn watch(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshot.clone()
    }

    /// Make `name` the active channel. No-op if it already is.
    pub async fn activate_channel(&self, name: &str) -> Result<(), EngineError> {
        let name = name.to_string();
        self.request(|reply| Command::Activate { name, reply }).await
    }

    /// Send a plain message to the active channel.
    pub async fn send_message(&self, text: &str) -> Result<(), EngineError> {
        let text = text.to_string();
        self.request(|reply| Command::Send {
            text,
            post: false,
            reply,
        })
        .await
    }

    /// Send a post to the active channel.
    pub async fn send_post(&self, text: &str) -> Result<(), EngineError> {
        let text = text.to_string();
        self.request(|reply| Command::Send {
            text,
            post: true,
            reply,
        })
        .await
    }

    /// Toggle own `emoji` reaction on a message of the active channel.
    ///
    /// The local copy changes immediately; the call resolves once the
    /// backend has answered.
    pub async fn toggle_reaction(
        &self,
        id: &MessageId,
        emoji: &str,
    ) -> Result<ReactionChange, EngineError> {
        let id = id.clone();
        let emoji = emoji.to_string();
        self.request(|reply| Command::ToggleReaction { id, emoji, reply })
            .await
    }

    /// Change own status. `Ok(false)` if the backend does not know the user.
    pub async fn set_status(&self, status: UserStatus) -> Result<bool, EngineError> {
        self.request(|reply| Command::SetStatus { status, reply })
            .await
    }

    /// Create a channel and switch to it.
    pub async fn create_channel(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Channel, EngineError> {
        let name = name.to_string();
        let description = description.to_string();
        self.request(|reply| Command::CreateChannel {
            name,
            description,
            reply,
        })
        .await
    }

    /// Delete a channel. If it was active, the first remaining channel
    /// becomes active.
    pub async fn delete_channel(&self, name: &str) -> Result<(), EngineError> {
        let name = name.to_string();
        self.request(|reply| Command::DeleteChannel { name, reply })
            .await
    }

    /// Move `dragged` to `target`'s position in the local channel order.
    pub async fn reorder_channels(
        &self,
        dragged: &ChannelId,
        target: &ChannelId,
    ) -> Result<bool, EngineError> {
        let dragged = dragged.clone();
        let target = target.clone();
        self.request(|reply| Command::Reorder {
            dragged,
            target,
            reply,
        })
        .await
    }

    /// Close the connection and stop the engine.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }
}

fn initial_snapshot() -> ChatSnapshot {
    ChatSnapshot {
        connection: ConnectionSnapshot::default(),
        me: User::new("", UserStatus::Offline),
        users: Vec::new(),
        status_counts: StatusCounts::default(),
        channels: Vec::new(),
        active_channel: None,
        messages: Vec::new(),
        pending_reactions: 0,
        oldest_pending_reaction: None,
    }
}

fn reply<T>(reply: Reply<T>, result: Result<T, EngineError>) {
    // Caller stopped waiting; the change stands regardless.
    let _ = reply.send(result);
}

fn now() -> StdInstant {
    Instant::now().into_std()
}

struct EngineActor {
    backend: Arc<dyn Backend>,
    connection: ConnectionManager,
    me: User,
    presence: PresenceDirectory,
    /// Latest server channel list plus local additions.
    channels: Vec<Channel>,
    order: ChannelOrderStore,
    messages: MessageReconciler,
    reactions: ReactionAggregator,
    connection_state: ConnectionSnapshot,
    done: mpsc::UnboundedSender<Done>,
    snapshot: watch::Sender<ChatSnapshot>,
}

impl EngineActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut done: mpsc::UnboundedReceiver<Done>,
        mut connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
        poll_interval: std::time::Duration,
    ) {
        let mut poll = interval_at(Instant::now() + poll_interval, poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply: tx }) => {
                        self.connection.close();
                        reply(tx, Ok(()));
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.connection.close();
                        break;
                    }
                },
                Some(event) = connection_events.recv() => self.handle_connection(event),
                Some(finished) = done.recv() => self.handle_done(finished),
                _ = poll.tick() => self.poll(),
            }
            self.publish();
        }

        tracing::info!("Session for {} stopped", self.me.username);
    }

    // ===========================================
    // Commands
    // ===========================================

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Activate { name, reply: tx } => {
                let result = if self.channels.iter().any(|c| c.name == name) {
                    self.activate(&name);
                    Ok(())
                } else {
                    Err(ValidationError::UnknownChannel(name).into())
                };
                reply(tx, result);
            }
            Command::Send {
                text,
                post,
                reply: tx,
            } => self.send(text, post, tx),
            Command::ToggleReaction {
                id,
                emoji,
                reply: tx,
            } => self.toggle_reaction(id, emoji, tx),
            Command::SetStatus { status, reply: tx } => {
                let user = self.me.username.clone();
                self.spawn_call(move |backend| async move {
                    Done::StatusSet {
                        status,
                        result: backend.update_status(&user, status).await,
                        reply: tx,
                    }
                });
            }
            Command::CreateChannel {
                name,
                description,
                reply: tx,
            } => match validation::channel_name(&name) {
                Ok(name) => {
                    let creator = self.me.username.clone();
                    self.spawn_call(move |backend| async move {
                        Done::ChannelCreated {
                            result: backend.create_channel(&name, &description, &creator).await,
                            reply: tx,
                        }
                    });
                }
                Err(e) => reply(tx, Err(e.into())),
            },
            Command::DeleteChannel { name, reply: tx } => {
                if !self.channels.iter().any(|c| c.name == name) {
                    reply(tx, Err(ValidationError::UnknownChannel(name).into()));
                    return;
                }
                let requester = self.me.username.clone();
                self.spawn_call(move |backend| async move {
                    let result = backend.delete_channel(&name, &requester).await;
                    Done::ChannelDeleted {
                        name,
                        result,
                        reply: tx,
                    }
                });
            }
            Command::Reorder {
                dragged,
                target,
                reply: tx,
            } => reply(tx, Ok(self.order.reorder(&dragged, &target))),
            // Handled by the run loop
            Command::Shutdown { reply: tx } => reply(tx, Ok(())),
        }
    }

    fn send(&mut self, text: String, post: bool, tx: Reply<()>) {
        if let Err(e) = validation::message_text(&text) {
            reply(tx, Err(e.into()));
            return;
        }
        let Some(channel) = self.messages.active_channel().map(str::to_string) else {
            reply(tx, Err(ValidationError::NoActiveChannel.into()));
            return;
        };

        let user = self.me.username.clone();
        self.spawn_call(move |backend| async move {
            let result = if post {
                backend.send_post(&user, &text, &channel).await
            } else {
                backend.send_message(&user, &text, &channel).await
            };
            Done::Sent { result, reply: tx }
        });
    }

    fn toggle_reaction(&mut self, id: MessageId, emoji: String, tx: Reply<ReactionChange>) {
        let change = match self.reactions.toggle(
            &mut self.messages,
            &id,
            &emoji,
            &self.me.username,
            now(),
        ) {
            Ok(change) => change,
            Err(e) => {
                reply(tx, Err(e.into()));
                return;
            }
        };
        let Some(channel) = self.messages.active_channel().map(str::to_string) else {
            reply(tx, Err(ValidationError::NoActiveChannel.into()));
            return;
        };
        tracing::debug!("Optimistic {:?} of {} on {}", change, emoji, id);

        let user = self.me.username.clone();
        self.spawn_call(move |backend| async move {
            Done::Reacted {
                result: backend.add_reaction(&id, &emoji, &user, &channel).await,
                change,
                reply: tx,
            }
        });
    }

    // ===========================================
    // Loads
    // ===========================================

    /// Switch the active channel and start its fresh load.
    fn activate(&mut self, name: &str) {
        let Some(ticket) = self.messages.activate(name) else {
            return;
        };
        tracing::info!("Switched to #{}", name);
        self.reactions.reset();
        self.connection.send(ClientFrame::SubscribeChannel {
            channel: name.to_string(),
        });
        self.load_messages(ticket);
    }

    fn poll(&mut self) {
        tracing::debug!("Poll cycle");
        self.load_directory();
        if let Some(ticket) = self.messages.begin_load() {
            self.load_messages(ticket);
        }
    }

    fn load_directory(&self) {
        let epoch = self.order.epoch();
        self.spawn_call(move |backend| async move {
            Done::Channels {
                epoch,
                result: backend.get_all_channels().await,
            }
        });
        self.spawn_call(|backend| async move { Done::Users(backend.get_all_users().await) });
    }

    fn load_messages(&self, ticket: LoadTicket) {
        self.spawn_call(move |backend| async move {
            let result = backend.get_messages(&ticket.channel).await;
            Done::Messages { ticket, result }
        });
    }

    /// Run a backend call as its own task and feed the result back.
    fn spawn_call<F, Fut>(&self, call: F)
    where
        F: FnOnce(Arc<dyn Backend>) -> Fut,
        Fut: Future<Output = Done> + Send + 'static,
    {
        let task = call(Arc::clone(&self.backend));
        let done = self.done.clone();
        tokio::spawn(async move {
            let _ = done.send(task.await);
        });
    }

    // ===========================================
    // Results
    // ===========================================

    fn handle_done(&mut self, finished: Done) {
        match finished {
            Done::Channels {
                epoch,
                result: Ok(channels),
            } => {
                if self.order.sync(epoch, &channels) {
                    self.channels = channels;
                } else {
                    tracing::debug!(
                        "Discarding channel list from epoch {} (local change since)",
                        epoch.value()
                    );
                }
            }
            Done::Channels { result: Err(e), .. } => {
                tracing::warn!("Failed to load channels: {}", e)
            }
            Done::Users(Ok(users)) => {
                self.presence.merge_directory(users);
            }
            Done::Users(Err(e)) => tracing::warn!("Failed to load users: {}", e),
            Done::Messages { ticket, result } => self.apply_messages(ticket, result),
            Done::Sent { result, reply: tx } => {
                if result.is_ok() {
                    self.refresh();
                }
                reply(tx, result.map_err(Into::into));
            }
            Done::Reacted {
                result,
                change,
                reply: tx,
            } => match result {
                Ok(()) => {
                    self.refresh();
                    reply(tx, Ok(change));
                }
                Err(e) => {
                    tracing::warn!("Reaction rejected: {} (next poll restores server state)", e);
                    reply(tx, Err(e.into()));
                }
            },
            Done::StatusSet {
                status,
                result,
                reply: tx,
            } => {
                if let Ok(true) = result {
                    self.me.status = status;
                    self.presence.upsert_status(&self.me.username, status);
                    self.connection.send(ClientFrame::StatusChange { status });
                    tracing::info!("Status set to {}", status);
                }
                reply(tx, result.map_err(Into::into));
            }
            Done::ChannelCreated { result, reply: tx } => match result {
                Ok(channel) => {
                    tracing::info!("Created #{}", channel.name);
                    self.order.insert(channel.id.clone());
                    let name = channel.name.clone();
                    self.channels.retain(|c| c.id != channel.id);
                    self.channels.push(channel.clone());
                    self.activate(&name);
                    reply(tx, Ok(channel));
                }
                Err(e) => reply(tx, Err(e.into())),
            },
            Done::ChannelDeleted {
                name,
                result,
                reply: tx,
            } => match result {
                Ok(()) => {
                    tracing::info!("Deleted #{}", name);
                    self.remove_channel(&name);
                    reply(tx, Ok(()));
                }
                Err(e) => reply(tx, Err(e.into())),
            },
        }
    }

    fn apply_messages(&mut self, ticket: LoadTicket, result: Result<Vec<Message>, ApiError>) {
        let loaded = match result {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!("Failed to load messages of #{}: {}", ticket.channel, e);
                return;
            }
        };
        let ids: Vec<MessageId> = loaded.iter().map(|m| m.id.clone()).collect();

        match self.messages.apply_load(&ticket, loaded) {
            LoadOutcome::Applied { added, updated } => {
                self.reactions.confirm(&ids);
                if added + updated > 0 {
                    tracing::debug!(
                        "#{}: {} new, {} updated messages",
                        ticket.channel,
                        added,
                        updated
                    );
                }
            }
            LoadOutcome::Stale => {
                tracing::debug!("Discarding stale load of #{}", ticket.channel);
            }
        }
    }

    /// One extra load of the active channel.
    fn refresh(&self) {
        if let Some(ticket) = self.messages.begin_load() {
            self.load_messages(ticket);
        }
    }

    fn remove_channel(&mut self, name: &str) {
        let Some(position) = self.channels.iter().position(|c| c.name == name) else {
            return;
        };
        let removed = self.channels.remove(position);
        self.order.remove(&removed.id);

        if self.messages.active_channel() == Some(name) {
            let next = self
                .order
                .apply(&self.channels)
                .into_iter()
                .next()
                .map(|c| c.name);
            if let Some(next) = next {
                self.activate(&next);
            }
        }
    }

    // ===========================================
    // Connection
    // ===========================================

    fn handle_connection(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(state) => self.connection_state = state,
            ConnectionEvent::Opened { reconnect } => {
                if let Some(channel) = self.messages.active_channel() {
                    if reconnect {
                        tracing::info!("Re-subscribing to #{}", channel);
                    }
                    self.connection.send(ClientFrame::SubscribeChannel {
                        channel: channel.to_string(),
                    });
                }
            }
            ConnectionEvent::Closed { reason } => {
                tracing::debug!("Connection closed: {}", reason);
            }
            ConnectionEvent::Frame(frame) => self.handle_frame(frame),
        }
    }

    fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::StatusUpdate(presence) => {
                self.presence.apply_update(&presence);
            }
            ServerFrame::UsersList(list) => {
                self.presence.apply_snapshot(&list);
            }
            ServerFrame::ChannelMessage { channel, message } => {
                let id = message.id.clone();
                match self.messages.apply_push(&channel, message) {
                    PushOutcome::Inserted => tracing::debug!("Pushed {} into #{}", id, channel),
                    PushOutcome::Duplicate => tracing::debug!("Ignoring duplicate push {}", id),
                    PushOutcome::OtherChannel | PushOutcome::NoActiveChannel => {
                        tracing::debug!("Ignoring push for inactive #{}", channel);
                    }
                }
            }
            ServerFrame::Subscribed { channel } => tracing::debug!("Subscribed to #{}", channel),
            ServerFrame::Connected { message } => tracing::debug!("Server says: {}", message),
            ServerFrame::Pong => tracing::debug!("Pong"),
            ServerFrame::Unknown { .. } => {}
        }
    }

    // ===========================================
    // Snapshot
    // ===========================================

    fn publish(&self) {
        let next = ChatSnapshot {
            connection: self.connection_state,
            me: self.me.clone(),
            users: self.presence.sorted(),
            status_counts: self.presence.counts(),
            channels: self.order.apply(&self.channels),
            active_channel: self.messages.active_channel().map(str::to_string),
            messages: self.messages.messages().to_vec(),
            pending_reactions: self.reactions.pending_count(),
            oldest_pending_reaction: self.reactions.oldest_pending(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Call, MemoryBackend};
    use crate::transport::MockTransport;
    use std::time::Duration;

    struct Harness {
        engine: SyncEngine,
        backend: MemoryBackend,
        transport: MockTransport,
    }

    fn start() -> Harness {
        let backend = MemoryBackend::new();
        backend.add_user("alice", UserStatus::Online);
        backend.add_user("bob", UserStatus::Online);
        let transport = MockTransport::new();
        let engine = SyncEngine::start(
            Arc::new(backend.clone()),
            Arc::new(transport.clone()),
            &ClientConfig::default(),
            User::new("alice", UserStatus::Online).with_id("user-alice"),
        )
        .unwrap();
        Harness {
            engine,
            backend,
            transport,
        }
    }

    async fn until(engine: &SyncEngine, pred: impl Fn(&ChatSnapshot) -> bool) -> ChatSnapshot {
        let mut rx = engine.watch();
        let snapshot = rx.wait_for(|s| pred(s)).await.unwrap();
        snapshot.clone()
    }

    async fn ready() -> Harness {
        let h = start();
        until(&h.engine, |s| s.connection.is_open() && !s.channels.is_empty()).await;
        h
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // ===========================================
    // Startup Tests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn start_loads_everything_and_subscribes() {
        let h = ready().await;
        settle().await;

        let s = h.engine.snapshot();
        assert_eq!(s.active_channel.as_deref(), Some("general"));
        assert_eq!(s.channels.len(), 3);
        assert_eq!(s.users.len(), 2);
        assert_eq!(s.me.username, "alice");
        assert!(h
            .transport
            .sent_client_frames()
            .contains(&ClientFrame::SubscribeChannel {
                channel: "general".into()
            }));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_server_url_fails_start() {
        let config = ClientConfig::default().with_server_url("http://nope");
        let err = SyncEngine::start(
            Arc::new(MemoryBackend::new()),
            Arc::new(MockTransport::new()),
            &config,
            User::new("alice", UserStatus::Online),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_interval() {
        let h = ready().await;
        let before = h.backend.call_count(Call::GetAllChannels);

        tokio::time::sleep(Duration::from_millis(4100)).await;

        assert_eq!(h.backend.call_count(Call::GetAllChannels), before + 2);
    }

    // ===========================================
    // Message Tests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn send_message_triggers_refresh() {
        let h = ready().await;

        h.engine.send_message("hello").await.unwrap();

        let s = until(&h.engine, |s| s.messages.len() == 1).await;
        assert_eq!(s.messages[0].text, "hello");
        assert_eq!(s.messages[0].user, "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn blank_message_makes_no_backend_call() {
        let h = ready().await;

        let err = h.engine.send_post("   ").await.unwrap_err();

        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::EmptyMessage)
        ));
        assert_eq!(h.backend.call_count(Call::SendPost), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pushed_message_for_other_channel_is_ignored() {
        let h = ready().await;

        h.transport.push_frame(&ServerFrame::ChannelMessage {
            channel: "random".into(),
            message: Message::new("r1", "bob", "random", "elsewhere"),
        });
        h.transport.push_frame(&ServerFrame::ChannelMessage {
            channel: "general".into(),
            message: Message::new("g1", "bob", "general", "here"),
        });

        let s = until(&h.engine, |s| !s.messages.is_empty()).await;
        assert_eq!(s.messages.len(), 1);
        assert_eq!(s.messages[0].id, MessageId::new("g1"));
    }

    // ===========================================
    // Reaction Tests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn reaction_on_unknown_message_is_local_error() {
        let h = ready().await;

        let err = h
            .engine
            .toggle_reaction(&MessageId::new("missing"), "👍")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::UnknownMessage(_))
        ));
        assert_eq!(h.backend.call_count(Call::AddReaction), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reaction_is_surfaced_and_reverted_by_poll() {
        let h = ready().await;
        h.backend
            .seed_message(Message::new("m1", "bob", "general", "hi"));
        until(&h.engine, |s| s.messages.len() == 1).await;
        h.backend
            .fail_next(Call::AddReaction, ApiError::Unavailable("down".into()));

        let err = h
            .engine
            .toggle_reaction(&MessageId::new("m1"), "🔥")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Api(_)));

        // Optimistic state is visible until the next poll
        let s = h.engine.snapshot();
        assert!(s.messages[0].reactions.contains_key("🔥"));
        assert_eq!(s.pending_reactions, 1);

        let s = until(&h.engine, |s| s.pending_reactions == 0).await;
        assert!(s.messages[0].reactions.is_empty());
    }

    // ===========================================
    // Status Tests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn set_status_updates_presence_and_announces() {
        let h = ready().await;

        assert!(h.engine.set_status(UserStatus::Away).await.unwrap());
        settle().await;

        let s = h.engine.snapshot();
        assert_eq!(s.me.status, UserStatus::Away);
        let me = s.users.iter().find(|u| u.username == "alice").unwrap();
        assert_eq!(me.status, UserStatus::Away);
        assert!(h
            .transport
            .sent_client_frames()
            .contains(&ClientFrame::StatusChange {
                status: UserStatus::Away
            }));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_status_change_changes_nothing() {
        let backend = MemoryBackend::new();
        let transport = MockTransport::new();
        let engine = SyncEngine::start(
            Arc::new(backend),
            Arc::new(transport.clone()),
            &ClientConfig::default(),
            User::new("ghost", UserStatus::Online),
        )
        .unwrap();

        assert!(!engine.set_status(UserStatus::Away).await.unwrap());
        assert_eq!(engine.snapshot().me.status, UserStatus::Online);
    }

    // ===========================================
    // Channel Tests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn create_channel_activates_it() {
        let h = ready().await;

        let channel = h.engine.create_channel(" ops ", "On call").await.unwrap();
        assert_eq!(channel.name, "ops");

        let s = h.engine.snapshot();
        assert_eq!(s.active_channel.as_deref(), Some("ops"));
        assert_eq!(s.channels.last().unwrap().name, "ops");
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_active_channel_switches_to_first() {
        let h = ready().await;
        h.engine.create_channel("ops", "").await.unwrap();

        h.engine.delete_channel("ops").await.unwrap();

        let s = h.engine.snapshot();
        assert_eq!(s.active_channel.as_deref(), Some("general"));
        assert!(s.channel("ops").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_errors_are_typed() {
        let h = ready().await;

        assert!(matches!(
            h.engine.delete_channel("general").await.unwrap_err(),
            EngineError::Api(ApiError::SystemChannel(_))
        ));
        assert!(matches!(
            h.engine.delete_channel("nope").await.unwrap_err(),
            EngineError::Validation(ValidationError::UnknownChannel(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn reorder_survives_poll() {
        let h = ready().await;
        let s = h.engine.snapshot();
        let general = s.channel("general").unwrap().id.clone();
        let dev = s.channel("dev-team").unwrap().id.clone();

        assert!(h.engine.reorder_channels(&dev, &general).await.unwrap());
        tokio::time::sleep(Duration::from_secs(5)).await;

        let names: Vec<_> = h
            .engine
            .snapshot()
            .channels
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, vec!["dev-team", "general", "random"]);
    }

    #[tokio::test(start_paused = true)]
    async fn channel_list_fetched_before_create_is_discarded() {
        let h = ready().await;

        // Next poll reads the list before `ops` exists and hangs
        h.backend.hold_channels();
        tokio::time::sleep(Duration::from_millis(2100)).await;

        let ops = h.engine.create_channel("ops", "").await.unwrap();
        let general = h.engine.snapshot().channel("general").unwrap().id.clone();
        assert!(h.engine.reorder_channels(&ops.id, &general).await.unwrap());

        h.backend.release_channels();
        settle().await;

        let names = |s: &ChatSnapshot| -> Vec<String> {
            s.channels.iter().map(|c| c.name.clone()).collect()
        };
        let expected = vec!["ops", "general", "random", "dev-team"];
        assert_eq!(names(&h.engine.snapshot()), expected);
        h.engine.activate_channel("ops").await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(names(&h.engine.snapshot()), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn activate_unknown_channel_fails() {
        let h = ready().await;
        assert!(matches!(
            h.engine.activate_channel("nope").await.unwrap_err(),
            EngineError::Validation(ValidationError::UnknownChannel(_))
        ));
    }

    // ===========================================
    // Shutdown Tests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_engine_and_connection() {
        let h = ready().await;

        h.engine.shutdown().await.unwrap();
        settle().await;

        assert!(matches!(
            h.engine.send_message("late").await.unwrap_err(),
            EngineError::Stopped
        ));
        assert_eq!(h.transport.live_connections(), 0);
    }
}
