//! In-memory backend for tests and demos.
//!
//! Follows the rules of the real chat server: the built-in channels
//! `general`, `random` and `dev-team` always exist and cannot be deleted,
//! only a channel's creator may delete it, channel names are unique, and
//! reactions toggle server-side. Passwords are kept in plain text; this is
//! a test double, not an auth service.
//!
//! Hooks let tests hold `get_messages` for a channel until released, fail
//! the next call of a given kind, and count calls. When attached to a
//! [`MockTransport`], new and reacted messages are pushed as
//! `channel_message` frames, the way the server broadcasts them.

use super::{ApiError, Backend};
use crate::transport::MockTransport;
use async_trait::async_trait;
use chatsync_core::toggle_reaction;
use chatsync_types::{Channel, ChannelId, Message, MessageId, ServerFrame, User, UserStatus};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use uuid::Uuid;

/// Channels every backend starts with.
pub const SYSTEM_CHANNELS: [(&str, &str); 3] = [
    ("general", "General discussions"),
    ("random", "Random stuff"),
    ("dev-team", "Development team"),
];

/// Creator recorded on the built-in channels.
const SYSTEM_USER: &str = "system";

/// Number of messages `get_messages` returns at most.
const MESSAGE_LIMIT: usize = 100;

/// Kinds of backend calls, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    /// `login`
    Login,
    /// `register`
    Register,
    /// `get_all_users`
    GetAllUsers,
    /// `update_status`
    UpdateStatus,
    /// `get_all_channels`
    GetAllChannels,
    /// `create_channel`
    CreateChannel,
    /// `delete_channel`
    DeleteChannel,
    /// `get_messages`
    GetMessages,
    /// `send_message`
    SendMessage,
    /// `send_post`
    SendPost,
    /// `add_reaction`
    AddReaction,
}

/// In-memory [`Backend`].
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Account {
    user: User,
    password: String,
}

#[derive(Debug, Default)]
struct Inner {
    /// Keyed by email.
    accounts: BTreeMap<String, Account>,
    /// Users known by username only (seeded by tests).
    guests: BTreeMap<String, User>,
    channels: Vec<Channel>,
    messages: HashMap<String, Vec<Message>>,
    held: HashMap<String, watch::Sender<bool>>,
    held_channels: Option<watch::Sender<bool>>,
    failures: HashMap<Call, VecDeque<ApiError>>,
    calls: HashMap<Call, usize>,
    push: Option<MockTransport>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a backend with the built-in channels and no users.
    pub fn new() -> Self {
        let mut inner = Inner::default();
        for (name, description) in SYSTEM_CHANNELS {
            inner.channels.push(
                Channel::new(ChannelId::random(), name)
                    .with_description(description)
                    .with_creator(SYSTEM_USER),
            );
        }
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Broadcast new and reacted messages through `transport`.
    pub fn with_push(self, transport: MockTransport) -> Self {
        self.lock().push = Some(transport);
        self
    }

    /// Add a directory entry without an account.
    pub fn add_user(&self, username: &str, status: UserStatus) {
        let user = User::new(username, status).with_id(format!("user-{username}"));
        self.lock().guests.insert(username.to_string(), user);
    }

    /// Store a message as if it had been sent earlier. Not broadcast.
    pub fn seed_message(&self, message: Message) {
        self.lock()
            .messages
            .entry(message.channel.clone())
            .or_default()
            .push(message);
    }

    /// Everything stored for a channel, oldest first.
    pub fn stored_messages(&self, channel: &str) -> Vec<Message> {
        self.lock()
            .messages
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Make `get_messages(channel)` wait until [`release_messages`] is
    /// called for that channel.
    ///
    /// [`release_messages`]: MemoryBackend::release_messages
    pub fn hold_messages(&self, channel: &str) {
        let (tx, _rx) = watch::channel(false);
        self.lock().held.insert(channel.to_string(), tx);
    }

    /// Let held `get_messages(channel)` calls complete.
    pub fn release_messages(&self, channel: &str) {
        if let Some(tx) = self.lock().held.remove(channel) {
            tx.send_replace(true);
        }
    }

    /// Make `get_all_channels` wait until [`release_channels`] is called.
    /// The list is read before waiting, so held calls return what was
    /// stored when they were made.
    ///
    /// [`release_channels`]: MemoryBackend::release_channels
    pub fn hold_channels(&self) {
        let (tx, _rx) = watch::channel(false);
        self.lock().held_channels = Some(tx);
    }

    /// Let held `get_all_channels` calls complete.
    pub fn release_channels(&self) {
        if let Some(tx) = self.lock().held_channels.take() {
            tx.send_replace(true);
        }
    }

    /// Fail the next call of kind `call` with `error`.
    pub fn fail_next(&self, call: Call, error: ApiError) {
        self.lock().failures.entry(call).or_default().push_back(error);
    }

    /// How many calls of kind `call` were made.
    pub fn call_count(&self, call: Call) -> usize {
        self.lock().calls.get(&call).copied().unwrap_or(0)
    }

    /// Record a call and return an injected failure, if any.
    fn enter(&self, call: Call) -> Result<MutexGuard<'_, Inner>, ApiError> {
        let mut inner = self.lock();
        *inner.calls.entry(call).or_default() += 1;
        if let Some(error) = inner.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            tracing::debug!("Injected failure for {:?}: {}", call, error);
            return Err(error);
        }
        Ok(inner)
    }

    fn post(
        &self,
        call: Call,
        user: &str,
        text: &str,
        channel: &str,
        is_post: bool,
    ) -> Result<(), ApiError> {
        let mut inner = self.enter(call)?;
        if text.is_empty() {
            return Err(ApiError::Rejected("message text is empty".into()));
        }

        let mut message = Message::new(MessageId::random(), user, channel, text);
        message.timestamp = timestamp();
        message.is_post = is_post;
        inner
            .messages
            .entry(channel.to_string())
            .or_default()
            .push(message.clone());
        tracing::debug!("{} -> #{}: {}", user, channel, message.id);
        inner.broadcast(message);
        Ok(())
    }
}

impl Inner {
    fn broadcast(&self, message: Message) {
        if let Some(push) = &self.push {
            push.push_frame(&ServerFrame::ChannelMessage {
                channel: message.channel.clone(),
                message,
            });
        }
    }

    /// Mark the account's user online, like a fresh login does.
    fn sign_in(&mut self, email: &str) -> Option<User> {
        let account = self.accounts.get_mut(email)?;
        account.user.status = UserStatus::Online;
        Some(account.user.clone())
    }

    fn find_user_mut(&mut self, username: &str) -> Option<&mut User> {
        if let Some(account) = self
            .accounts
            .values_mut()
            .find(|a| a.user.username == username)
        {
            return Some(&mut account.user);
        }
        self.guests.get_mut(username)
    }
}

fn timestamp() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    millis.to_string()
}

fn check_email(email: &str) -> Result<(), ApiError> {
    chatsync_core::validation::login_credentials(email, "-")
        .map_err(|e| ApiError::Rejected(e.to_string()))
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let mut inner = self.enter(Call::Login)?;
        check_email(email)?;
        if password.is_empty() {
            return Err(ApiError::Rejected("password is required".into()));
        }

        let account = inner.accounts.get(email).ok_or(ApiError::UserNotFound)?;
        if account.password != password {
            return Err(ApiError::InvalidCredentials);
        }
        inner.sign_in(email).ok_or(ApiError::UserNotFound)
    }

    async fn register(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let mut inner = self.enter(Call::Register)?;
        chatsync_core::validation::register_credentials(email, password)
            .map_err(|e| ApiError::Rejected(e.to_string()))?;
        if inner.accounts.contains_key(email) {
            return Err(ApiError::UserExists(email.to_string()));
        }

        let username = email.split('@').next().unwrap_or(email);
        let user = User::new(username, UserStatus::Online)
            .with_id(Uuid::new_v4().to_string())
            .with_email(email);
        inner.accounts.insert(
            email.to_string(),
            Account {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        tracing::debug!("Registered {} ({})", username, email);
        Ok(user)
    }

    async fn get_all_users(&self) -> Result<Vec<User>, ApiError> {
        let inner = self.enter(Call::GetAllUsers)?;
        let mut users: Vec<User> = inner
            .accounts
            .values()
            .map(|a| a.user.clone())
            .chain(inner.guests.values().cloned())
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn update_status(&self, username: &str, status: UserStatus) -> Result<bool, ApiError> {
        let mut inner = self.enter(Call::UpdateStatus)?;
        match inner.find_user_mut(username) {
            Some(user) => {
                user.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_all_channels(&self) -> Result<Vec<Channel>, ApiError> {
        let (channels, held) = {
            let inner = self.enter(Call::GetAllChannels)?;
            let held = inner.held_channels.as_ref().map(watch::Sender::subscribe);
            (inner.channels.clone(), held)
        };
        if let Some(mut released) = held {
            let _ = released.wait_for(|released| *released).await;
        }
        Ok(channels)
    }

    async fn create_channel(
        &self,
        name: &str,
        description: &str,
        creator: &str,
    ) -> Result<Channel, ApiError> {
        let mut inner = self.enter(Call::CreateChannel)?;
        if name.is_empty() {
            return Err(ApiError::Rejected("channel name is empty".into()));
        }
        if inner.channels.iter().any(|c| c.name == name) {
            return Err(ApiError::ChannelExists(name.to_string()));
        }

        let mut channel = Channel::new(ChannelId::random(), name)
            .with_description(description)
            .with_creator(creator);
        channel.members = vec![creator.to_string()];
        channel.created_at = timestamp();
        inner.channels.push(channel.clone());
        tracing::debug!("Channel #{} created by {}", name, creator);
        Ok(channel)
    }

    async fn delete_channel(&self, name: &str, requester: &str) -> Result<(), ApiError> {
        let mut inner = self.enter(Call::DeleteChannel)?;
        let position = inner
            .channels
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| ApiError::ChannelNotFound(name.to_string()))?;

        let creator = &inner.channels[position].created_by;
        if creator != requester && creator != SYSTEM_USER {
            return Err(ApiError::NotChannelOwner(name.to_string()));
        }
        if SYSTEM_CHANNELS.iter().any(|(system, _)| *system == name) {
            return Err(ApiError::SystemChannel(name.to_string()));
        }

        inner.channels.remove(position);
        inner.messages.remove(name);
        tracing::debug!("Channel #{} deleted by {}", name, requester);
        Ok(())
    }

    async fn get_messages(&self, channel: &str) -> Result<Vec<Message>, ApiError> {
        let held = {
            let inner = self.enter(Call::GetMessages)?;
            inner.held.get(channel).map(watch::Sender::subscribe)
        };
        if let Some(mut released) = held {
            // Sender dropped also counts as released
            let _ = released.wait_for(|released| *released).await;
        }

        let inner = self.lock();
        let stored = inner.messages.get(channel).map(Vec::as_slice).unwrap_or(&[]);
        let start = stored.len().saturating_sub(MESSAGE_LIMIT);
        Ok(stored[start..].to_vec())
    }

    async fn send_message(&self, user: &str, text: &str, channel: &str) -> Result<(), ApiError> {
        self.post(Call::SendMessage, user, text, channel, false)
    }

    async fn send_post(&self, user: &str, text: &str, channel: &str) -> Result<(), ApiError> {
        self.post(Call::SendPost, user, text, channel, true)
    }

    async fn add_reaction(
        &self,
        message_id: &MessageId,
        emoji: &str,
        user: &str,
        channel: &str,
    ) -> Result<(), ApiError> {
        let mut inner = self.enter(Call::AddReaction)?;
        let message = inner
            .messages
            .get_mut(channel)
            .and_then(|messages| messages.iter_mut().find(|m| &m.id == message_id))
            .ok_or_else(|| ApiError::MessageNotFound(message_id.clone()))?;

        toggle_reaction(&mut message.reactions, emoji, user);
        let updated = message.clone();
        inner.broadcast(updated);
        Ok(())
    }
}
