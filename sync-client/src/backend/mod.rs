//! Request/response call surface of the chat backend.
//!
//! The engine only depends on the [`Backend`] trait. [`MemoryBackend`]
//! implements it in memory for tests and demos.

mod memory;

pub use memory::{Call, MemoryBackend};

use async_trait::async_trait;
use chatsync_types::{Channel, Message, MessageId, User, UserStatus};
use thiserror::Error;

/// A rejected or failed backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Unknown email on login.
    #[error("user not found")]
    UserNotFound,

    /// Wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Registration for an email that is already taken.
    #[error("user already exists: {0}")]
    UserExists(String),

    /// Channel name already taken.
    #[error("channel already exists: {0}")]
    ChannelExists(String),

    /// No channel with that name.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// No message with that id in the channel.
    #[error("message not found: {0}")]
    MessageNotFound(MessageId),

    /// Built-in channels cannot be deleted.
    #[error("cannot delete system channel: {0}")]
    SystemChannel(String),

    /// Only the creator may delete a channel.
    #[error("only the creator can delete channel {0}")]
    NotChannelOwner(String),

    /// Input rejected by the backend.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Backend could not be reached or failed internally.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// The chat backend's call contract.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Log in with email and password.
    async fn login(&self, email: &str, password: &str) -> Result<User, ApiError>;

    /// Create an account. The username is the part of the email before `@`.
    async fn register(&self, email: &str, password: &str) -> Result<User, ApiError>;

    /// The full user directory.
    async fn get_all_users(&self) -> Result<Vec<User>, ApiError>;

    /// Set a user's status. `Ok(false)` if the user is unknown.
    async fn update_status(&self, username: &str, status: UserStatus) -> Result<bool, ApiError>;

    /// All channels.
    async fn get_all_channels(&self) -> Result<Vec<Channel>, ApiError>;

    /// Create a channel owned by `creator`.
    async fn create_channel(
        &self,
        name: &str,
        description: &str,
        creator: &str,
    ) -> Result<Channel, ApiError>;

    /// Delete a channel on behalf of `requester`.
    async fn delete_channel(&self, name: &str, requester: &str) -> Result<(), ApiError>;

    /// Recent messages of a channel, oldest first.
    async fn get_messages(&self, channel: &str) -> Result<Vec<Message>, ApiError>;

    /// Post a plain message.
    async fn send_message(&self, user: &str, text: &str, channel: &str) -> Result<(), ApiError>;

    /// Post a post-style message.
    async fn send_post(&self, user: &str, text: &str, channel: &str) -> Result<(), ApiError>;

    /// Toggle `user`'s `emoji` reaction on a message.
    async fn add_reaction(
        &self,
        message_id: &MessageId,
        emoji: &str,
        user: &str,
        channel: &str,
    ) -> Result<(), ApiError>;
}
