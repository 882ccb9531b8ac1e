//! # sync-types
//!
//! Wire format and domain types for the chatsync realtime client.
//!
//! This crate provides the foundational types used across all chatsync crates:
//! - [`MessageId`], [`ChannelId`] - Identity types
//! - [`User`], [`Channel`], [`Message`] - Domain models as the backend sends them
//! - [`Envelope`], [`ClientFrame`], [`ServerFrame`] - The `{type, payload}` socket protocol
//! - [`FrameError`] - Protocol error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod models;

pub use envelope::{kind, ClientFrame, Envelope, ServerFrame};
pub use error::FrameError;
pub use ids::{ChannelId, MessageId};
pub use models::{normalize_reactions, Channel, Message, Reactions, User, UserPresence, UserStatus};
