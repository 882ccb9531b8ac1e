//! Optimistic reaction toggles.
//!
//! A toggle is applied to the local message copy immediately and recorded
//! as pending. The next poll that carries the message replaces its
//! reactions with the server copy (see [`MessageReconciler::apply_load`])
//! and clears the pending entry; speculative state is never merged into
//! server state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chatsync_types::{MessageId, Reactions};

use crate::messages::MessageReconciler;
use crate::validation::ValidationError;

/// What a toggle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionChange {
    /// The user was added to the emoji's list.
    Added,
    /// The user was removed from the emoji's list.
    Removed,
}

/// Toggle `user` under `emoji`.
///
/// Removes the user if present (dropping the emoji once its list is empty),
/// otherwise appends it.
pub fn toggle_reaction(reactions: &mut Reactions, emoji: &str, user: &str) -> ReactionChange {
    if let Some(users) = reactions.get_mut(emoji) {
        if let Some(position) = users.iter().position(|u| u == user) {
            users.remove(position);
            if users.is_empty() {
                reactions.remove(emoji);
            }
            return ReactionChange::Removed;
        }
        users.push(user.to_string());
        return ReactionChange::Added;
    }

    reactions.insert(emoji.to_string(), vec![user.to_string()]);
    ReactionChange::Added
}

/// Unconfirmed local toggles on one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReaction {
    /// When the first unconfirmed toggle was applied.
    pub since: Instant,
    /// Number of toggles since the last confirmation.
    pub toggles: u32,
}

/// Tracks which messages carry speculative reaction state.
#[derive(Debug, Clone, Default)]
pub struct ReactionAggregator {
    pending: HashMap<MessageId, PendingReaction>,
}

impl ReactionAggregator {
    /// Create an aggregator with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a toggle optimistically to the message in `messages`.
    ///
    /// Fails without touching anything if the emoji is empty or the message
    /// is not in the active list.
    pub fn toggle(
        &mut self,
        messages: &mut MessageReconciler,
        id: &MessageId,
        emoji: &str,
        user: &str,
        now: Instant,
    ) -> Result<ReactionChange, ValidationError> {
        if emoji.trim().is_empty() {
            return Err(ValidationError::EmptyEmoji);
        }
        let message = messages
            .get_mut(id)
            .ok_or_else(|| ValidationError::UnknownMessage(id.clone()))?;

        let change = toggle_reaction(&mut message.reactions, emoji, user);

        let entry = self.pending.entry(id.clone()).or_insert(PendingReaction {
            since: now,
            toggles: 0,
        });
        entry.toggles += 1;

        Ok(change)
    }

    /// Drop the pending entries of messages the server just confirmed.
    pub fn confirm<'a>(&mut self, ids: impl IntoIterator<Item = &'a MessageId>) {
        for id in ids {
            self.pending.remove(id);
        }
    }

    /// Forget everything pending (on channel switch).
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Pending state for one message.
    pub fn pending(&self, id: &MessageId) -> Option<&PendingReaction> {
        self.pending.get(id)
    }

    /// Number of messages with unconfirmed toggles.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// When the oldest unconfirmed toggle was applied.
    pub fn oldest_pending(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.since).min()
    }

    /// Age of the oldest unconfirmed toggle.
    pub fn staleness(&self, now: Instant) -> Option<Duration> {
        self.oldest_pending()
            .map(|oldest| now.saturating_duration_since(oldest))
    }
}
