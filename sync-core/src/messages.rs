//! Message list reconciliation for the active channel.
//!
//! Two feeds write into one list:
//! - full-list polls (`getMessages`), started through a [`LoadTicket`]
//! - single-message pushes (`channel_message` frames)
//!
//! The exposed list never holds the same id twice and keeps the order in
//! which ids were first seen. Every load carries the [`Epoch`] current when it
//! started; switching channels bumps the epoch, so a late response for the
//! previous channel is discarded instead of merged.

use std::collections::{HashMap, HashSet};

use chatsync_types::{normalize_reactions, Message, MessageId};

/// Monotonic generation counter guarding asynchronous loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl Epoch {
    /// Numeric value.
    pub fn value(&self) -> u64 {
        self.0
    }

    pub(crate) fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Tag for one asynchronous message load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    /// Channel the load is for.
    pub channel: String,
    /// Epoch at the time the load started.
    pub epoch: Epoch,
}

/// Result of applying a load response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The response was merged.
    Applied {
        /// Ids seen for the first time.
        added: usize,
        /// Known ids whose content changed (reactions, in practice).
        updated: usize,
    },
    /// The response belongs to an earlier channel activation.
    Stale,
}

/// Result of applying a pushed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended to the list.
    Inserted,
    /// Id already present; ignored.
    Duplicate,
    /// Message belongs to a different channel; ignored.
    OtherChannel,
    /// No channel is active; ignored.
    NoActiveChannel,
}

/// Duplicate-free, first-seen-ordered message list of the active channel.
#[derive(Debug, Clone, Default)]
pub struct MessageReconciler {
    active: Option<String>,
    epoch: Epoch,
    messages: Vec<Message>,
    /// Position of every id in `messages`. Entries are only ever appended,
    /// so positions never shift.
    index: HashMap<MessageId, usize>,
}

impl MessageReconciler {
    /// Create a reconciler with no active channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the active channel.
    pub fn active_channel(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Current epoch.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Make `channel` the active channel.
    ///
    /// Discards the current list, bumps the epoch and returns the ticket for
    /// the fresh full load. Returns `None` if `channel` is already active.
    pub fn activate(&mut self, channel: &str) -> Option<LoadTicket> {
        if self.active.as_deref() == Some(channel) {
            return None;
        }
        self.active = Some(channel.to_string());
        self.epoch = self.epoch.next();
        self.messages.clear();
        self.index.clear();
        self.begin_load()
    }

    /// Ticket for a load of the active channel (poll or refresh).
    pub fn begin_load(&self) -> Option<LoadTicket> {
        self.active.as_ref().map(|channel| LoadTicket {
            channel: channel.clone(),
            epoch: self.epoch,
        })
    }

    /// Whether a ticket still belongs to the current activation.
    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.epoch == self.epoch && self.active.as_deref() == Some(ticket.channel.as_str())
    }

    /// Merge a full-list response.
    ///
    /// Repeated ids within the response keep their first occurrence. Known
    /// ids keep their position and take the server copy; new ids are
    /// appended in response order. Ids missing from the response stay.
    pub fn apply_load(&mut self, ticket: &LoadTicket, loaded: Vec<Message>) -> LoadOutcome {
        if !self.is_current(ticket) {
            return LoadOutcome::Stale;
        }

        let mut added = 0;
        let mut updated = 0;
        let mut seen_in_load = HashSet::with_capacity(loaded.len());

        for mut message in loaded {
            if !seen_in_load.insert(message.id.clone()) {
                continue;
            }
            normalize_reactions(&mut message.reactions);
            match self.index.get(&message.id) {
                Some(&position) => {
                    if self.messages[position] != message {
                        self.messages[position] = message;
                        updated += 1;
                    }
                }
                None => {
                    self.index.insert(message.id.clone(), self.messages.len());
                    self.messages.push(message);
                    added += 1;
                }
            }
        }

        LoadOutcome::Applied { added, updated }
    }

    /// Apply a pushed message for `channel`.
    ///
    /// Accepted only for the active channel, and only once per id.
    pub fn apply_push(&mut self, channel: &str, mut message: Message) -> PushOutcome {
        match self.active.as_deref() {
            None => PushOutcome::NoActiveChannel,
            Some(active) if active != channel => PushOutcome::OtherChannel,
            Some(_) if self.index.contains_key(&message.id) => PushOutcome::Duplicate,
            Some(_) => {
                normalize_reactions(&mut message.reactions);
                self.index.insert(message.id.clone(), self.messages.len());
                self.messages.push(message);
                PushOutcome::Inserted
            }
        }
    }

    /// The reconciled list.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Look up a message by id.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.index.get(id).map(|&position| &self.messages[position])
    }

    /// Mutable access for reaction toggles.
    pub fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        match self.index.get(id) {
            Some(&position) => self.messages.get_mut(position),
            None => None,
        }
    }

    /// Whether `id` is in the list.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
