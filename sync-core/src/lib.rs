//! # sync-core
//!
//! Pure logic for chatsync (no I/O, instant tests).
//!
//! This crate implements the connection state machine and the reconcilers
//! that merge poll and push feeds into one consistent local view, without
//! any network I/O, timers or async.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. Anything time-dependent takes an `Instant` or
//! `Duration` argument instead of reading a clock. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (sockets, backend calls, timers) is performed by
//! `sync-client`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel_order;
pub mod messages;
pub mod presence;
pub mod reactions;
pub mod state;
pub mod validation;

pub use channel_order::ChannelOrderStore;
pub use messages::{Epoch, LoadOutcome, LoadTicket, MessageReconciler, PushOutcome};
pub use presence::{PresenceChange, PresenceDirectory, StatusCounts};
pub use reactions::{toggle_reaction, PendingReaction, ReactionAggregator, ReactionChange};
pub use state::{
    Action, ConnectionSnapshot, ConnectionState, ConnectionStatus, ConnectionTimings, Event,
    SessionEvent, DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_RECONNECT_DELAY,
};
pub use validation::ValidationError;
