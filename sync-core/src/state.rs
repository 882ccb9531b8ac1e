//! Connection state machine for chatsync.
//!
//! This module provides a pure, side-effect-free state machine for managing
//! the socket lifecycle. The state machine takes events as input and produces
//! a new state plus a list of actions to execute.
//!
//! The actual I/O (connecting, sending frames, arming timers) is performed by
//! sync-client, not by this module. This enables instant unit testing without
//! network mocks.
//!
//! ```text
//! idle ──open──▶ connecting ──ok──▶ open ──lost──▶ closed (retrying)
//!                   │  ▲                               │
//!                   │  └──────────── timer ────────────┘
//!                   └──fail──▶ closed (retrying)
//! any ──close──▶ closed (terminal until open)
//! ```

use std::time::Duration;

/// Fixed delay before each reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Interval between keepalive pings while open.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// Timer settings the state machine hands out in its actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimings {
    /// Delay before a reconnect attempt. Fixed, not exponential.
    pub reconnect_delay: Duration,
    /// Keepalive ping interval.
    pub keepalive_interval: Duration,
}

impl Default for ConnectionTimings {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }
}

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never opened.
    Idle,
    /// Connection attempt in progress.
    Connecting {
        /// Reconnect attempts since the last successful open (0 = first try).
        retry_count: u32,
    },
    /// Socket is live.
    Open,
    /// Closed unexpectedly, waiting for the reconnect timer.
    Reconnecting {
        /// Reconnect attempts made so far.
        retry_count: u32,
    },
    /// Closed by the caller. Terminal until the next open request.
    Closed,
}

impl ConnectionState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: Event, timings: &ConnectionTimings) -> (Self, Vec<Action>) {
        match (self, event) {
            // Open requests
            (Self::Idle | Self::Closed, Event::OpenRequested) => (
                Self::Connecting { retry_count: 0 },
                vec![Action::Connect],
            ),
            (Self::Reconnecting { retry_count }, Event::OpenRequested) => (
                Self::Connecting {
                    retry_count: retry_count.saturating_add(1),
                },
                vec![Action::CancelReconnect, Action::Connect],
            ),

            // From Connecting
            (Self::Connecting { retry_count }, Event::ConnectSucceeded) => (
                Self::Open,
                vec![
                    Action::StartKeepalive {
                        interval: timings.keepalive_interval,
                    },
                    Action::Emit(SessionEvent::Opened {
                        reconnect: retry_count > 0,
                    }),
                ],
            ),
            (Self::Connecting { retry_count }, Event::ConnectFailed { error }) => (
                Self::Reconnecting { retry_count },
                vec![
                    Action::Emit(SessionEvent::ConnectFailed {
                        attempt: retry_count,
                        error,
                    }),
                    Action::StartReconnectTimer {
                        delay: timings.reconnect_delay,
                    },
                ],
            ),
            (Self::Connecting { .. }, Event::CloseRequested) => (
                Self::Closed,
                vec![Action::Disconnect, Action::Emit(SessionEvent::closed_by_client())],
            ),

            // From Open
            (Self::Open, Event::KeepaliveTick) => (Self::Open, vec![Action::SendPing]),
            (Self::Open, Event::ConnectionLost { reason }) => (
                Self::Reconnecting { retry_count: 0 },
                vec![
                    Action::StopKeepalive,
                    Action::Emit(SessionEvent::Closed {
                        reason,
                        will_retry: true,
                    }),
                    Action::StartReconnectTimer {
                        delay: timings.reconnect_delay,
                    },
                ],
            ),
            (Self::Open, Event::CloseRequested) => (
                Self::Closed,
                vec![
                    Action::StopKeepalive,
                    Action::Disconnect,
                    Action::Emit(SessionEvent::closed_by_client()),
                ],
            ),

            // From Reconnecting
            (Self::Reconnecting { retry_count }, Event::ReconnectTimer) => (
                Self::Connecting {
                    retry_count: retry_count.saturating_add(1),
                },
                vec![Action::Connect],
            ),
            (Self::Reconnecting { .. }, Event::CloseRequested) => (
                Self::Closed,
                vec![
                    Action::CancelReconnect,
                    Action::Emit(SessionEvent::closed_by_client()),
                ],
            ),

            // Open while connecting/open is a no-op; everything else is a
            // stale or invalid event - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// The coarse status exposed to the application.
    pub fn status(&self) -> ConnectionStatus {
        match self {
            Self::Idle => ConnectionStatus::Idle,
            Self::Connecting { .. } => ConnectionStatus::Connecting,
            Self::Open => ConnectionStatus::Open,
            Self::Reconnecting { .. } | Self::Closed => ConnectionStatus::Closed,
        }
    }

    /// Reconnect attempts since the last successful open.
    pub fn retry_count(&self) -> u32 {
        match self {
            Self::Connecting { retry_count } | Self::Reconnecting { retry_count } => *retry_count,
            Self::Idle | Self::Open | Self::Closed => 0,
        }
    }

    /// Status plus retry count, for the connectivity indicator.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            status: self.status(),
            retry_count: self.retry_count(),
        }
    }

    /// Check if the socket is live.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if an automatic reconnect is pending.
    pub fn is_reconnecting(&self) -> bool {
        matches!(self, Self::Reconnecting { .. })
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Coarse connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Never opened.
    #[default]
    Idle,
    /// Attempt in progress.
    Connecting,
    /// Live.
    Open,
    /// Not live; may be waiting to reconnect.
    Closed,
}

/// Connection status as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionSnapshot {
    /// Coarse status.
    pub status: ConnectionStatus,
    /// Reconnect attempts since the last successful open.
    pub retry_count: u32,
}

impl ConnectionSnapshot {
    /// Check if the socket is live.
    pub fn is_open(&self) -> bool {
        self.status == ConnectionStatus::Open
    }
}

/// Events that can occur in the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Caller asked to open.
    OpenRequested,
    /// Transport connection succeeded.
    ConnectSucceeded,
    /// Transport connection failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// A live connection errored or was closed by the peer.
    ConnectionLost {
        /// Reason for disconnection.
        reason: String,
    },
    /// Caller asked to close.
    CloseRequested,
    /// Reconnect timer fired.
    ReconnectTimer,
    /// Keepalive timer fired.
    KeepaliveTick,
}

/// Actions to be executed by the connection driver.
///
/// These are instructions, not side effects. The driver interprets these
/// and performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Initiate a transport connection.
    Connect,
    /// Close the transport connection.
    Disconnect,
    /// Start sending keepalive pings.
    StartKeepalive {
        /// Ping interval.
        interval: Duration,
    },
    /// Stop sending keepalive pings.
    StopKeepalive,
    /// Send one keepalive ping.
    SendPing,
    /// Start a timer for reconnection.
    StartReconnectTimer {
        /// Delay before attempting reconnection.
        delay: Duration,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Emit an event to the application.
    Emit(SessionEvent),
}

/// Events emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The socket is live.
    Opened {
        /// `false` on the first successful attempt after an open request.
        reconnect: bool,
    },
    /// The socket went away.
    Closed {
        /// Why.
        reason: String,
        /// Whether a reconnect is scheduled.
        will_retry: bool,
    },
    /// A connection attempt failed; another is scheduled.
    ConnectFailed {
        /// Reconnect attempt number (0 = the initial attempt).
        attempt: u32,
        /// Error message describing the failure.
        error: String,
    },
}

impl SessionEvent {
    fn closed_by_client() -> Self {
        Self::Closed {
            reason: "closed by client".into(),
            will_retry: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(state: ConnectionState, event: Event) -> (ConnectionState, Vec<Action>) {
        state.on_event(event, &ConnectionTimings::default())
    }

    fn opened() -> ConnectionState {
        let (state, _) = step(ConnectionState::new(), Event::OpenRequested);
        let (state, _) = step(state, Event::ConnectSucceeded);
        state
    }

    // ===========================================
    // Open / Connect Tests
    // ===========================================

    #[test]
    fn starts_idle() {
        let state = ConnectionState::new();
        assert_eq!(state, ConnectionState::Idle);
        assert_eq!(state.snapshot(), ConnectionSnapshot::default());
    }

    #[test]
    fn open_request_transitions_to_connecting() {
        let (new_state, actions) = step(ConnectionState::Idle, Event::OpenRequested);

        assert_eq!(new_state, ConnectionState::Connecting { retry_count: 0 });
        assert_eq!(actions, vec![Action::Connect]);
    }

    #[test]
    fn connect_success_opens_and_starts_keepalive() {
        let (new_state, actions) = step(
            ConnectionState::Connecting { retry_count: 0 },
            Event::ConnectSucceeded,
        );

        assert!(new_state.is_open());
        assert!(actions.contains(&Action::StartKeepalive {
            interval: DEFAULT_KEEPALIVE_INTERVAL
        }));
        assert!(actions.contains(&Action::Emit(SessionEvent::Opened { reconnect: false })));
    }

    #[test]
    fn open_while_connecting_or_open_is_noop() {
        let (state, actions) = step(
            ConnectionState::Connecting { retry_count: 2 },
            Event::OpenRequested,
        );
        assert_eq!(state, ConnectionState::Connecting { retry_count: 2 });
        assert!(actions.is_empty());

        let (state, actions) = step(ConnectionState::Open, Event::OpenRequested);
        assert!(state.is_open());
        assert!(actions.is_empty());
    }

    #[test]
    fn open_while_reconnecting_connects_now() {
        let (state, actions) = step(
            ConnectionState::Reconnecting { retry_count: 1 },
            Event::OpenRequested,
        );

        assert_eq!(state, ConnectionState::Connecting { retry_count: 2 });
        assert_eq!(actions, vec![Action::CancelReconnect, Action::Connect]);
    }

    #[test]
    fn open_after_close_starts_over() {
        let (state, actions) = step(ConnectionState::Closed, Event::OpenRequested);
        assert_eq!(state, ConnectionState::Connecting { retry_count: 0 });
        assert_eq!(actions, vec![Action::Connect]);
    }

    // ===========================================
    // Reconnect Tests
    // ===========================================

    #[test]
    fn unexpected_close_schedules_one_reconnect() {
        let (state, actions) = step(
            opened(),
            Event::ConnectionLost {
                reason: "reset by peer".into(),
            },
        );

        assert_eq!(state, ConnectionState::Reconnecting { retry_count: 0 });
        assert_eq!(state.status(), ConnectionStatus::Closed);
        assert!(state.is_reconnecting());
        assert!(!opened().is_reconnecting());
        let timers: Vec<_> = actions
            .iter()
            .filter(|a| matches!(a, Action::StartReconnectTimer { .. }))
            .collect();
        assert_eq!(
            timers,
            vec![&Action::StartReconnectTimer {
                delay: DEFAULT_RECONNECT_DELAY
            }]
        );
        assert!(actions.contains(&Action::StopKeepalive));
    }

    #[test]
    fn connect_failure_triggers_reconnect() {
        let (state, actions) = step(
            ConnectionState::Connecting { retry_count: 0 },
            Event::ConnectFailed {
                error: "refused".into(),
            },
        );

        assert_eq!(state, ConnectionState::Reconnecting { retry_count: 0 });
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::StartReconnectTimer { .. })));
    }

    #[test]
    fn reconnect_timer_increments_retry_count() {
        let (state, actions) = step(
            ConnectionState::Reconnecting { retry_count: 2 },
            Event::ReconnectTimer,
        );

        assert_eq!(state, ConnectionState::Connecting { retry_count: 3 });
        assert_eq!(state.retry_count(), 3);
        assert_eq!(actions, vec![Action::Connect]);
    }

    #[test]
    fn reconnect_delay_is_fixed() {
        let mut state = ConnectionState::Reconnecting { retry_count: 0 };
        for _ in 0..5 {
            let (next, _) = step(state, Event::ReconnectTimer);
            let (next, actions) = step(
                next,
                Event::ConnectFailed {
                    error: "down".into(),
                },
            );
            assert!(actions.contains(&Action::StartReconnectTimer {
                delay: DEFAULT_RECONNECT_DELAY
            }));
            state = next;
        }
        assert_eq!(state.retry_count(), 5);
    }

    #[test]
    fn successful_reconnect_reports_reconnect_and_resets_count() {
        let (state, _) = step(
            ConnectionState::Reconnecting { retry_count: 0 },
            Event::ReconnectTimer,
        );
        let (state, actions) = step(state, Event::ConnectSucceeded);

        assert!(state.is_open());
        assert_eq!(state.retry_count(), 0);
        assert!(actions.contains(&Action::Emit(SessionEvent::Opened { reconnect: true })));
    }

    #[test]
    fn custom_timings_flow_into_actions() {
        let timings = ConnectionTimings {
            reconnect_delay: Duration::from_millis(10),
            keepalive_interval: Duration::from_millis(20),
        };
        let (state, actions) =
            ConnectionState::Connecting { retry_count: 0 }.on_event(Event::ConnectSucceeded, &timings);
        assert!(actions.contains(&Action::StartKeepalive {
            interval: Duration::from_millis(20)
        }));

        let (_, actions) = state.on_event(
            Event::ConnectionLost {
                reason: "x".into(),
            },
            &timings,
        );
        assert!(actions.contains(&Action::StartReconnectTimer {
            delay: Duration::from_millis(10)
        }));
    }

    // ===========================================
    // Close Tests
    // ===========================================

    #[test]
    fn close_from_open_stops_keepalive_and_disconnects() {
        let (state, actions) = step(opened(), Event::CloseRequested);

        assert_eq!(state, ConnectionState::Closed);
        assert!(actions.contains(&Action::StopKeepalive));
        assert!(actions.contains(&Action::Disconnect));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::StartReconnectTimer { .. })));
    }

    #[test]
    fn close_from_reconnecting_cancels_timer() {
        let (state, actions) = step(
            ConnectionState::Reconnecting { retry_count: 4 },
            Event::CloseRequested,
        );

        assert_eq!(state, ConnectionState::Closed);
        assert!(actions.contains(&Action::CancelReconnect));
    }

    #[test]
    fn close_is_terminal() {
        let (state, _) = step(opened(), Event::CloseRequested);

        for event in [
            Event::ReconnectTimer,
            Event::KeepaliveTick,
            Event::ConnectSucceeded,
            Event::ConnectionLost {
                reason: "late".into(),
            },
        ] {
            let (next, actions) = step(state.clone(), event);
            assert_eq!(next, ConnectionState::Closed);
            assert!(actions.is_empty());
        }
    }

    // ===========================================
    // Keepalive Tests
    // ===========================================

    #[test]
    fn keepalive_tick_sends_ping_only_when_open() {
        let (_, actions) = step(opened(), Event::KeepaliveTick);
        assert_eq!(actions, vec![Action::SendPing]);

        let (_, actions) = step(
            ConnectionState::Reconnecting { retry_count: 0 },
            Event::KeepaliveTick,
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn snapshot_reports_status_and_retries() {
        assert_eq!(
            ConnectionState::Reconnecting { retry_count: 3 }.snapshot(),
            ConnectionSnapshot {
                status: ConnectionStatus::Closed,
                retry_count: 3
            }
        );
        assert!(ConnectionState::Open.snapshot().is_open());
    }
}
