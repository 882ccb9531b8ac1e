//! Follow a channel over a live connection.

use anyhow::Result;
use chatsync_client::{ClientConfig, ConnectionEvent, ConnectionManager, WebSocketTransport};
use chatsync_core::{MessageReconciler, PresenceChange, PresenceDirectory, PushOutcome};
use chatsync_types::{ClientFrame, ServerFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long Ctrl-C waits for the connection to report it closed.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the watch command until Ctrl-C.
pub async fn run(config: &ClientConfig, user: &str, channel: &str) -> Result<()> {
    let base = config.base_url()?;
    println!("Connecting to {} as {}...", base, user);

    let (connection, mut events) =
        ConnectionManager::spawn(Arc::new(WebSocketTransport::new()), base, config.timings());
    connection.open(user);

    let mut presence = PresenceDirectory::new();
    let mut messages = MessageReconciler::new();
    // Push-only view: no loads are issued, so the ticket is unused.
    let _ = messages.activate(channel);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Closing connection...");
                connection.close();
                if !wait_closed(&mut events, CLOSE_TIMEOUT).await {
                    tracing::warn!("Connection did not confirm close within {:?}", CLOSE_TIMEOUT);
                }
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                handle_event(&connection, event, channel, &mut presence, &mut messages);
            }
        }
    }

    let counts = presence.counts();
    println!(
        "Saw {} messages in #{}; {} online, {} away, {} offline",
        messages.len(),
        channel,
        counts.online,
        counts.away,
        counts.offline
    );
    Ok(())
}

/// Drain events until the connection reports `Closed`.
///
/// Returns `false` on timeout. A stopped actor counts as closed.
async fn wait_closed(
    events: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
    limit: Duration,
) -> bool {
    let closed = async {
        while let Some(event) = events.recv().await {
            if let ConnectionEvent::Closed { reason } = event {
                println!("Connection closed: {}", reason);
                return;
            }
        }
    };
    tokio::time::timeout(limit, closed).await.is_ok()
}

fn handle_event(
    connection: &ConnectionManager,
    event: ConnectionEvent,
    channel: &str,
    presence: &mut PresenceDirectory,
    messages: &mut MessageReconciler,
) {
    match event {
        ConnectionEvent::StateChanged(state) => {
            if state.retry_count > 0 {
                println!("[{:?}] retry {}", state.status, state.retry_count);
            } else {
                println!("[{:?}]", state.status);
            }
        }
        ConnectionEvent::Opened { reconnect } => {
            if reconnect {
                println!("Reconnected, re-subscribing to #{}", channel);
            }
            connection.send(ClientFrame::SubscribeChannel {
                channel: channel.to_string(),
            });
        }
        ConnectionEvent::Closed { reason } => println!("Connection lost: {}", reason),
        ConnectionEvent::Frame(frame) => match frame {
            ServerFrame::StatusUpdate(update) => {
                if presence.apply_update(&update) != PresenceChange::Unchanged {
                    println!("  {} is now {}", update.username, update.status);
                }
            }
            ServerFrame::UsersList(list) => {
                presence.apply_snapshot(&list);
                let online: Vec<_> = presence
                    .sorted()
                    .into_iter()
                    .filter(|u| u.is_online())
                    .map(|u| u.username)
                    .collect();
                println!("  Online: {}", online.join(", "));
            }
            ServerFrame::ChannelMessage { channel, message } => {
                let line = format!("  #{} <{}> {}", channel, message.user, message.text);
                if messages.apply_push(&channel, message) == PushOutcome::Inserted {
                    println!("{}", line);
                }
            }
            ServerFrame::Subscribed { channel } => println!("Subscribed to #{}", channel),
            ServerFrame::Connected { message } => println!("Server: {}", message),
            ServerFrame::Pong | ServerFrame::Unknown { .. } => {}
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_client::MockTransport;

    fn spawn(transport: &MockTransport) -> (ConnectionManager, mpsc::UnboundedReceiver<ConnectionEvent>) {
        ConnectionManager::spawn(
            Arc::new(transport.clone()),
            ClientConfig::default().base_url().unwrap(),
            ClientConfig::default().timings(),
        )
    }

    async fn wait_open(events: &mut mpsc::UnboundedReceiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            if matches!(event, ConnectionEvent::Opened { .. }) {
                return;
            }
        }
        panic!("event stream ended before open");
    }

    // ===========================================
    // Shutdown Tests
    // ===========================================

    #[tokio::test]
    async fn close_is_confirmed_before_returning() {
        let transport = MockTransport::new();
        let (connection, mut events) = spawn(&transport);
        connection.open("alice");
        wait_open(&mut events).await;
        assert_eq!(transport.live_connections(), 1);

        connection.close();
        assert!(wait_closed(&mut events, CLOSE_TIMEOUT).await);
        assert_eq!(connection.snapshot().status, chatsync_core::ConnectionStatus::Closed);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.live_connections(), 0);
    }

    #[tokio::test]
    async fn close_wait_gives_up_without_confirmation() {
        let transport = MockTransport::new();
        let (connection, mut events) = spawn(&transport);
        connection.open("alice");
        wait_open(&mut events).await;

        // No close requested, so no confirmation arrives
        assert!(!wait_closed(&mut events, Duration::from_millis(50)).await);
        assert_eq!(transport.live_connections(), 1);
    }
}
