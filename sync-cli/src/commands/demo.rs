//! Scripted session against the in-memory backend.
//!
//! Exercises the whole client stack without a server: the backend pushes
//! over a mock socket, so messages arrive through both feeds.

use anyhow::{Context, Result};
use chatsync_client::backend::Backend;
use chatsync_client::{session, ChatSnapshot, ClientConfig, MemoryBackend, MockTransport, SyncEngine};
use chatsync_types::UserStatus;
use std::sync::Arc;
use std::time::Duration;

const DEMO_PASSWORD: &str = "demo-password";

/// Run the demo command.
pub async fn run(config: &ClientConfig, email: &str) -> Result<()> {
    let transport = MockTransport::new();
    let backend = MemoryBackend::new().with_push(transport.clone());
    backend.add_user("bob", UserStatus::Online);
    backend.add_user("carol", UserStatus::Away);

    session::register(&backend, email, DEMO_PASSWORD)
        .await
        .context("Registration failed")?;
    let user = session::login(&backend, email, DEMO_PASSWORD)
        .await
        .context("Login failed")?;
    println!("Logged in as {}", user.username);

    // The mock socket accepts any ws:// address.
    let engine = SyncEngine::start(
        Arc::new(backend.clone()),
        Arc::new(transport),
        config,
        user,
    )?;
    wait_for(&engine, |s| s.connection.is_open() && !s.channels.is_empty()).await?;

    engine.send_message("Hello from the demo").await?;
    backend
        .send_message("bob", "Hi! Welcome aboard", &config.default_channel)
        .await?;
    let snapshot = wait_for(&engine, |s| s.messages.len() >= 2).await?;

    if let Some(first) = snapshot.messages.first() {
        engine.toggle_reaction(&first.id, "👋").await?;
    }
    engine.set_status(UserStatus::Away).await?;

    let channel = engine.create_channel("demo-room", "Scratch space").await?;
    engine.send_post("First post in the new room").await?;
    wait_for(&engine, |s| s.messages.len() == 1).await?;
    engine.delete_channel(&channel.name).await?;

    let snapshot = wait_for(&engine, |s| {
        s.active_channel.as_deref() == Some(config.default_channel.as_str()) && s.messages.len() >= 2
    })
    .await?;
    print_snapshot(&snapshot);

    engine.shutdown().await?;
    Ok(())
}

async fn wait_for(
    engine: &SyncEngine,
    pred: impl Fn(&ChatSnapshot) -> bool,
) -> Result<ChatSnapshot> {
    let mut rx = engine.watch();
    let snapshot = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| pred(s)))
        .await
        .context("Timed out waiting for the session")?
        .context("Engine stopped")?;
    Ok(snapshot.clone())
}

fn print_snapshot(snapshot: &ChatSnapshot) {
    println!();
    println!("=== session ===");
    println!(
        "Me: {} ({}) - connection {:?}",
        snapshot.me.username, snapshot.me.status, snapshot.connection.status
    );
    println!();

    println!("Channels:");
    for channel in &snapshot.channels {
        let marker = if snapshot.active_channel.as_deref() == Some(channel.name.as_str()) {
            "*"
        } else {
            " "
        };
        println!("  {} #{} - {}", marker, channel.name, channel.description);
    }
    println!();

    println!("Users:");
    for user in &snapshot.users {
        println!("  {} [{}]", user.username, user.status);
    }
    println!();

    println!("Messages:");
    for message in &snapshot.messages {
        println!("  <{}> {}", message.user, message.text);
        for (emoji, users) in &message.reactions {
            println!("      {} {}", emoji, users.join(", "));
        }
    }
}
