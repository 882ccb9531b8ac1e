//! Show the effective configuration.

use anyhow::Result;
use chatsync_client::{connection_address, ClientConfig};
use std::path::Path;

/// Run the config command.
pub fn run(config: &ClientConfig, source: Option<&Path>) -> Result<()> {
    println!("=== chatsync config ===");
    println!();

    match source {
        Some(path) => println!("Source: {}", path.display()),
        None => println!("Source: built-in defaults"),
    }
    println!();

    println!("Server:");
    println!("  URL:       {}", config.server_url);
    let base = config.base_url()?;
    println!("  Socket:    {} (as alice)", connection_address(&base, "alice"));
    println!();

    println!("Timers:");
    println!("  Reconnect: {} ms", config.reconnect_delay_ms);
    println!("  Keepalive: {} ms", config.keepalive_interval_ms);
    println!("  Poll:      {} ms", config.poll_interval_ms);
    println!();

    println!("Default channel: #{}", config.default_channel);

    Ok(())
}
