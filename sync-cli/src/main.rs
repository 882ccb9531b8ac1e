//! # chatsync
//!
//! CLI tool for watching a chatsync server.
//!
//! ## Commands
//!
//! - `watch`: Open a live connection and print presence and pushed messages
//! - `demo`: Run a full session against the in-memory backend
//! - `config`: Show the effective configuration
//!
//! ## Example
//!
//! ```bash
//! # Follow #general as alice
//! chatsync --config chatsync.toml watch --user alice
//!
//! # Follow another channel with debug logging
//! RUST_LOG=debug chatsync watch --user alice --channel dev-team
//!
//! # Offline demo session
//! chatsync demo
//! ```

use anyhow::{Context, Result};
use chatsync_client::ClientConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{config, demo, watch};

/// CLI tool for watching a chatsync server.
#[derive(Parser, Debug)]
#[command(name = "chatsync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open a live connection and print what the server pushes
    Watch {
        /// Username to connect as
        #[arg(long, short)]
        user: String,

        /// Channel to subscribe to (default: from config)
        #[arg(long, short)]
        channel: Option<String>,
    },

    /// Run a scripted session against the in-memory backend
    Demo {
        /// Email of the demo account
        #[arg(long, default_value = "demo@example.com")]
        email: String,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let client_config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ClientConfig::default(),
    };
    tracing::debug!("Using server {}", client_config.server_url);

    match cli.command {
        Commands::Watch { user, channel } => {
            let channel = channel.unwrap_or_else(|| client_config.default_channel.clone());
            watch::run(&client_config, &user, &channel).await?;
        }
        Commands::Demo { email } => {
            demo::run(&client_config, &email).await?;
        }
        Commands::Config => {
            config::run(&client_config, cli.config.as_deref())?;
        }
    }

    Ok(())
}
