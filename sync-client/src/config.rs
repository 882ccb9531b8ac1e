//! Configuration loading for chatsync clients.
//!
//! Configuration is loaded from a TOML file. Every field is optional and
//! falls back to the defaults below.

use chatsync_core::ConnectionTimings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the chat server (default: ws://localhost:8080).
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Delay before each reconnect attempt in milliseconds (default: 3000).
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Keepalive ping interval in milliseconds (default: 25000).
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// Poll interval for channels, messages and users in milliseconds
    /// (default: 2000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Channel activated after login (default: general).
    #[serde(default = "default_channel")]
    pub default_channel: String,
}

// Default value functions
fn default_server_url() -> String {
    "ws://localhost:8080".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_keepalive_interval_ms() -> u64 {
    25_000
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_channel() -> String {
    "general".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            default_channel: default_channel(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Set the server URL.
    pub fn with_server_url(mut self, url: &str) -> Self {
        self.server_url = url.to_string();
        self
    }

    /// Set the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the keepalive interval.
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the channel activated after login.
    pub fn with_default_channel(mut self, channel: &str) -> Self {
        self.default_channel = channel.to_string();
        self
    }

    /// Timer settings for the connection state machine.
    pub fn timings(&self) -> ConnectionTimings {
        ConnectionTimings {
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            keepalive_interval: Duration::from_millis(self.keepalive_interval_ms),
        }
    }

    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Parse and check `server_url`.
    ///
    /// # Errors
    ///
    /// Returns an error unless the URL parses and uses `ws` or `wss`.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.server_url).map_err(|e| ConfigError::InvalidUrl {
            url: self.server_url.clone(),
            source: e,
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Socket address for `username`: `<base>/ws?username=<username>`.
pub fn connection_address(base: &Url, username: &str) -> Url {
    let mut url = base.clone();
    url.set_path("/ws");
    url.set_query(None);
    url.query_pairs_mut().append_pair("username", username);
    url
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// `server_url` is not a URL.
    #[error("invalid server url {url}: {source}")]
    InvalidUrl {
        /// The configured value.
        url: String,
        /// Underlying parse error.
        source: url::ParseError,
    },
    /// `server_url` is not a WebSocket URL.
    #[error("unsupported url scheme: {0} (expected ws or wss)")]
    UnsupportedScheme(String),
}
