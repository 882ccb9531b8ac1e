//! CLI command implementations.

pub mod config;
pub mod demo;
pub mod watch;
