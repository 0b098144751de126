// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

mod args;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

pub use args::ConnectArgs;

/// Parse a string that must not be empty or whitespace-only.
fn non_empty_string(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        Err("cannot be empty".to_string())
    } else {
        Ok(s.to_string())
    }
}

/// Output format for streamed events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "poslink")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Resilient real-time channel client for the point-of-sale backend")]
#[command(
    long_about = "Resilient real-time channel client for the point-of-sale backend.\n\n\
    Opens an authenticated WebSocket session for one store, keeps it alive with \
    heartbeats and reconnects with backoff when it drops."
)]
pub struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/poslink/config.toml)
    #[arg(short = 'c', long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Log session internals (RUST_LOG overrides)
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect and print session events until interrupted
    #[command(after_help = "Examples:\n  \
        poslink listen --token $TOKEN --user u1 --scope store-42\n  \
        poslink listen -t ORDER_UPDATED,MENU_SYNC -o json")]
    Listen {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Only print business messages of these types (comma-separated)
        #[arg(long = "type", short = 't', value_delimiter = ',', value_name = "type")]
        types: Vec<String>,

        /// Output format
        #[arg(long, short = 'o', value_enum, default_value_t)]
        output: OutputFormat,
    },

    /// Send one business message and wait until it is written
    #[command(
        arg_required_else_help = true,
        after_help = "Examples:\n  \
        poslink send ORDER_UPDATED '{\"orderId\":7,\"status\":\"ready\"}'\n  \
        poslink send MENU_SYNC --id menu-sync-1"
    )]
    Send {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Message type, e.g. ORDER_UPDATED
        #[arg(value_parser = non_empty_string)]
        kind: String,

        /// JSON payload
        data: Option<String>,

        /// Message id, for idempotent resends
        #[arg(long)]
        id: Option<String>,

        /// Seconds to wait for a connection before giving up
        #[arg(long, default_value_t = 30, value_name = "secs")]
        timeout: u64,
    },

    /// Print the effective configuration as TOML
    Config {
        #[command(flatten)]
        connect: ConnectArgs,
    },
}

#[cfg(test)]
#[path = "../cli_tests.rs"]
mod tests;
