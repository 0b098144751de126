// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! poslink - resilient real-time session for point-of-sale clients.
//!
//! Keeps a single authenticated WebSocket channel to the backend alive across
//! flaky mobile networks and exposes it as an event stream plus a `send` call
//! that queues while offline.
//!
//! # Main Components
//!
//! - [`Session`] / [`SessionBuilder`] - the public handle and its builder
//! - [`SessionConfig`] - timeouts, heartbeat, backoff and queue settings
//! - [`session`] - state machine, heartbeat, backoff, queue and event bus
//! - [`SessionError`] - everything a session reports
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use poslink::{EventKind, SessionBuilder, SessionConfig};
//!
//! let session = SessionBuilder::new(SessionConfig::default(), tokens, identity).spawn()?;
//! session.on(EventKind::message("ORDER_UPDATED"), |event| println!("{:?}", event));
//! session.connect().await?;
//! session.send(MessageDraft::new("ORDER_ACK").with_data(json!({"orderId": 7}))).await?;
//! ```

mod cli;
mod commands;

pub mod config;
pub mod error;
pub mod session;

pub use cli::{Cli, Command, ConnectArgs, OutputFormat};
pub use config::{ConfigError, SessionConfig};
pub use error::{Error, Result, SessionError, SessionResult};
pub use session::{
    ConnectionState, EventKind, MessageDraft, SendOutcome, Session, SessionBuilder, SessionEvent,
};

/// Execute a CLI command.
pub async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Listen {
            connect,
            types,
            output,
        } => {
            let config = commands::load_config(config_path, &connect)?;
            commands::listen::run(config, connect, types, output).await
        }
        Command::Send {
            connect,
            kind,
            data,
            id,
            timeout,
        } => {
            let config = commands::load_config(config_path, &connect)?;
            commands::send::run(config, connect, kind, data, id, timeout).await
        }
        Command::Config { connect } => commands::config::run(config_path, &connect),
    }
}
