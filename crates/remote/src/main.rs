// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! pl-relay: development relay for the poslink real-time channel.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pl_relay::RelayState;

/// pl-relay: WebSocket relay speaking the poslink session protocol
#[derive(Parser, Debug)]
#[command(name = "pl-relay")]
#[command(about = "WebSocket relay speaking the poslink session protocol")]
struct Args {
    /// Address to bind the server to
    #[arg(short, long, default_value = "0.0.0.0:7890")]
    bind: SocketAddr,

    /// Token accepted by AUTHENTICATE and REAUTH (repeatable)
    #[arg(short, long = "token", env = "PL_RELAY_TOKENS", value_delimiter = ',', required = true)]
    tokens: Vec<String>,

    /// Send TOKEN_EXPIRED this many seconds after each authentication
    #[arg(long)]
    token_ttl: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting pl-relay");
    info!("  Bind address: {}", args.bind);
    info!("  Accepted tokens: {}", args.tokens.len());
    if let Some(ttl) = args.token_ttl {
        info!("  Token TTL: {}s", ttl);
    }

    let state = RelayState::new(args.tokens, args.token_ttl.map(Duration::from_secs));
    pl_relay::run(args.bind, state).await
}
