// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared argument structs for CLI commands.

use clap::Args;

/// Where to connect and who to connect as.
#[derive(Args, Clone, Debug, Default)]
pub struct ConnectArgs {
    /// Server URL, overriding `[server] url` (scope id is appended)
    #[arg(long, short = 'u', env = "POSLINK_URL", value_name = "url")]
    pub url: Option<String>,

    /// Access token sent in the AUTHENTICATE handshake
    #[arg(long, env = "POSLINK_TOKEN", hide_env_values = true, value_name = "token")]
    pub token: Option<String>,

    /// Signed-in user id
    #[arg(long, env = "POSLINK_USER", value_name = "id")]
    pub user: Option<String>,

    /// Store (scope) id to join
    #[arg(long, short = 's', env = "POSLINK_SCOPE", value_name = "id")]
    pub scope: Option<String>,
}
