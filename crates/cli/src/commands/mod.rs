// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

pub mod config;
pub mod listen;
pub mod send;

use std::path::Path;
use std::sync::Arc;

use pl_core::Identity;
use tracing::debug;

use crate::cli::ConnectArgs;
use crate::config::{default_config_path, SessionConfig};
use crate::error::{Error, Result};
use crate::session::{Session, SessionBuilder, StaticIdentityStore, StaticTokenProvider};

/// Loads the config file (explicit, else the default path if present) and
/// applies command-line overrides.
pub fn load_config(path: Option<&Path>, args: &ConnectArgs) -> Result<SessionConfig> {
    let mut config = match path {
        Some(path) => SessionConfig::load(path)?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => {
                debug!(path = %path.display(), "using default config file");
                SessionConfig::load(&path)?
            }
            None => SessionConfig::default(),
        },
    };
    if let Some(url) = &args.url {
        config.server.url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Starts a session for the credentials given on the command line.
pub fn open_session(config: SessionConfig, args: &ConnectArgs) -> Result<Session> {
    let token = required(&args.token, "token", "TOKEN")?;
    let user = required(&args.user, "user", "USER")?;
    let scope = required(&args.scope, "scope", "SCOPE")?;
    let identity = Identity::new(user, scope).map_err(|e| Error::InvalidInput(e.to_string()))?;

    let session = SessionBuilder::new(
        config,
        Arc::new(StaticTokenProvider::new(token)),
        Arc::new(StaticIdentityStore::new(identity)),
    )
    .spawn()?;
    Ok(session)
}

fn required(value: &Option<String>, field: &'static str, env: &'static str) -> Result<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(Error::MissingArgument { field, env })
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
