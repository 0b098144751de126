// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use pl_core::MessageType;
use thiserror::Error;

use crate::config::ConfigError;

/// Failures observed by a session.
///
/// Errors are delivered to callers twice: as the `Err` of the operation that
/// hit them (where there is one) and as an `error` event on the bus. They are
/// `Clone` so the same value can travel both ways.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    #[error("transport closed abnormally (code {code}): {reason}")]
    Transport { code: u16, reason: String },

    #[error("authentication rejected: {0}\n  hint: check the token and the user/scope it was issued for")]
    Auth(String),

    #[error("no authentication acknowledgement within {0:?}")]
    AuthTimeout(Duration),

    #[error("heartbeat timed out after {0} missed pongs")]
    HeartbeatTimeout(u32),

    #[error("send failed: {0}")]
    SendFailure(String),

    #[error("outbound queue full ({capacity}); dropped oldest message {dropped_id}")]
    QueueOverflow { capacity: usize, dropped_id: String },

    #[error("gave up after {0} reconnect attempts\n  hint: call connect() to start a new schedule")]
    MaxReconnectAttemptsExceeded(u32),

    #[error("no usable auth token: {0}\n  hint: sign in again or pass --token")]
    MissingToken(String),

    #[error("no stored identity: {0}\n  hint: a user id and scope id are required before connecting")]
    MissingIdentity(String),

    #[error("invalid state transition: cannot go from {from} to {to}\n  hint: from '{from}' you can go to: {valid_targets}")]
    InvalidTransition {
        from: String,
        to: String,
        valid_targets: String,
    },

    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("'{0}' is reserved for the session protocol\n  hint: business messages need their own type")]
    ReservedType(MessageType),

    #[error("connection attempt cancelled")]
    Cancelled,

    #[error("session is closed")]
    Closed,
}

impl SessionError {
    /// True for failures the session recovers from on its own via backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::ConnectionTimeout(_)
                | SessionError::Transport { .. }
                | SessionError::AuthTimeout(_)
                | SessionError::HeartbeatTimeout(_)
                | SessionError::SendFailure(_)
        )
    }
}

/// Result type for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by the `poslink` commands.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("{field} is required\n  hint: pass --{field} or set POSLINK_{env}")]
    MissingArgument { field: &'static str, env: &'static str },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?} waiting for the message to be written")]
    SendTimeout(Duration),
}

/// Result type for command execution.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
