// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for pl-core operations.

use thiserror::Error;

use crate::protocol::MessageType;

/// All possible errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum Error {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing payload for {0} message")]
    MissingPayload(MessageType),

    #[error("invalid payload for {kind} message: {source}")]
    InvalidPayload {
        kind: MessageType,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid identity: {0}\n  hint: both user id and scope id must be non-empty")]
    InvalidIdentity(String),
}

/// A specialized Result type for pl-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
