// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Session identity and credentials.
//!
//! An [`Identity`] names the signed-in user and the scope (restaurant or
//! register session) the channel is bound to. An [`AuthToken`] is the bearer
//! credential presented in the authentication handshake.

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Locally stored user and scope the session authenticates as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Signed-in user.
    pub user_id: String,
    /// Logical channel the connection is bound to.
    pub scope_id: String,
}

impl Identity {
    /// Creates an identity, rejecting blank ids.
    pub fn new(user_id: impl Into<String>, scope_id: impl Into<String>) -> Result<Self> {
        let identity = Identity {
            user_id: user_id.into(),
            scope_id: scope_id.into(),
        };
        identity.validate()?;
        Ok(identity)
    }

    /// Checks that both ids are present.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::InvalidIdentity("user id is empty".to_string()));
        }
        if self.scope_id.trim().is_empty() {
            return Err(Error::InvalidIdentity("scope id is empty".to_string()));
        }
        Ok(())
    }
}

/// Bearer token presented to the backend.
///
/// `Debug` and `Display` never print the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        AuthToken(token.into())
    }

    /// Returns the raw token for placing into a handshake payload.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// A blank token is not usable for authentication.
    pub fn is_usable(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl From<String> for AuthToken {
    fn from(token: String) -> Self {
        AuthToken(token)
    }
}

impl From<&str> for AuthToken {
    fn from(token: &str) -> Self {
        AuthToken(token.to_string())
    }
}
