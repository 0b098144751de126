// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Application-level authentication handshake and reauthentication.

use std::time::Duration;

use pl_core::protocol::{AuthenticatePayload, ClientMetadata};
use pl_core::{AuthToken, Identity, WebSocketMessage};
use tracing::debug;

use super::timers::{TimerKind, Timers};
use crate::config::ClientConfig;

/// What the session should do after an `AUTH_ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// First rejection in this streak: refresh the token and reconnect.
    RefreshAndReconnect,
    /// Already refreshed once: give up and report.
    Surface,
}

#[derive(Debug)]
pub struct Authenticator {
    client: ClientMetadata,
    timeout: Duration,
    refresh_attempted: bool,
}

impl Authenticator {
    pub fn new(client: &ClientConfig, timeout: Duration) -> Self {
        Authenticator {
            client: ClientMetadata {
                name: client.name.clone(),
                version: client.version.clone(),
                platform: std::env::consts::OS.to_string(),
            },
            timeout,
            refresh_attempted: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Builds the `AUTHENTICATE` frame and arms the auth timeout.
    pub fn handshake(
        &self,
        token: &AuthToken,
        identity: &Identity,
        timers: &mut Timers,
    ) -> pl_core::Result<WebSocketMessage> {
        let payload = AuthenticatePayload {
            token: token.clone(),
            user_id: identity.user_id.clone(),
            scope_id: identity.scope_id.clone(),
            nonce: new_nonce(),
            client: self.client.clone(),
        };
        let msg = WebSocketMessage::authenticate(&payload)?;
        debug!(user = %identity.user_id, scope = %identity.scope_id, "sending handshake");
        timers.arm(TimerKind::AuthTimeout, self.timeout);
        Ok(msg)
    }

    pub fn on_authenticated(&mut self, timers: &mut Timers) {
        timers.cancel(TimerKind::AuthTimeout);
        self.refresh_attempted = false;
    }

    pub fn on_auth_error(&mut self, timers: &mut Timers) -> AuthFailure {
        timers.cancel(TimerKind::AuthTimeout);
        if self.refresh_attempted {
            AuthFailure::Surface
        } else {
            self.refresh_attempted = true;
            AuthFailure::RefreshAndReconnect
        }
    }

    /// Builds a `REAUTH` frame for an open connection.
    pub fn reauth(&self, token: AuthToken, scope: &str) -> pl_core::Result<WebSocketMessage> {
        WebSocketMessage::reauth(token, scope)
    }

    pub fn reset(&mut self) {
        self.refresh_attempted = false;
    }
}

/// 128-bit random nonce, hex encoded.
fn new_nonce() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
