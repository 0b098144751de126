// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Relay state shared by every connection task.
//!
//! Holds the set of accepted tokens and the fanout channel that carries
//! business messages and operator actions to the connection tasks.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};

use pl_core::{AuthToken, WebSocketMessage};

/// Events fanned out to every connection task.
#[derive(Debug, Clone)]
pub enum Fanout {
    /// A business message from connection `from`, for the rest of `scope`.
    Deliver {
        scope: String,
        from: u64,
        msg: WebSocketMessage,
    },
    /// Warn authenticated clients that their token is about to expire.
    ExpireTokens { expires_in: u64 },
    /// Close every connection with `code`.
    Reset { code: u16, reason: String },
}

/// Shared relay state.
#[derive(Clone)]
pub struct RelayState {
    inner: Arc<RelayStateInner>,
}

struct RelayStateInner {
    /// Tokens accepted by `AUTHENTICATE` and `REAUTH`.
    tokens: RwLock<HashSet<String>>,
    /// Sends `TOKEN_EXPIRED` this long after each successful authentication.
    token_ttl: Option<Duration>,
    fanout_tx: broadcast::Sender<Fanout>,
    next_connection: AtomicU64,
    authenticated: AtomicUsize,
}

impl RelayState {
    pub fn new<I, S>(tokens: I, token_ttl: Option<Duration>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (fanout_tx, _) = broadcast::channel(1024);
        RelayState {
            inner: Arc::new(RelayStateInner {
                tokens: RwLock::new(tokens.into_iter().map(Into::into).collect()),
                token_ttl,
                fanout_tx,
                next_connection: AtomicU64::new(1),
                authenticated: AtomicUsize::new(0),
            }),
        }
    }

    pub async fn accepts(&self, token: &AuthToken) -> bool {
        token.is_usable() && self.inner.tokens.read().await.contains(token.expose())
    }

    pub async fn add_token(&self, token: impl Into<String>) {
        self.inner.tokens.write().await.insert(token.into());
    }

    /// Returns true if the token was accepted before.
    pub async fn revoke_token(&self, token: &str) -> bool {
        self.inner.tokens.write().await.remove(token)
    }

    pub fn token_ttl(&self) -> Option<Duration> {
        self.inner.token_ttl
    }

    pub fn next_connection_id(&self) -> u64 {
        self.inner.next_connection.fetch_add(1, Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Fanout> {
        self.inner.fanout_tx.subscribe()
    }

    /// Fans a business message out to the other connections of `scope`.
    pub fn deliver(&self, scope: &str, from: u64, msg: WebSocketMessage) {
        let _ = self.inner.fanout_tx.send(Fanout::Deliver {
            scope: scope.to_string(),
            from,
            msg,
        });
    }

    /// Sends `TOKEN_EXPIRED` to every authenticated connection.
    pub fn expire_tokens(&self, expires_in: u64) {
        let _ = self.inner.fanout_tx.send(Fanout::ExpireTokens { expires_in });
    }

    /// Closes every connection with `code`.
    pub fn reset_all(&self, code: u16, reason: impl Into<String>) {
        let _ = self.inner.fanout_tx.send(Fanout::Reset {
            code,
            reason: reason.into(),
        });
    }

    pub(crate) fn mark_authenticated(&self) {
        self.inner.authenticated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_gone(&self) {
        self.inner.authenticated.fetch_sub(1, Ordering::Relaxed);
    }

    /// Connections that completed the handshake and are still open.
    pub fn authenticated_count(&self) -> usize {
        self.inner.authenticated.load(Ordering::Relaxed)
    }
}
