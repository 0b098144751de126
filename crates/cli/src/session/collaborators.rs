// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Services the session consumes but does not own.
//!
//! Apps plug in their own token storage, identity store and reachability
//! source. The `Static*` and `Manual*` implementations cover the CLI and tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use pl_core::{AuthToken, Identity};
use tokio::sync::broadcast;

/// Boxed future used by collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error type for token operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// No token is stored.
    #[error("no token available")]
    Unavailable,

    /// The refresh round-trip failed.
    #[error("refresh failed: {0}")]
    RefreshFailed(String),
}

/// Source of auth tokens.
pub trait TokenProvider: Send + Sync + 'static {
    /// Current token, refreshed first if it is about to expire.
    fn token_with_refresh(&self) -> BoxFuture<'_, Result<AuthToken, TokenError>>;

    /// Obtains a new token unconditionally.
    fn force_refresh(&self) -> BoxFuture<'_, Result<AuthToken, TokenError>>;

    /// Notifications of tokens refreshed outside the session, if supported.
    fn subscribe_refreshed(&self) -> Option<broadcast::Receiver<AuthToken>> {
        None
    }
}

/// Local store of the signed-in user and active scope.
pub trait IdentityStore: Send + Sync + 'static {
    fn load(&self) -> BoxFuture<'_, Option<Identity>>;
}

/// Network reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

/// Reports reachability changes. Dropping the receiver unsubscribes.
pub trait NetworkObserver: Send + Sync + 'static {
    fn subscribe(&self) -> broadcast::Receiver<Connectivity>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Token provider backed by an in-memory token.
///
/// `force_refresh` hands out the next token queued with
/// [`StaticTokenProvider::queue_refresh`], or re-issues the current one.
#[derive(Debug)]
pub struct StaticTokenProvider {
    current: Mutex<Option<AuthToken>>,
    next: Mutex<Vec<AuthToken>>,
    fail_refresh: AtomicBool,
    refreshes: AtomicU32,
    refreshed_tx: broadcast::Sender<AuthToken>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<AuthToken>) -> Self {
        Self::with_token(Some(token.into()))
    }

    /// A provider with no token; every connect fails until one is set.
    pub fn empty() -> Self {
        Self::with_token(None)
    }

    fn with_token(token: Option<AuthToken>) -> Self {
        let (refreshed_tx, _) = broadcast::channel(16);
        StaticTokenProvider {
            current: Mutex::new(token),
            next: Mutex::new(Vec::new()),
            fail_refresh: AtomicBool::new(false),
            refreshes: AtomicU32::new(0),
            refreshed_tx,
        }
    }

    pub fn set_token(&self, token: impl Into<AuthToken>) {
        *lock(&self.current) = Some(token.into());
    }

    pub fn clear_token(&self) {
        *lock(&self.current) = None;
    }

    pub fn current(&self) -> Option<AuthToken> {
        lock(&self.current).clone()
    }

    /// Token returned by the next `force_refresh`.
    pub fn queue_refresh(&self, token: impl Into<AuthToken>) {
        lock(&self.next).insert(0, token.into());
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::Release);
    }

    /// Number of `force_refresh` calls so far.
    pub fn refresh_count(&self) -> u32 {
        self.refreshes.load(Ordering::Acquire)
    }

    /// Replaces the token and notifies subscribers, like a background refresh.
    pub fn publish_refresh(&self, token: impl Into<AuthToken>) {
        let token = token.into();
        self.set_token(token.clone());
        let _ = self.refreshed_tx.send(token);
    }

    pub fn subscriber_count(&self) -> usize {
        self.refreshed_tx.receiver_count()
    }

    fn usable_current(&self) -> Result<AuthToken, TokenError> {
        match self.current() {
            Some(token) if token.is_usable() => Ok(token),
            _ => Err(TokenError::Unavailable),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn token_with_refresh(&self) -> BoxFuture<'_, Result<AuthToken, TokenError>> {
        Box::pin(async move { self.usable_current() })
    }

    fn force_refresh(&self) -> BoxFuture<'_, Result<AuthToken, TokenError>> {
        Box::pin(async move {
            self.refreshes.fetch_add(1, Ordering::AcqRel);
            if self.fail_refresh.load(Ordering::Acquire) {
                return Err(TokenError::RefreshFailed("refresh rejected".to_string()));
            }
            if let Some(token) = lock(&self.next).pop() {
                self.set_token(token);
            }
            self.usable_current()
        })
    }

    fn subscribe_refreshed(&self) -> Option<broadcast::Receiver<AuthToken>> {
        Some(self.refreshed_tx.subscribe())
    }
}

/// Identity store backed by an in-memory value.
#[derive(Debug, Default)]
pub struct StaticIdentityStore {
    identity: Mutex<Option<Identity>>,
}

impl StaticIdentityStore {
    pub fn new(identity: Identity) -> Self {
        StaticIdentityStore {
            identity: Mutex::new(Some(identity)),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&self, identity: Identity) {
        *lock(&self.identity) = Some(identity);
    }

    pub fn clear(&self) {
        *lock(&self.identity) = None;
    }
}

impl IdentityStore for StaticIdentityStore {
    fn load(&self) -> BoxFuture<'_, Option<Identity>> {
        Box::pin(async move { lock(&self.identity).clone() })
    }
}

/// Network observer driven by explicit calls.
#[derive(Debug)]
pub struct ManualNetworkObserver {
    tx: broadcast::Sender<Connectivity>,
}

impl ManualNetworkObserver {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        ManualNetworkObserver { tx }
    }

    pub fn publish(&self, status: Connectivity) {
        let _ = self.tx.send(status);
    }

    pub fn set_online(&self) {
        self.publish(Connectivity::Online);
    }

    pub fn set_offline(&self) {
        self.publish(Connectivity::Offline);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ManualNetworkObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkObserver for ManualNetworkObserver {
    fn subscribe(&self) -> broadcast::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[path = "collaborators_tests.rs"]
mod tests;
