// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Typed publish/subscribe registry for session events.
//!
//! Lifecycle events are a closed set. Business messages are keyed by their
//! wire `type`, so consumers can subscribe to types the session has never
//! heard of.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use pl_core::WebSocketMessage;
use tracing::error;

use super::state::ConnectionState;
use crate::error::SessionError;

/// Key under which listeners are registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    Error,
    ReconnectionStatus,
    MaxReconnectAttempts,
    StateChange,
    /// Business messages of one wire type.
    Message(String),
    /// Every business message.
    AnyMessage,
}

impl EventKind {
    /// Listener key for business messages of type `kind`.
    pub fn message(kind: impl Into<String>) -> Self {
        EventKind::Message(kind.into())
    }

    pub fn name(&self) -> &str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Error => "error",
            EventKind::ReconnectionStatus => "reconnection_status",
            EventKind::MaxReconnectAttempts => "max_reconnect_attempts",
            EventKind::StateChange => "state_change",
            EventKind::Message(kind) => kind,
            EventKind::AnyMessage => "*",
        }
    }

    /// True for names the session emits itself; inbound frames may not use them.
    pub fn is_reserved_name(name: &str) -> bool {
        matches!(
            name,
            "connect"
                | "disconnect"
                | "error"
                | "reconnection_status"
                | "max_reconnect_attempts"
                | "state_change"
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a session reports to its consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Authenticated and ready; queued messages have been flushed.
    Connect,
    /// The transport went away.
    Disconnect { code: u16, reason: String },
    Error(SessionError),
    /// A retry is scheduled.
    ReconnectionStatus { attempt: u32, delay: Duration },
    /// Automatic retries stopped.
    MaxReconnectAttempts { attempts: u32 },
    StateChange {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Business message from the server.
    Message(WebSocketMessage),
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Connect => EventKind::Connect,
            SessionEvent::Disconnect { .. } => EventKind::Disconnect,
            SessionEvent::Error(_) => EventKind::Error,
            SessionEvent::ReconnectionStatus { .. } => EventKind::ReconnectionStatus,
            SessionEvent::MaxReconnectAttempts { .. } => EventKind::MaxReconnectAttempts,
            SessionEvent::StateChange { .. } => EventKind::StateChange,
            SessionEvent::Message(msg) => EventKind::Message(msg.kind.to_string()),
        }
    }

    fn matches(&self, key: &EventKind) -> bool {
        match (self, key) {
            (SessionEvent::Message(_), EventKind::AnyMessage) => true,
            _ => self.kind() == *key,
        }
    }
}

/// Callback invoked for matching events.
pub type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync + 'static>;

/// Handle returned by [`EventBus::on`] and [`EventBus::once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry {
    id: ListenerId,
    key: EventKind,
    once: bool,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
}

/// Cloneable listener registry shared by the driver and every handle.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register<F>(&self, key: EventKind, once: bool, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry.entries.push(Entry {
            id,
            key,
            once,
            listener: Arc::new(listener),
        });
        id
    }

    /// Calls `listener` for every event matching `key`.
    pub fn on<F>(&self, key: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.register(key, false, listener)
    }

    /// Calls `listener` for the next matching event only.
    pub fn once<F>(&self, key: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.register(key, true, listener)
    }

    /// Removes a listener. Returns false if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut registry = self.lock();
        let before = registry.entries.len();
        registry.entries.retain(|entry| entry.id != id);
        registry.entries.len() != before
    }

    pub fn listener_count(&self, key: &EventKind) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|entry| entry.key == *key)
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Delivers `event` to every matching listener.
    ///
    /// `once` listeners are removed before they run, so they never fire twice
    /// even if they panic. A panicking listener is logged and skipped; the
    /// rest still run. Listeners may register or remove listeners.
    pub fn emit(&self, event: &SessionEvent) {
        let targets: Vec<Listener> = {
            let mut registry = self.lock();
            let targets = registry
                .entries
                .iter()
                .filter(|entry| event.matches(&entry.key))
                .map(|entry| Arc::clone(&entry.listener))
                .collect();
            registry
                .entries
                .retain(|entry| !(entry.once && event.matches(&entry.key)));
            targets
        };

        for listener in targets {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(event = %event.kind(), "event listener panicked");
            }
        }
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
