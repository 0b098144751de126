// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection state machine.
//!
//! The driver task is the only writer; handles read the mirrored value from
//! [`SharedConnectionState`] without locking.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};

use tracing::debug;

use crate::error::{SessionError, SessionResult};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    const ALL: [ConnectionState; 5] = [
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Authenticating,
        ConnectionState::Connected,
        ConnectionState::Reconnecting,
    ];

    /// States reachable from this one in a single transition.
    pub fn allowed_targets(self) -> &'static [ConnectionState] {
        use ConnectionState::*;
        match self {
            Disconnected => &[Connecting, Reconnecting],
            Connecting => &[Authenticating, Disconnected, Reconnecting],
            Authenticating => &[Connected, Disconnected, Reconnecting],
            Connected => &[Disconnected, Reconnecting],
            Reconnecting => &[Connecting, Disconnected],
        }
    }

    pub fn can_transition_to(self, target: ConnectionState) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }

    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .unwrap_or(ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session status visible to both the driver task and every handle.
///
/// Uses atomic fields for lock-free reads.
#[derive(Debug)]
pub struct SharedConnectionState {
    state: AtomicU8,
    /// Reconnect attempts made since the last authenticated connection.
    attempt: AtomicU32,
    /// Messages waiting in the outbound queue.
    queued: AtomicUsize,
}

impl SharedConnectionState {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected.to_u8()),
            attempt: AtomicU32::new(0),
            queued: AtomicUsize::new(0),
        }
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, state: ConnectionState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::Acquire)
    }

    pub fn set_attempt(&self, attempt: u32) {
        self.attempt.store(attempt, Ordering::Release);
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn set_queued(&self, len: usize) {
        self.queued.store(len, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }

    /// Human-readable status line, e.g. `reconnecting (attempt 3)`.
    pub fn status_string(&self) -> String {
        let state = self.get();
        let attempt = self.attempt();
        match state {
            ConnectionState::Reconnecting | ConnectionState::Connecting if attempt > 0 => {
                format!("{} (attempt {})", state, attempt)
            }
            _ => state.to_string(),
        }
    }
}

impl Default for SharedConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of the current state; every change goes through [`StateMachine::transition`].
#[derive(Debug)]
pub struct StateMachine {
    current: ConnectionState,
    shared: std::sync::Arc<SharedConnectionState>,
}

impl StateMachine {
    pub fn new(shared: std::sync::Arc<SharedConnectionState>) -> Self {
        StateMachine {
            current: shared.get(),
            shared,
        }
    }

    pub fn current(&self) -> ConnectionState {
        self.current
    }

    pub fn is(&self, state: ConnectionState) -> bool {
        self.current == state
    }

    /// Moves to `target`, returning the previous state.
    ///
    /// Transitions missing from the adjacency table are rejected and leave
    /// the state unchanged.
    pub fn transition(&mut self, target: ConnectionState) -> SessionResult<ConnectionState> {
        let from = self.current;
        if !from.can_transition_to(target) {
            return Err(SessionError::InvalidTransition {
                from: from.to_string(),
                to: target.to_string(),
                valid_targets: from
                    .allowed_targets()
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        debug!(%from, to = %target, "state transition");
        self.current = target;
        self.shared.set(target);
        Ok(from)
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
