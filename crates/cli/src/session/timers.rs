// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Deadline table for the session driver.
//!
//! One slot per [`TimerKind`]: arming a kind replaces its previous deadline, so
//! at most one instance of each timer can be outstanding.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// Every timer the session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Transport must open before this fires.
    ConnectTimeout,
    /// `AUTHENTICATED` must arrive before this fires.
    AuthTimeout,
    /// Next heartbeat ping.
    HeartbeatInterval,
    /// Pong for the last ping must arrive before this fires.
    PongTimeout,
    /// Next reconnect attempt.
    Reconnect,
}

impl TimerKind {
    const COUNT: usize = 5;

    pub const ALL: [TimerKind; Self::COUNT] = [
        TimerKind::ConnectTimeout,
        TimerKind::AuthTimeout,
        TimerKind::HeartbeatInterval,
        TimerKind::PongTimeout,
        TimerKind::Reconnect,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
pub struct Timers {
    slots: [Option<Instant>; TimerKind::COUNT],
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `kind` to fire after `delay`, replacing any pending deadline.
    pub fn arm(&mut self, kind: TimerKind, delay: Duration) {
        self.slots[kind.index()] = Some(Instant::now() + delay);
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.slots[kind.index()] = None;
    }

    pub fn cancel_all(&mut self) {
        self.slots = [None; TimerKind::COUNT];
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind.index()].is_some()
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.slots[kind.index()]
    }

    pub fn armed_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn earliest(&self) -> Option<(TimerKind, Instant)> {
        TimerKind::ALL
            .iter()
            .filter_map(|&kind| self.deadline(kind).map(|at| (kind, at)))
            .min_by_key(|&(_, at)| at)
    }

    /// Waits for the earliest armed deadline, disarms it and returns its kind.
    ///
    /// Pends forever while nothing is armed. Dropping the future before it
    /// completes leaves the table untouched.
    pub async fn expired(&mut self) -> TimerKind {
        match self.earliest() {
            Some((kind, at)) => {
                sleep_until(at).await;
                self.cancel(kind);
                kind
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
#[path = "timers_tests.rs"]
mod tests;
