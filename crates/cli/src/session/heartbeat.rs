// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Ping/pong liveness monitoring.
//!
//! The monitor never sleeps itself: it arms [`TimerKind::HeartbeatInterval`]
//! and [`TimerKind::PongTimeout`] in the driver's timer table and reacts when
//! the driver reports them expired.

use pl_core::WebSocketMessage;

use super::timers::{TimerKind, Timers};
use crate::config::HeartbeatConfig;

/// Outcome of a pong timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PongCheck {
    /// Monitor was stopped; the expiry belongs to an old connection.
    Stale,
    /// A pong was missed but the limit is not reached yet.
    Missed { missed: u32 },
    /// `max_missed_pongs` consecutive misses: the connection is dead.
    TimedOut { missed: u32 },
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    missed: u32,
    running: bool,
    last_ping_id: Option<String>,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        HeartbeatMonitor {
            config,
            missed: 0,
            running: false,
            last_ping_id: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn missed_pongs(&self) -> u32 {
        self.missed
    }

    /// Starts probing; the first ping goes out one interval from now.
    pub fn start(&mut self, timers: &mut Timers) {
        self.running = true;
        self.missed = 0;
        self.last_ping_id = None;
        timers.arm(TimerKind::HeartbeatInterval, self.config.interval());
    }

    /// Stops probing and clears both heartbeat timers.
    pub fn stop(&mut self, timers: &mut Timers) {
        self.running = false;
        self.missed = 0;
        self.last_ping_id = None;
        timers.cancel(TimerKind::HeartbeatInterval);
        timers.cancel(TimerKind::PongTimeout);
    }

    /// Interval elapsed: returns the ping to send and re-arms both timers.
    pub fn on_tick(&mut self, timers: &mut Timers, scope: &str) -> Option<WebSocketMessage> {
        if !self.running {
            return None;
        }
        let ping = WebSocketMessage::ping(scope);
        self.last_ping_id = Some(ping.id.clone());
        timers.arm(TimerKind::PongTimeout, self.config.pong_timeout());
        timers.arm(TimerKind::HeartbeatInterval, self.config.interval());
        Some(ping)
    }

    /// A pong arrived. Returns false if the monitor is not running.
    pub fn on_pong(&mut self, timers: &mut Timers) -> bool {
        if !self.running {
            return false;
        }
        self.missed = 0;
        self.last_ping_id = None;
        timers.cancel(TimerKind::PongTimeout);
        true
    }

    pub fn on_pong_timeout(&mut self) -> PongCheck {
        if !self.running {
            return PongCheck::Stale;
        }
        self.missed += 1;
        if self.missed >= self.config.max_missed_pongs {
            PongCheck::TimedOut {
                missed: self.missed,
            }
        } else {
            PongCheck::Missed {
                missed: self.missed,
            }
        }
    }

    pub fn last_ping_id(&self) -> Option<&str> {
        self.last_ping_id.as_deref()
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
