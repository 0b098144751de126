// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded outbound queue for messages sent while not connected.
//!
//! Messages are kept in memory in send order. When full, the oldest message
//! is evicted so the most recent state wins. On reconnect the queue is
//! flushed from the front.

use std::collections::VecDeque;

use pl_core::WebSocketMessage;

#[derive(Debug)]
pub struct MessageQueue {
    messages: VecDeque<WebSocketMessage>,
    capacity: usize,
}

impl MessageQueue {
    /// Creates a queue holding at most `capacity` messages (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        MessageQueue {
            messages: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a message, returning the evicted oldest one if the queue was full.
    pub fn enqueue(&mut self, msg: WebSocketMessage) -> Option<WebSocketMessage> {
        let evicted = if self.messages.len() >= self.capacity {
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(msg);
        evicted
    }

    pub fn front(&self) -> Option<&WebSocketMessage> {
        self.messages.front()
    }

    pub fn pop_front(&mut self) -> Option<WebSocketMessage> {
        self.messages.pop_front()
    }

    /// Puts a message back at the head, e.g. after a failed write.
    pub fn push_front(&mut self, msg: WebSocketMessage) {
        self.messages.push_front(msg);
        self.messages.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Queued messages in send order.
    pub fn peek_all(&self) -> Vec<WebSocketMessage> {
        self.messages.iter().cloned().collect()
    }

    /// Removes the first `count` messages.
    pub fn remove_first(&mut self, count: usize) {
        let count = count.min(self.messages.len());
        self.messages.drain(..count);
    }

    /// Fills in `scope` on messages queued before the identity was known.
    pub fn assign_scope(&mut self, scope: &str) {
        for msg in self.messages.iter_mut().filter(|m| m.scope.is_empty()) {
            msg.scope = scope.to_string();
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
