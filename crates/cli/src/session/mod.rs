// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Resilient real-time session with the backend.
//!
//! Keeps one authenticated WebSocket channel alive across an unreliable
//! network: connect, authenticate, probe liveness, back off and reconnect,
//! refresh credentials in place, and buffer outbound messages while offline.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐ commands ┌──────────────────────────────────────┐
//! │   Session   │─────────►│          ConnectionManager           │
//! │  (handle)   │          │  state · timers · backoff · queue    │
//! └─────────────┘          │  heartbeat · authenticator           │
//!        ▲                 └──────┬───────────────▲───────────────┘
//!        │ events                 │ frames        │ notifications
//! ┌─────────────┐          ┌──────▼──────┐  ┌─────┴───────────────┐
//! │  EventBus   │          │  Transport  │  │ TokenProvider       │
//! │ (listeners) │          │   (trait)   │  │ NetworkObserver     │
//! └─────────────┘          └─────────────┘  └─────────────────────┘
//! ```
//!
//! # States
//!
//! ```text
//! Disconnected ──► Connecting ──► Authenticating ──► Connected
//!      ▲  │             │               │                │
//!      │  └─────────────┴──► Reconnecting ◄──────────────┘
//!      └───────────────────────────┘
//! ```
//!
//! Every state may also fall back to `Disconnected` on an explicit
//! disconnect, network loss or an exhausted retry schedule.

mod auth;
mod backoff;
mod collaborators;
mod events;
mod handle;
mod heartbeat;
mod manager;
mod queue;
mod state;
mod timers;
mod transport;

pub use auth::{AuthFailure, Authenticator};
pub use backoff::Backoff;
pub use collaborators::{
    BoxFuture, Connectivity, IdentityStore, ManualNetworkObserver, NetworkObserver,
    StaticIdentityStore, StaticTokenProvider, TokenError, TokenProvider,
};
pub use events::{EventBus, EventKind, Listener, ListenerId, SessionEvent};
pub use handle::{MessageDraft, SendOutcome, Session, SessionBuilder};
pub use heartbeat::{HeartbeatMonitor, PongCheck};
pub use queue::MessageQueue;
pub use state::{ConnectionState, SharedConnectionState, StateMachine};
pub use timers::{TimerKind, Timers};
pub use transport::{
    Connector, Transport, TransportError, TransportEvent, TransportResult, WebSocketConnector,
    WebSocketTransport,
};


#[cfg(test)]
mod manager_tests;
