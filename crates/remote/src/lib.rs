// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! pl-relay: development relay for the poslink real-time channel.
//!
//! Speaks the same protocol as the production backend: clients connect to
//! `/<prefix>/<scope>`, authenticate with `AUTHENTICATE`, keep the link alive
//! with `PING`/`PONG`, refresh credentials with `REAUTH`, and exchange
//! business messages with the other connections of their scope.

pub mod server;
pub mod state;


pub use server::{run, serve};
pub use state::{Fanout, RelayState};
