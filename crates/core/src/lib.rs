// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! pl-core: Shared protocol library for the poslink real-time channel
//!
//! This crate provides the wire envelope, message types, close codes and
//! identity primitives used by both the `poslink` session client and the
//! `pl-relay` development server.

pub mod error;
pub mod identity;
pub mod protocol;

pub use error::{Error, Result};
pub use identity::{AuthToken, Identity};
pub use protocol::{close_code, MessageType, WebSocketMessage};
