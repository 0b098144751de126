// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket protocol messages for client-server communication.
//!
//! Every frame in either direction is the same JSON envelope:
//!
//! ```text
//! {"id":"…","type":"PING","data":{…},"scope":"store-42","timestamp":"2026-…Z"}
//! ```
//!
//! A fixed set of `type` values drives the session itself (handshake,
//! heartbeat, token expiry). Every other `type` is a business event that the
//! session forwards untouched.

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identity::AuthToken;

/// WebSocket close codes used by the session and the relay.
pub mod close_code {
    /// Intentional local or server shutdown. Never triggers a reconnect.
    pub const NORMAL: u16 = 1000;
    /// Endpoint going away (network loss, server restart).
    pub const GOING_AWAY: u16 = 1001;
    /// Close frame without a status code.
    pub const NO_STATUS: u16 = 1005;
    /// Stream ended without a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// Transport did not open within the connect timeout.
    pub const CONNECT_TIMEOUT: u16 = 4000;
    /// Server reset the session (deploys, scope moves).
    pub const SERVER_RESET: u16 = 4001;
    /// No `AUTHENTICATED` within the auth timeout.
    pub const AUTH_TIMEOUT: u16 = 4002;
    /// Credentials rejected.
    pub const AUTH_FAILED: u16 = 4003;
    /// Too many consecutive missed pongs.
    pub const HEARTBEAT_TIMEOUT: u16 = 4004;
    /// Outbound write failed.
    pub const SEND_FAILED: u16 = 4005;

    /// Returns true for the one code that means "do not reconnect".
    pub fn is_intentional(code: u16) -> bool {
        code == NORMAL
    }
}

/// The `type` field of an envelope.
///
/// Unknown values round-trip through [`MessageType::Business`] verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Authenticate,
    Authenticated,
    AuthError,
    Reauth,
    TokenExpired,
    Ping,
    Pong,
    Connect,
    Disconnect,
    Error,
    /// Any application-level event (order updates, menu sync, ...).
    Business(String),
}

impl MessageType {
    /// Builds a type from its wire name, mapping protocol names to their variants.
    pub fn parse(name: &str) -> Self {
        match name {
            "AUTHENTICATE" => MessageType::Authenticate,
            "AUTHENTICATED" => MessageType::Authenticated,
            "AUTH_ERROR" => MessageType::AuthError,
            "REAUTH" => MessageType::Reauth,
            "TOKEN_EXPIRED" => MessageType::TokenExpired,
            "PING" => MessageType::Ping,
            "PONG" => MessageType::Pong,
            "CONNECT" => MessageType::Connect,
            "DISCONNECT" => MessageType::Disconnect,
            "ERROR" => MessageType::Error,
            other => MessageType::Business(other.to_string()),
        }
    }

    /// Wire name of this type.
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Authenticate => "AUTHENTICATE",
            MessageType::Authenticated => "AUTHENTICATED",
            MessageType::AuthError => "AUTH_ERROR",
            MessageType::Reauth => "REAUTH",
            MessageType::TokenExpired => "TOKEN_EXPIRED",
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
            MessageType::Connect => "CONNECT",
            MessageType::Disconnect => "DISCONNECT",
            MessageType::Error => "ERROR",
            MessageType::Business(name) => name,
        }
    }

    /// True for every type the session consumes itself.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, MessageType::Business(_))
    }
}

impl From<String> for MessageType {
    fn from(name: String) -> Self {
        MessageType::parse(&name)
    }
}

impl From<&str> for MessageType {
    fn from(name: &str) -> Self {
        MessageType::parse(name)
    }
}

impl From<MessageType> for String {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Business(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single frame on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketMessage {
    /// Unique per message; a resent message keeps its id.
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Logical channel multiplexed on the connection.
    #[serde(default)]
    pub scope: String,
    /// ISO-8601 creation time.
    #[serde(default)]
    pub timestamp: String,
}

/// Client details sent along with the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetadata {
    pub name: String,
    pub version: String,
    pub platform: String,
}

/// Payload of `AUTHENTICATE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatePayload {
    pub token: AuthToken,
    pub user_id: String,
    pub scope_id: String,
    pub nonce: String,
    pub client: ClientMetadata,
}

/// Payload of `REAUTH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReauthPayload {
    pub token: AuthToken,
}

/// Payload of `TOKEN_EXPIRED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenExpiredPayload {
    /// Seconds until the current token stops being accepted.
    pub expires_in: u64,
}

/// Payload of `AUTH_ERROR` and `ERROR`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Payload of `PONG`, echoing the ping it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongPayload {
    pub ping_id: String,
}

/// Current time as an ISO-8601 string with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A fresh message id.
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl WebSocketMessage {
    /// Creates a message with a fresh id and the current timestamp.
    pub fn new(kind: impl Into<MessageType>, data: Option<Value>, scope: impl Into<String>) -> Self {
        WebSocketMessage {
            id: new_message_id(),
            kind: kind.into(),
            data,
            scope: scope.into(),
            timestamp: now_timestamp(),
        }
    }

    /// Creates an `AUTHENTICATE` message.
    pub fn authenticate(payload: &AuthenticatePayload) -> Result<Self> {
        let data = serde_json::to_value(payload)?;
        Ok(Self::new(
            MessageType::Authenticate,
            Some(data),
            payload.scope_id.clone(),
        ))
    }

    /// Creates an `AUTHENTICATED` acknowledgement.
    pub fn authenticated(scope: impl Into<String>) -> Self {
        Self::new(MessageType::Authenticated, None, scope)
    }

    /// Creates an `AUTH_ERROR` message.
    pub fn auth_error(message: impl Into<String>, scope: impl Into<String>) -> Self {
        let payload = ErrorPayload {
            message: message.into(),
            code: None,
        };
        Self::new(
            MessageType::AuthError,
            serde_json::to_value(payload).ok(),
            scope,
        )
    }

    /// Creates a `REAUTH` message.
    pub fn reauth(token: AuthToken, scope: impl Into<String>) -> Result<Self> {
        let data = serde_json::to_value(ReauthPayload { token })?;
        Ok(Self::new(MessageType::Reauth, Some(data), scope))
    }

    /// Creates a `TOKEN_EXPIRED` notice.
    pub fn token_expired(expires_in: u64, scope: impl Into<String>) -> Self {
        Self::new(
            MessageType::TokenExpired,
            serde_json::to_value(TokenExpiredPayload { expires_in }).ok(),
            scope,
        )
    }

    /// Creates a `PING` message.
    pub fn ping(scope: impl Into<String>) -> Self {
        Self::new(MessageType::Ping, None, scope)
    }

    /// Creates a `PONG` answering the ping with the given id.
    pub fn pong(ping_id: impl Into<String>, scope: impl Into<String>) -> Self {
        let payload = PongPayload {
            ping_id: ping_id.into(),
        };
        Self::new(MessageType::Pong, serde_json::to_value(payload).ok(), scope)
    }

    /// Creates an `ERROR` message.
    pub fn error(message: impl Into<String>, scope: impl Into<String>) -> Self {
        let payload = ErrorPayload {
            message: message.into(),
            code: None,
        };
        Self::new(MessageType::Error, serde_json::to_value(payload).ok(), scope)
    }

    /// Decodes `data` into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        let data = self
            .data
            .clone()
            .ok_or_else(|| Error::MissingPayload(self.kind.clone()))?;
        serde_json::from_value(data).map_err(|source| Error::InvalidPayload {
            kind: self.kind.clone(),
            source,
        })
    }

    /// Serializes the message to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes the message from JSON.
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
