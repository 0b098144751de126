// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Transport abstraction for WebSocket communication.
//!
//! Provides a trait-based transport layer that enables:
//! - Real WebSocket connections for production
//! - Mock transports for unit testing

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use pl_core::{close_code, WebSocketMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::collaborators::BoxFuture;

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation needs an open connection.
    #[error("not connected")]
    NotConnected,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] pl_core::Error),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// What `recv` produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A well-formed frame.
    Message(WebSocketMessage),
    /// The connection is gone.
    Closed { code: u16, reason: String },
}

/// WebSocket-like message channel.
///
/// `recv` must be cancel-safe: the session polls it inside `select!`.
pub trait Transport: Send + 'static {
    /// Opens the connection.
    fn connect(&mut self, url: &str) -> BoxFuture<'_, TransportResult<()>>;

    /// Sends a close frame with `code` and drops the connection.
    fn close(&mut self, code: u16, reason: String) -> BoxFuture<'_, TransportResult<()>>;

    /// Writes one frame.
    fn send<'a>(&'a mut self, msg: &'a WebSocketMessage) -> BoxFuture<'a, TransportResult<()>>;

    /// Waits for the next frame or the end of the connection.
    fn recv(&mut self) -> BoxFuture<'_, TransportEvent>;

    fn is_connected(&self) -> bool;
}

/// Builds a fresh transport for each connection attempt.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    fn create(&self) -> Self::Transport;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport implementation using tokio-tungstenite.
#[derive(Default)]
pub struct WebSocketTransport {
    ws: Option<WebSocketConnection>,
}

struct WebSocketConnection {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        WebSocketTransport { ws: None }
    }
}

impl Transport for WebSocketTransport {
    fn connect(&mut self, url: &str) -> BoxFuture<'_, TransportResult<()>> {
        let url = url.to_string();
        Box::pin(async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

            let (sink, stream) = ws_stream.split();
            self.ws = Some(WebSocketConnection { sink, stream });
            Ok(())
        })
    }

    fn close(&mut self, code: u16, reason: String) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            let Some(mut ws) = self.ws.take() else {
                return Ok(());
            };
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.into(),
            };
            ws.sink
                .send(Message::Close(Some(frame)))
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
            let _ = ws.sink.close().await;
            Ok(())
        })
    }

    fn send<'a>(&'a mut self, msg: &'a WebSocketMessage) -> BoxFuture<'a, TransportResult<()>> {
        Box::pin(async move {
            let ws = self.ws.as_mut().ok_or(TransportError::NotConnected)?;
            let json = msg.to_json()?;

            if let Err(e) = ws.sink.send(Message::Text(json.into())).await {
                // Connection is broken, clear it
                self.ws = None;
                return Err(TransportError::SendFailed(e.to_string()));
            }
            Ok(())
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, TransportEvent> {
        Box::pin(async move {
            let Some(ws) = self.ws.as_mut() else {
                return TransportEvent::Closed {
                    code: close_code::ABNORMAL,
                    reason: "not connected".to_string(),
                };
            };

            loop {
                match ws.stream.next().await {
                    Some(Ok(Message::Text(text))) => match WebSocketMessage::from_json(&text) {
                        Ok(msg) => return TransportEvent::Message(msg),
                        Err(e) => {
                            warn!(error = %e, "dropping malformed frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        self.ws = None;
                        let (code, reason) = match frame {
                            Some(f) => (u16::from(f.code), f.reason.to_string()),
                            None => (close_code::NO_STATUS, String::new()),
                        };
                        return TransportEvent::Closed { code, reason };
                    }
                    Some(Ok(other)) => {
                        // Protocol-level ping/pong and binary frames
                        debug!(len = other.len(), "ignoring non-text frame");
                        continue;
                    }
                    Some(Err(e)) => {
                        self.ws = None;
                        return TransportEvent::Closed {
                            code: close_code::ABNORMAL,
                            reason: e.to_string(),
                        };
                    }
                    None => {
                        self.ws = None;
                        return TransportEvent::Closed {
                            code: close_code::ABNORMAL,
                            reason: "stream ended".to_string(),
                        };
                    }
                }
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.ws.is_some()
    }
}

/// Connector producing [`WebSocketTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    fn create(&self) -> WebSocketTransport {
        WebSocketTransport::new()
    }
}
