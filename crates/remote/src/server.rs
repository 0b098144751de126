// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket server implementation.
//!
//! Accepts connections on `/<prefix>/<scope>`, runs the authentication
//! handshake, answers heartbeats and fans business messages out to the other
//! authenticated connections of the same scope.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use pl_core::protocol::{AuthenticatePayload, ReauthPayload};
use pl_core::{MessageType, WebSocketMessage};

use crate::state::{Fanout, RelayState};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Run the relay on the given address.
pub async fn run(addr: SocketAddr, state: RelayState) -> Result<(), BoxError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on: {}", addr);
    serve(listener, state).await
}

/// Accept connections from an already bound listener until it fails.
pub async fn serve(listener: TcpListener, state: RelayState) -> Result<(), BoxError> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state).await {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }
}

/// Per-connection protocol state.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) id: u64,
    pub(crate) scope: String,
    pub(crate) user: Option<String>,
    /// When to send the next `TOKEN_EXPIRED`, if the relay has a token TTL.
    pub(crate) expires_at: Option<Instant>,
}

impl Connection {
    pub(crate) fn new(id: u64, scope: impl Into<String>) -> Self {
        Connection {
            id,
            scope: scope.into(),
            user: None,
            expires_at: None,
        }
    }

    pub(crate) fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Scope id is the last non-empty path segment.
pub(crate) fn scope_from_path(path: &str) -> &str {
    path.rsplit('/').find(|s| !s.is_empty()).unwrap_or("")
}

/// Handle a single WebSocket connection.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: RelayState,
) -> Result<(), BoxError> {
    let mut path = String::new();
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            path = req.uri().path().to_string();
            Ok(resp)
        },
    )
    .await?;

    let mut conn = Connection::new(state.next_connection_id(), scope_from_path(&path));
    info!(
        "New WebSocket connection {} from {} (scope {:?})",
        conn.id, peer_addr, conn.scope
    );

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut fanout_rx = state.subscribe();

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_client_message(&text, &mut conn, &state).await {
                            ws_sink.send(Message::Text(reply.to_json()?.into())).await?;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code));
                        info!("Client {} disconnected (code {:?})", peer_addr, code);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sink.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", peer_addr, e);
                        break;
                    }
                    None => {
                        info!("Client {} stream ended", peer_addr);
                        break;
                    }
                }
            }

            fanout = fanout_rx.recv() => {
                match fanout {
                    Ok(Fanout::Deliver { scope, from, msg }) => {
                        if conn.is_authenticated() && scope == conn.scope && from != conn.id {
                            if let Err(e) = ws_sink.send(Message::Text(msg.to_json()?.into())).await {
                                warn!("Failed to deliver to {}: {}", peer_addr, e);
                                break;
                            }
                        }
                    }
                    Ok(Fanout::ExpireTokens { expires_in }) => {
                        if conn.is_authenticated() {
                            let notice = WebSocketMessage::token_expired(expires_in, conn.scope.clone());
                            ws_sink.send(Message::Text(notice.to_json()?.into())).await?;
                        }
                    }
                    Ok(Fanout::Reset { code, reason }) => {
                        info!("Resetting connection {} with code {}", conn.id, code);
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = ws_sink.send(Message::Close(Some(frame))).await;
                        break;
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("Client {} lagged by {} messages", peer_addr, n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            _ = sleep_until(conn.expires_at) => {
                conn.expires_at = None;
                let notice = WebSocketMessage::token_expired(0, conn.scope.clone());
                ws_sink.send(Message::Text(notice.to_json()?.into())).await?;
            }
        }
    }

    if conn.is_authenticated() {
        state.mark_gone();
    }
    info!("Connection closed: {}", peer_addr);
    Ok(())
}

/// Process a client frame and return an optional direct reply.
pub(crate) async fn handle_client_message(
    text: &str,
    conn: &mut Connection,
    state: &RelayState,
) -> Option<WebSocketMessage> {
    let msg = match WebSocketMessage::from_json(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Malformed frame on connection {}: {}", conn.id, e);
            return Some(WebSocketMessage::error(
                format!("malformed frame: {}", e),
                conn.scope.clone(),
            ));
        }
    };
    debug!("Received {} from connection {}", msg.kind, conn.id);

    match msg.kind.clone() {
        MessageType::Authenticate => Some(authenticate(&msg, conn, state).await),
        MessageType::Ping => Some(WebSocketMessage::pong(msg.id.clone(), conn.scope.clone())),
        MessageType::Pong => None,
        _ if !conn.is_authenticated() => Some(WebSocketMessage::error(
            "not authenticated",
            conn.scope.clone(),
        )),
        MessageType::Reauth => reauth(&msg, conn, state).await,
        MessageType::Business(_) => {
            state.deliver(&conn.scope, conn.id, msg);
            None
        }
        other => Some(WebSocketMessage::error(
            format!("unexpected message type {}", other),
            conn.scope.clone(),
        )),
    }
}

async fn authenticate(
    msg: &WebSocketMessage,
    conn: &mut Connection,
    state: &RelayState,
) -> WebSocketMessage {
    let payload: AuthenticatePayload = match msg.payload() {
        Ok(payload) => payload,
        Err(e) => return WebSocketMessage::auth_error(e.to_string(), conn.scope.clone()),
    };
    if payload.scope_id != conn.scope {
        warn!(
            "Connection {} tried scope {:?} on {:?}",
            conn.id, payload.scope_id, conn.scope
        );
        return WebSocketMessage::auth_error("scope mismatch", conn.scope.clone());
    }
    if !state.accepts(&payload.token).await {
        warn!("Connection {} rejected: invalid token", conn.id);
        return WebSocketMessage::auth_error("invalid token", conn.scope.clone());
    }

    if !conn.is_authenticated() {
        state.mark_authenticated();
    }
    info!(
        "Connection {} authenticated as {} ({} {} on {})",
        conn.id,
        payload.user_id,
        payload.client.name,
        payload.client.version,
        payload.client.platform
    );
    conn.user = Some(payload.user_id);
    conn.expires_at = state.token_ttl().map(|ttl| Instant::now() + ttl);
    WebSocketMessage::authenticated(conn.scope.clone())
}

async fn reauth(
    msg: &WebSocketMessage,
    conn: &mut Connection,
    state: &RelayState,
) -> Option<WebSocketMessage> {
    let accepted = match msg.payload::<ReauthPayload>() {
        Ok(payload) => state.accepts(&payload.token).await,
        Err(_) => false,
    };
    if !accepted {
        warn!("Connection {} sent an invalid reauth token", conn.id);
        return Some(WebSocketMessage::auth_error(
            "invalid token",
            conn.scope.clone(),
        ));
    }
    debug!("Connection {} refreshed its token", conn.id);
    conn.expires_at = state.token_ttl().map(|ttl| Instant::now() + ttl);
    None
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
