// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The session driver task.
//!
//! One task owns every piece of mutable session state and handles commands,
//! transport frames, timer expiries, collaborator notifications and the
//! results of its own background work one at a time. Background work (token
//! lookup, opening the transport, token refresh) runs in spawned tasks whose
//! results come back tagged with the connection generation they belong to;
//! results from an older generation are dropped.

use std::sync::Arc;
use std::time::Duration;

use pl_core::protocol::{new_message_id, now_timestamp, ErrorPayload, TokenExpiredPayload};
use pl_core::{close_code, AuthToken, Identity, MessageType, WebSocketMessage};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::auth::{AuthFailure, Authenticator};
use super::backoff::Backoff;
use super::collaborators::{Connectivity, IdentityStore, NetworkObserver, TokenError, TokenProvider};
use super::events::{EventBus, EventKind, SessionEvent};
use super::handle::{Command, MessageDraft, SendOutcome};
use super::heartbeat::{HeartbeatMonitor, PongCheck};
use super::queue::MessageQueue;
use super::state::{ConnectionState, SharedConnectionState, StateMachine};
use super::timers::{TimerKind, Timers};
use super::transport::{Connector, Transport, TransportError, TransportEvent, TransportResult};
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};

/// Max time spent sending a close frame before the handle is dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Why a token refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshPurpose {
    /// After `AUTH_ERROR`: reconnect with the new token.
    Reconnect,
    /// After `TOKEN_EXPIRED`: send `REAUTH` on the open connection.
    Reauth,
}

/// Results of background work, reported back to the driver.
enum Internal<T> {
    Prepared {
        generation: u64,
        result: SessionResult<(AuthToken, Identity)>,
    },
    Opened {
        generation: u64,
        result: TransportResult<T>,
    },
    Refreshed {
        generation: u64,
        purpose: RefreshPurpose,
        result: Result<AuthToken, TokenError>,
    },
}

pub(crate) struct ConnectionManager<C: Connector> {
    config: SessionConfig,
    connector: Arc<C>,
    tokens: Arc<dyn TokenProvider>,
    identity_store: Arc<dyn IdentityStore>,
    network: Option<Arc<dyn NetworkObserver>>,
    events: EventBus,
    shared: Arc<SharedConnectionState>,

    state: StateMachine,
    timers: Timers,
    backoff: Backoff,
    heartbeat: HeartbeatMonitor,
    auth: Authenticator,
    queue: MessageQueue,

    link: Option<C::Transport>,
    token: Option<AuthToken>,
    /// Token from a forced refresh, used by the next attempt as is.
    refreshed_token: Option<AuthToken>,
    identity: Option<Identity>,
    /// Bumped whenever in-flight background work becomes irrelevant.
    generation: u64,
    /// Cancels the prepare/open tasks of the current attempt.
    attempt_cancel: CancellationToken,
    pending_connects: Vec<oneshot::Sender<SessionResult<()>>>,

    internal_tx: mpsc::UnboundedSender<Internal<C::Transport>>,
    internal_rx: mpsc::UnboundedReceiver<Internal<C::Transport>>,
    network_rx: Option<broadcast::Receiver<Connectivity>>,
    refreshed_rx: Option<broadcast::Receiver<AuthToken>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub(crate) fn new(
        config: SessionConfig,
        connector: Arc<C>,
        tokens: Arc<dyn TokenProvider>,
        identity_store: Arc<dyn IdentityStore>,
        network: Option<Arc<dyn NetworkObserver>>,
        events: EventBus,
        shared: Arc<SharedConnectionState>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        ConnectionManager {
            state: StateMachine::new(Arc::clone(&shared)),
            timers: Timers::new(),
            backoff: Backoff::new(config.backoff.clone()),
            heartbeat: HeartbeatMonitor::new(config.heartbeat.clone()),
            auth: Authenticator::new(&config.client, config.auth.timeout()),
            queue: MessageQueue::new(config.queue.max_size),
            config,
            connector,
            tokens,
            identity_store,
            network,
            events,
            shared,
            link: None,
            token: None,
            refreshed_token: None,
            identity: None,
            generation: 0,
            attempt_cancel: CancellationToken::new(),
            pending_connects: Vec::new(),
            internal_tx,
            internal_rx,
            network_rx: None,
            refreshed_rx: None,
        }
    }

    /// Runs until the handle asks for shutdown or is dropped.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("session driver started");
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(internal) = self.internal_rx.recv() => {
                    self.handle_internal(internal).await;
                }
                event = recv_link(&mut self.link) => {
                    self.handle_transport_event(event).await;
                }
                kind = self.timers.expired() => {
                    self.handle_timer(kind).await;
                }
                status = recv_broadcast(&mut self.network_rx) => {
                    self.handle_network(status).await;
                }
                token = recv_broadcast(&mut self.refreshed_rx) => {
                    self.handle_token_refreshed(token).await;
                }
            }
        }

        self.teardown("session disposed").await;
        self.resolve_pending(Err(SessionError::Closed));
        self.events.clear();
        debug!("session driver stopped");
    }

    // Commands

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { reply } => match self.state.current() {
                ConnectionState::Disconnected => {
                    self.pending_connects.push(reply);
                    self.restart_schedule();
                    self.begin_attempt().await;
                }
                ConnectionState::Connected => {
                    let _ = reply.send(Ok(()));
                }
                state => {
                    debug!(%state, "connect ignored, attempt already underway");
                    self.pending_connects.push(reply);
                }
            },
            Command::Disconnect => {
                info!("disconnect requested");
                self.teardown("client disconnect").await;
            }
            Command::Send { draft, reply } => {
                let result = self.handle_send(draft).await;
                let _ = reply.send(result);
            }
            Command::Shutdown => {}
        }
    }

    async fn handle_send(&mut self, draft: MessageDraft) -> SessionResult<SendOutcome> {
        if draft.kind.is_protocol() {
            return Err(SessionError::ReservedType(draft.kind));
        }
        let msg = self.build_message(draft);

        let can_write = self.state.is(ConnectionState::Connected)
            && self.queue.is_empty()
            && self.link.as_ref().is_some_and(|l| l.is_connected());
        if !can_write {
            debug!(id = %msg.id, kind = %msg.kind, "queueing message");
            self.enqueue(msg);
            return Ok(SendOutcome::Queued);
        }

        if let Err(e) = self.write(&msg).await {
            self.enqueue(msg);
            self.fail_connection(close_code::SEND_FAILED, SessionError::SendFailure(e.to_string()))
                .await;
            return Ok(SendOutcome::Queued);
        }
        Ok(SendOutcome::Sent)
    }

    fn build_message(&self, draft: MessageDraft) -> WebSocketMessage {
        let scope = draft
            .scope
            .or_else(|| self.identity.as_ref().map(|i| i.scope_id.clone()))
            .unwrap_or_default();
        WebSocketMessage {
            id: draft.id.unwrap_or_else(new_message_id),
            kind: draft.kind,
            data: draft.data,
            scope,
            timestamp: now_timestamp(),
        }
    }

    fn enqueue(&mut self, msg: WebSocketMessage) {
        if let Some(dropped) = self.queue.enqueue(msg) {
            let capacity = self.queue.capacity();
            warn!(capacity, dropped = %dropped.id, "outbound queue full, dropped oldest message");
            self.emit(SessionEvent::Error(SessionError::QueueOverflow {
                capacity,
                dropped_id: dropped.id,
            }));
        }
        self.shared.set_queued(self.queue.len());
    }

    // Connection attempts

    /// A caller-driven attempt after giving up gets a full retry schedule.
    fn restart_schedule(&mut self) {
        if self.backoff.is_exhausted() {
            debug!(attempts = self.backoff.attempt(), "starting a new retry schedule");
            self.backoff.reset();
            self.shared.set_attempt(0);
        }
    }

    async fn begin_attempt(&mut self) {
        let refreshed = self.refreshed_token.take();
        self.subscribe_collaborators();
        self.timers.cancel(TimerKind::Reconnect);
        if !self.set_state(ConnectionState::Connecting) {
            return;
        }

        self.generation += 1;
        self.attempt_cancel = CancellationToken::new();
        self.timers
            .arm(TimerKind::ConnectTimeout, self.config.server.connect_timeout());
        info!(attempt = self.backoff.attempt(), "connecting");

        let tokens = Arc::clone(&self.tokens);
        let store = Arc::clone(&self.identity_store);
        let tx = self.internal_tx.clone();
        let cancel = self.attempt_cancel.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = prepare(tokens, store, refreshed) => result,
            };
            let _ = tx.send(Internal::Prepared { generation, result });
        });
    }

    async fn handle_internal(&mut self, internal: Internal<C::Transport>) {
        match internal {
            Internal::Prepared { generation, result } => {
                if generation != self.generation || !self.state.is(ConnectionState::Connecting) {
                    debug!(generation, "dropping stale prepare result");
                    return;
                }
                match result {
                    Ok((token, identity)) => self.open_transport(token, identity),
                    Err(e) => self.fail_connection(close_code::ABNORMAL, e).await,
                }
            }
            Internal::Opened { generation, result } => {
                if generation != self.generation || !self.state.is(ConnectionState::Connecting) {
                    debug!(generation, "dropping stale transport");
                    return;
                }
                self.timers.cancel(TimerKind::ConnectTimeout);
                match result {
                    Ok(transport) => self.start_handshake(transport).await,
                    Err(e) => {
                        let err = SessionError::Transport {
                            code: close_code::ABNORMAL,
                            reason: e.to_string(),
                        };
                        self.fail_connection(close_code::ABNORMAL, err).await;
                    }
                }
            }
            Internal::Refreshed {
                generation,
                purpose,
                result,
            } => {
                if generation != self.generation {
                    debug!(generation, ?purpose, "dropping stale token refresh");
                    return;
                }
                match purpose {
                    RefreshPurpose::Reconnect => self.on_reconnect_refresh(result).await,
                    RefreshPurpose::Reauth => self.on_reauth_refresh(result).await,
                }
            }
        }
    }

    fn open_transport(&mut self, token: AuthToken, identity: Identity) {
        self.queue.assign_scope(&identity.scope_id);
        let url = self.config.server.url_for(&identity.scope_id);
        debug!(%url, "opening transport");
        self.token = Some(token);
        self.identity = Some(identity);

        let connector = Arc::clone(&self.connector);
        let tx = self.internal_tx.clone();
        let cancel = self.attempt_cancel.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let mut transport = connector.create();
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = transport.connect(&url) => result,
            };
            let result = result.map(|()| transport);
            let _ = tx.send(Internal::Opened { generation, result });
        });
    }

    async fn start_handshake(&mut self, transport: C::Transport) {
        self.link = Some(transport);
        if !self.set_state(ConnectionState::Authenticating) {
            return;
        }
        let (Some(token), Some(identity)) = (self.token.clone(), self.identity.clone()) else {
            let err = SessionError::MissingToken("credentials lost before handshake".to_string());
            self.fail_connection(close_code::AUTH_FAILED, err).await;
            return;
        };

        let handshake = match self.auth.handshake(&token, &identity, &mut self.timers) {
            Ok(msg) => msg,
            Err(e) => {
                let err = SessionError::SendFailure(e.to_string());
                self.fail_connection(close_code::SEND_FAILED, err).await;
                return;
            }
        };
        if let Err(e) = self.write(&handshake).await {
            self.fail_connection(close_code::SEND_FAILED, SessionError::SendFailure(e.to_string()))
                .await;
        }
    }

    async fn on_authenticated(&mut self) {
        self.auth.on_authenticated(&mut self.timers);
        if !self.set_state(ConnectionState::Connected) {
            return;
        }
        self.backoff.reset();
        self.shared.set_attempt(0);
        self.heartbeat.start(&mut self.timers);
        info!(scope = %self.scope(), queued = self.queue.len(), "authenticated");

        if !self.flush_queue().await {
            return;
        }
        self.resolve_pending(Ok(()));
        self.emit(SessionEvent::Connect);
    }

    /// Sends every queued message in order. Returns false if a write failed.
    async fn flush_queue(&mut self) -> bool {
        let mut flushed = 0usize;
        while let Some(msg) = self.queue.pop_front() {
            if let Err(e) = self.write(&msg).await {
                self.queue.push_front(msg);
                self.shared.set_queued(self.queue.len());
                let err = SessionError::SendFailure(e.to_string());
                self.fail_connection(close_code::SEND_FAILED, err).await;
                return false;
            }
            flushed += 1;
        }
        self.shared.set_queued(0);
        if flushed > 0 {
            info!(flushed, "flushed queued messages");
        }
        true
    }

    // Inbound frames

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(msg) => self.handle_frame(msg).await,
            TransportEvent::Closed { code, reason } => {
                self.link = None;
                self.handle_close(code, reason).await;
            }
        }
    }

    async fn handle_frame(&mut self, msg: WebSocketMessage) {
        debug!(id = %msg.id, kind = %msg.kind, "received frame");
        match &msg.kind {
            MessageType::Authenticated => {
                if self.state.is(ConnectionState::Authenticating) {
                    self.on_authenticated().await;
                } else {
                    debug!(state = %self.state.current(), "ignoring stray AUTHENTICATED");
                }
            }
            MessageType::AuthError => {
                if matches!(
                    self.state.current(),
                    ConnectionState::Authenticating | ConnectionState::Connected
                ) {
                    let reason = error_message(&msg, "authentication rejected");
                    self.on_auth_error(reason).await;
                }
            }
            MessageType::TokenExpired => {
                if self.state.is(ConnectionState::Connected) {
                    let expires_in = msg
                        .payload::<TokenExpiredPayload>()
                        .map(|p| p.expires_in)
                        .unwrap_or_default();
                    info!(expires_in, "token expiring, refreshing");
                    self.spawn_refresh(RefreshPurpose::Reauth);
                }
            }
            MessageType::Ping => {
                let pong = WebSocketMessage::pong(msg.id.clone(), self.scope());
                if let Err(e) = self.write(&pong).await {
                    let err = SessionError::SendFailure(e.to_string());
                    self.fail_connection(close_code::SEND_FAILED, err).await;
                }
            }
            MessageType::Pong => {
                if self.state.is(ConnectionState::Connected) {
                    self.heartbeat.on_pong(&mut self.timers);
                }
            }
            MessageType::Error => {
                let reason = error_message(&msg, "unspecified server error");
                warn!(%reason, "server reported an error");
                self.emit(SessionEvent::Error(SessionError::Server(reason)));
            }
            MessageType::Connect | MessageType::Disconnect => {
                info!(kind = %msg.kind, "server notice");
            }
            MessageType::Authenticate | MessageType::Reauth => {
                warn!(kind = %msg.kind, "dropping client-only message from server");
            }
            MessageType::Business(name) => {
                if EventKind::is_reserved_name(name) {
                    warn!(kind = %name, "dropping message with reserved event name");
                } else {
                    self.emit(SessionEvent::Message(msg));
                }
            }
        }
    }

    async fn handle_close(&mut self, code: u16, reason: String) {
        info!(code, %reason, "connection closed by peer");
        self.stop_activity();
        self.emit(SessionEvent::Disconnect {
            code,
            reason: reason.clone(),
        });

        let err = SessionError::Transport { code, reason };
        if close_code::is_intentional(code) {
            self.resolve_pending(Err(err));
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        self.emit(SessionEvent::Error(err.clone()));
        self.schedule_reconnect(err);
    }

    // Authentication failures and token refresh

    async fn on_auth_error(&mut self, reason: String) {
        warn!(%reason, "authentication rejected");
        match self.auth.on_auth_error(&mut self.timers) {
            AuthFailure::RefreshAndReconnect => {
                self.stop_activity();
                if self.close_link(close_code::AUTH_FAILED, &reason).await {
                    self.emit(SessionEvent::Disconnect {
                        code: close_code::AUTH_FAILED,
                        reason,
                    });
                }
                if self.set_state(ConnectionState::Reconnecting) {
                    self.spawn_refresh(RefreshPurpose::Reconnect);
                }
            }
            AuthFailure::Surface => {
                let err = SessionError::Auth(reason);
                error!(error = %err, "authentication failed after token refresh");
                self.emit(SessionEvent::Error(err.clone()));
                self.resolve_pending(Err(err));
                self.teardown_with(close_code::AUTH_FAILED, "authentication failed")
                    .await;
            }
        }
    }

    fn spawn_refresh(&mut self, purpose: RefreshPurpose) {
        let tokens = Arc::clone(&self.tokens);
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = tokens.force_refresh().await;
            let _ = tx.send(Internal::Refreshed {
                generation,
                purpose,
                result,
            });
        });
    }

    async fn on_reconnect_refresh(&mut self, result: Result<AuthToken, TokenError>) {
        if !self.state.is(ConnectionState::Reconnecting) {
            return;
        }
        match result {
            Ok(token) => {
                info!("token refreshed, reconnecting");
                self.refreshed_token = Some(token);
                self.begin_attempt().await;
            }
            Err(e) => {
                let err = SessionError::Auth(format!("token refresh failed: {}", e));
                error!(error = %err, "giving up on authentication");
                self.emit(SessionEvent::Error(err.clone()));
                self.resolve_pending(Err(err));
                self.teardown("authentication failed").await;
            }
        }
    }

    async fn on_reauth_refresh(&mut self, result: Result<AuthToken, TokenError>) {
        if !self.state.is(ConnectionState::Connected) {
            return;
        }
        match result {
            Ok(token) => self.send_reauth(token).await,
            Err(e) => {
                warn!(error = %e, "token refresh for reauth failed");
                self.emit(SessionEvent::Error(SessionError::TokenRefresh(e.to_string())));
            }
        }
    }

    async fn send_reauth(&mut self, token: AuthToken) {
        self.token = Some(token.clone());
        let scope = self.scope();
        let result = match self.auth.reauth(token, &scope) {
            Ok(msg) => self.write(&msg).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match result {
            Ok(()) => info!("sent reauth"),
            Err(e) => {
                self.fail_connection(close_code::SEND_FAILED, SessionError::SendFailure(e))
                    .await;
            }
        }
    }

    async fn handle_token_refreshed(&mut self, token: Option<AuthToken>) {
        let Some(token) = token else {
            self.refreshed_rx = None;
            return;
        };
        if self.state.is(ConnectionState::Connected) {
            debug!("token refreshed elsewhere, forwarding");
            self.send_reauth(token).await;
        } else {
            self.token = Some(token);
        }
    }

    // Timers

    async fn handle_timer(&mut self, kind: TimerKind) {
        debug!(?kind, state = %self.state.current(), "timer expired");
        match kind {
            TimerKind::ConnectTimeout => {
                if self.state.is(ConnectionState::Connecting) {
                    let err = SessionError::ConnectionTimeout(self.config.server.connect_timeout());
                    self.fail_connection(close_code::CONNECT_TIMEOUT, err).await;
                }
            }
            TimerKind::AuthTimeout => {
                if self.state.is(ConnectionState::Authenticating) {
                    let err = SessionError::AuthTimeout(self.auth.timeout());
                    self.fail_connection(close_code::AUTH_TIMEOUT, err).await;
                }
            }
            TimerKind::HeartbeatInterval => {
                if !self.state.is(ConnectionState::Connected) {
                    return;
                }
                let scope = self.scope();
                if let Some(ping) = self.heartbeat.on_tick(&mut self.timers, &scope) {
                    if let Err(e) = self.write(&ping).await {
                        let err = SessionError::SendFailure(e.to_string());
                        self.fail_connection(close_code::SEND_FAILED, err).await;
                    }
                }
            }
            TimerKind::PongTimeout => match self.heartbeat.on_pong_timeout() {
                PongCheck::Stale => {}
                PongCheck::Missed { missed } => warn!(missed, "missed pong"),
                PongCheck::TimedOut { missed } => {
                    self.fail_connection(
                        close_code::HEARTBEAT_TIMEOUT,
                        SessionError::HeartbeatTimeout(missed),
                    )
                    .await;
                }
            },
            TimerKind::Reconnect => {
                if self.state.is(ConnectionState::Reconnecting) {
                    self.begin_attempt().await;
                }
            }
        }
    }

    // Network

    async fn handle_network(&mut self, status: Option<Connectivity>) {
        match status {
            None => self.network_rx = None,
            Some(Connectivity::Online) => {
                if self.state.is(ConnectionState::Disconnected) {
                    info!("network restored, connecting");
                    self.restart_schedule();
                    self.begin_attempt().await;
                }
            }
            Some(Connectivity::Offline) => {
                if self.state.is(ConnectionState::Disconnected) {
                    return;
                }
                info!("network lost, closing connection");
                self.stop_activity();
                self.backoff.reset();
                self.shared.set_attempt(0);
                self.resolve_pending(Err(SessionError::Transport {
                    code: close_code::GOING_AWAY,
                    reason: "network offline".to_string(),
                }));
                if self.close_link(close_code::GOING_AWAY, "network offline").await {
                    self.emit(SessionEvent::Disconnect {
                        code: close_code::GOING_AWAY,
                        reason: "network offline".to_string(),
                    });
                }
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    // Failure and teardown

    /// Tears down the current attempt or connection and schedules a retry.
    async fn fail_connection(&mut self, code: u16, err: SessionError) {
        warn!(error = %err, code, "connection failed");
        self.stop_activity();
        self.emit(SessionEvent::Error(err.clone()));
        if self.close_link(code, &err.to_string()).await {
            self.emit(SessionEvent::Disconnect {
                code,
                reason: err.to_string(),
            });
        }
        self.schedule_reconnect(err);
    }

    /// Arms the next retry, or gives up once the schedule is spent.
    ///
    /// Waiting `connect()` calls get `cause` when a retry follows and
    /// `MaxReconnectAttemptsExceeded` when none does.
    fn schedule_reconnect(&mut self, cause: SessionError) {
        self.heartbeat.stop(&mut self.timers);
        self.timers.cancel_all();

        match self.backoff.next_delay() {
            Some(delay) => {
                self.resolve_pending(Err(cause));
                if !self.state.is(ConnectionState::Reconnecting)
                    && !self.set_state(ConnectionState::Reconnecting)
                {
                    return;
                }
                let attempt = self.backoff.attempt();
                self.shared.set_attempt(attempt);
                self.timers.arm(TimerKind::Reconnect, delay);
                info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                self.emit(SessionEvent::ReconnectionStatus { attempt, delay });
            }
            None => {
                let attempts = self.backoff.attempt();
                error!(attempts, "max reconnect attempts reached");
                self.resolve_pending(Err(SessionError::MaxReconnectAttemptsExceeded(attempts)));
                self.set_state(ConnectionState::Disconnected);
                self.emit(SessionEvent::MaxReconnectAttempts { attempts });
            }
        }
    }

    /// Explicit disconnect: close with 1000, no retry, drop subscriptions.
    async fn teardown(&mut self, reason: &str) {
        self.teardown_with(close_code::NORMAL, reason).await;
    }

    async fn teardown_with(&mut self, code: u16, reason: &str) {
        self.stop_activity();
        if self.close_link(code, reason).await {
            self.emit(SessionEvent::Disconnect {
                code,
                reason: reason.to_string(),
            });
        }
        self.backoff.reset();
        self.shared.set_attempt(0);
        self.auth.reset();
        self.refreshed_token = None;
        self.network_rx = None;
        self.refreshed_rx = None;
        self.resolve_pending(Err(SessionError::Cancelled));
        if !self.state.is(ConnectionState::Disconnected) {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Stops the heartbeat, clears every timer and invalidates background work.
    fn stop_activity(&mut self) {
        self.generation += 1;
        self.attempt_cancel.cancel();
        self.heartbeat.stop(&mut self.timers);
        self.timers.cancel_all();
    }

    /// Closes and drops the transport. Returns false if there was none.
    async fn close_link(&mut self, code: u16, reason: &str) -> bool {
        let Some(mut link) = self.link.take() else {
            return false;
        };
        match tokio::time::timeout(CLOSE_GRACE, link.close(code, reason.to_string())).await {
            Ok(Ok(())) => debug!(code, "transport closed"),
            Ok(Err(e)) => debug!(code, error = %e, "close frame not sent"),
            Err(_) => debug!(code, "close timed out"),
        }
        true
    }

    // Helpers

    async fn write(&mut self, msg: &WebSocketMessage) -> TransportResult<()> {
        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;
        link.send(msg).await?;
        debug!(id = %msg.id, kind = %msg.kind, "sent frame");
        Ok(())
    }

    fn scope(&self) -> String {
        self.identity
            .as_ref()
            .map(|i| i.scope_id.clone())
            .unwrap_or_default()
    }

    fn subscribe_collaborators(&mut self) {
        if self.network_rx.is_none() {
            self.network_rx = self.network.as_ref().map(|n| n.subscribe());
        }
        if self.refreshed_rx.is_none() {
            self.refreshed_rx = self.tokens.subscribe_refreshed();
        }
    }

    /// Moves to `to` and emits a state change. Illegal moves are logged and skipped.
    fn set_state(&mut self, to: ConnectionState) -> bool {
        match self.state.transition(to) {
            Ok(from) => {
                self.emit(SessionEvent::StateChange { from, to });
                true
            }
            Err(e) => {
                warn!(error = %e, "rejected state transition");
                false
            }
        }
    }

    fn resolve_pending(&mut self, result: SessionResult<()>) {
        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(result.clone());
        }
    }

    fn emit(&self, event: SessionEvent) {
        self.events.emit(&event);
    }
}

/// Resolves the token and identity an attempt needs.
async fn prepare(
    tokens: Arc<dyn TokenProvider>,
    store: Arc<dyn IdentityStore>,
    refreshed: Option<AuthToken>,
) -> SessionResult<(AuthToken, Identity)> {
    let token = match refreshed {
        Some(token) => token,
        None => tokens
            .token_with_refresh()
            .await
            .map_err(|e| SessionError::MissingToken(e.to_string()))?,
    };
    if !token.is_usable() {
        return Err(SessionError::MissingToken("token is blank".to_string()));
    }
    let identity = store
        .load()
        .await
        .ok_or_else(|| SessionError::MissingIdentity("identity store is empty".to_string()))?;
    identity
        .validate()
        .map_err(|e| SessionError::MissingIdentity(e.to_string()))?;
    Ok((token, identity))
}

fn error_message(msg: &WebSocketMessage, fallback: &str) -> String {
    msg.payload::<ErrorPayload>()
        .ok()
        .map(|p| p.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Next transport event, or never if there is no transport.
async fn recv_link<T: Transport>(link: &mut Option<T>) -> TransportEvent {
    match link {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

/// Next broadcast value; `None` once the sender is gone, never if unsubscribed.
async fn recv_broadcast<T: Clone>(rx: &mut Option<broadcast::Receiver<T>>) -> Option<T> {
    let Some(receiver) = rx.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match receiver.recv().await {
            Ok(value) => return Some(value),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "collaborator notifications lagged");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}
