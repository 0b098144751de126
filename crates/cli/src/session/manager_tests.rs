// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for the session driver, run against the mock transport with a
//! paused clock.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pl_core::protocol::{AuthenticatePayload, PongPayload, ReauthPayload};
use pl_core::{close_code, AuthToken, Identity, MessageType, WebSocketMessage};
use serde_json::json;
use tokio::time::{sleep, timeout, Instant};

use super::transport_tests::MockConnector;
use super::*;
use crate::config::SessionConfig;
use crate::error::SessionError;

struct Harness {
    session: Session,
    connector: MockConnector,
    tokens: Arc<StaticTokenProvider>,
    identity: Arc<StaticIdentityStore>,
    network: Arc<ManualNetworkObserver>,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    fn with_config(config: SessionConfig) -> Self {
        let connector = MockConnector::new();
        connector.auto_authenticate(true);
        let tokens = Arc::new(StaticTokenProvider::new("tok-1"));
        let identity = Arc::new(StaticIdentityStore::new(
            Identity::new("user-1", "store-42").unwrap(),
        ));
        let network = Arc::new(ManualNetworkObserver::new());

        let session = SessionBuilder::new(config, tokens.clone(), identity.clone())
            .connector(connector.clone())
            .network_observer(network.clone())
            .spawn()
            .unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            EventKind::Connect,
            EventKind::Disconnect,
            EventKind::Error,
            EventKind::ReconnectionStatus,
            EventKind::MaxReconnectAttempts,
            EventKind::StateChange,
            EventKind::AnyMessage,
        ] {
            let sink = Arc::clone(&events);
            session.on(kind, move |event| sink.lock().unwrap().push(event.clone()));
        }

        Harness {
            session,
            connector,
            tokens,
            identity,
            network,
            events,
        }
    }

    async fn connected() -> Self {
        let h = Self::new();
        h.session.connect().await.unwrap();
        h
    }

    fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, pred: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    fn reconnection_attempts(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::ReconnectionStatus { attempt, .. } => Some(attempt),
                _ => None,
            })
            .collect()
    }

    fn errors(&self) -> Vec<SessionError> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Error(err) => Some(err),
                _ => None,
            })
            .collect()
    }

    /// Starts a connect without waiting for it to resolve.
    async fn kick_connect(&self) {
        let _ = timeout(Duration::from_millis(1), self.session.connect()).await;
    }
}

/// Lets every runnable task make progress.
async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

fn business(kind: &str, n: u32) -> MessageDraft {
    MessageDraft::new(kind).with_data(json!({ "n": n }))
}

fn authenticate_payload(msg: &WebSocketMessage) -> AuthenticatePayload {
    assert_eq!(msg.kind, MessageType::Authenticate);
    msg.payload().unwrap()
}

// Connecting

#[tokio::test(start_paused = true)]
async fn connect_authenticates_and_reports_connect() {
    let h = Harness::connected().await;

    assert_eq!(h.session.state(), ConnectionState::Connected);
    assert!(h.session.is_connected());
    assert_eq!(h.connector.urls(), ["ws://localhost:7890/ws/store-42"]);

    let link = h.connector.last_link();
    let sent = link.sent();
    assert_eq!(sent.len(), 1);
    let payload = authenticate_payload(&sent[0]);
    assert_eq!(payload.token.expose(), "tok-1");
    assert_eq!(payload.user_id, "user-1");
    assert_eq!(payload.scope_id, "store-42");
    assert!(!payload.nonce.is_empty());

    let transitions: Vec<_> = h
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::StateChange { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        [
            ConnectionState::Connecting,
            ConnectionState::Authenticating,
            ConnectionState::Connected
        ]
    );
    assert_eq!(h.count(|e| *e == SessionEvent::Connect), 1);
}

#[tokio::test(start_paused = true)]
async fn token_never_appears_in_url() {
    let h = Harness::connected().await;
    assert!(h.connector.urls().iter().all(|u| !u.contains("tok-1")));
}

#[tokio::test(start_paused = true)]
async fn connect_when_connected_is_noop() {
    let h = Harness::connected().await;
    h.session.connect().await.unwrap();
    settle().await;
    assert_eq!(h.connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_while_connecting_opens_nothing_new() {
    let h = Harness::new();
    h.connector.hang_connects(true);

    h.kick_connect().await;
    assert_eq!(h.session.state(), ConnectionState::Connecting);
    h.kick_connect().await;
    h.kick_connect().await;
    assert_eq!(h.connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_while_authenticating_opens_nothing_new() {
    let h = Harness::new();
    h.connector.auto_authenticate(false);

    h.kick_connect().await;
    assert_eq!(h.session.state(), ConnectionState::Authenticating);
    h.kick_connect().await;
    assert_eq!(h.connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_while_reconnecting_leaves_retry_in_charge() {
    let h = Harness::new();
    h.connector.fail_next_connects(1);

    assert!(h.session.connect().await.is_err());
    assert_eq!(h.session.state(), ConnectionState::Reconnecting);

    h.kick_connect().await;
    assert_eq!(h.connector.connect_count(), 1);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.connector.connect_count(), 2);
    assert_eq!(h.session.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn pending_connect_resolves_on_retry_success() {
    let h = Harness::new();
    h.connector.auto_authenticate(false);
    h.kick_connect().await;

    h.connector.last_link().close_from_server(4001, "reset");
    settle().await;
    assert_eq!(h.session.state(), ConnectionState::Reconnecting);

    h.connector.auto_authenticate(true);
    timeout(Duration::from_secs(5), h.session.connect())
        .await
        .unwrap()
        .unwrap();
    assert!(h.session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn missing_token_fails_fast_without_socket() {
    let h = Harness::new();
    h.tokens.clear_token();

    let err = h.session.connect().await.unwrap_err();
    assert!(matches!(err, SessionError::MissingToken(_)));
    assert_eq!(h.connector.connect_count(), 0);
    assert_eq!(h.session.state(), ConnectionState::Reconnecting);
    assert_eq!(h.session.reconnect_attempt(), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_identity_fails_fast_without_socket() {
    let h = Harness::new();
    h.identity.clear();

    let err = h.session.connect().await.unwrap_err();
    assert!(matches!(err, SessionError::MissingIdentity(_)));
    assert_eq!(h.connector.connect_count(), 0);
    assert_eq!(h.reconnection_attempts(), [1]);

    h.identity.set(Identity::new("user-1", "store-7").unwrap());
    sleep(Duration::from_secs(2)).await;
    assert!(h.session.is_connected());
    assert_eq!(h.connector.urls(), ["ws://localhost:7890/ws/store-7"]);
}

#[tokio::test(start_paused = true)]
async fn transport_open_timeout_schedules_retry() {
    let h = Harness::new();
    h.connector.hang_connects(true);

    let start = Instant::now();
    let err = h.session.connect().await.unwrap_err();
    assert_eq!(err, SessionError::ConnectionTimeout(Duration::from_secs(10)));
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert_eq!(h.session.state(), ConnectionState::Reconnecting);
    assert_eq!(h.reconnection_attempts(), [1]);
}

// Scenario A

#[tokio::test(start_paused = true)]
async fn auth_timeout_closes_4002_and_schedules_first_retry() {
    let h = Harness::new();
    h.connector.auto_authenticate(false);

    let start = Instant::now();
    let err = h.session.connect().await.unwrap_err();
    assert_eq!(err, SessionError::AuthTimeout(Duration::from_secs(10)));
    assert!(start.elapsed() >= Duration::from_secs(10));

    let link = h.connector.last_link();
    assert_eq!(link.close_code(), Some(close_code::AUTH_TIMEOUT));
    assert_eq!(h.session.state(), ConnectionState::Reconnecting);
    assert_eq!(h.session.reconnect_attempt(), 1);
    assert_eq!(h.reconnection_attempts(), [1]);
    assert_eq!(
        h.count(|e| matches!(
            e,
            SessionEvent::Disconnect {
                code: close_code::AUTH_TIMEOUT,
                ..
            }
        )),
        1
    );
}

// Scenario B

#[tokio::test(start_paused = true)]
async fn sends_while_connected_are_written_immediately() {
    let h = Harness::connected().await;

    for n in 1..=3 {
        let outcome = h.session.send(business("ORDER_UPDATED", n)).await.unwrap();
        assert_eq!(outcome, SendOutcome::Sent);
    }

    let link = h.connector.last_link();
    let orders = link.sent_of(MessageType::parse("ORDER_UPDATED"));
    assert_eq!(orders.len(), 3);
    assert!(orders.iter().all(|m| m.scope == "store-42"));
    assert_eq!(h.session.queued_messages(), 0);
}

// Scenario C

#[tokio::test(start_paused = true)]
async fn queued_messages_flush_in_order_after_server_reset() {
    let h = Harness::connected().await;

    h.connector.last_link().close_from_server(close_code::SERVER_RESET, "reset");
    settle().await;
    assert_eq!(h.session.state(), ConnectionState::Reconnecting);
    assert_eq!(h.session.reconnect_attempt(), 1);

    let mut ids = Vec::new();
    for n in 1..=5 {
        let draft = business("ORDER_UPDATED", n).with_id(format!("m{}", n));
        ids.push(format!("m{}", n));
        assert_eq!(h.session.send(draft).await.unwrap(), SendOutcome::Queued);
    }
    assert_eq!(h.session.queued_messages(), 5);

    sleep(Duration::from_secs(2)).await;
    assert!(h.session.is_connected());
    assert_eq!(h.session.reconnect_attempt(), 0);
    assert_eq!(h.session.queued_messages(), 0);

    let link = h.connector.last_link();
    let sent = link.sent();
    assert_eq!(sent[0].kind, MessageType::Authenticate);
    let flushed: Vec<_> = sent[1..].iter().map(|m| m.id.clone()).collect();
    assert_eq!(flushed, ids);
}

#[tokio::test(start_paused = true)]
async fn messages_queued_before_first_connect_flush_in_order() {
    let h = Harness::new();
    for kind in ["M1", "M2", "M3"] {
        assert_eq!(
            h.session.send(MessageDraft::new(kind)).await.unwrap(),
            SendOutcome::Queued
        );
    }

    h.session.connect().await.unwrap();
    let link = h.connector.last_link();
    assert_eq!(link.sent_types(), ["AUTHENTICATE", "M1", "M2", "M3"]);
    assert!(link.sent().iter().all(|m| m.scope == "store-42"));
}

#[tokio::test(start_paused = true)]
async fn connect_event_follows_flush() {
    let h = Harness::new();
    h.session.send(MessageDraft::new("M1")).await.unwrap();

    let connector = h.connector.clone();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    h.session.once(EventKind::Connect, move |_| {
        *sink.lock().unwrap() = connector.last_link().sent_types();
    });

    h.session.connect().await.unwrap();
    assert_eq!(*seen.lock().unwrap(), ["AUTHENTICATE", "M1"]);
}

// Scenario D

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_attempts() {
    let h = Harness::new();
    h.connector.fail_next_connects(u32::MAX);

    assert!(h.session.connect().await.is_err());
    sleep(Duration::from_secs(600)).await;

    assert_eq!(h.reconnection_attempts(), (1..=10).collect::<Vec<_>>());
    assert_eq!(
        h.count(|e| *e == SessionEvent::MaxReconnectAttempts { attempts: 10 }),
        1
    );
    assert_eq!(h.connector.connect_count(), 11);
    assert_eq!(h.session.state(), ConnectionState::Disconnected);

    sleep(Duration::from_secs(600)).await;
    assert_eq!(h.connector.connect_count(), 11);
}

#[tokio::test(start_paused = true)]
async fn connect_after_giving_up_starts_again() {
    let mut config = SessionConfig::default();
    config.backoff.max_attempts = 2;
    let h = Harness::with_config(config);
    h.connector.fail_next_connects(3);

    assert!(h.session.connect().await.is_err());
    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.session.state(), ConnectionState::Disconnected);
    assert_eq!(h.connector.connect_count(), 3);

    h.session.connect().await.unwrap();
    assert!(h.session.is_connected());
    assert_eq!(h.session.reconnect_attempt(), 0);
}

#[tokio::test(start_paused = true)]
async fn waiting_connect_learns_schedule_is_spent() {
    let mut config = SessionConfig::default();
    config.backoff.max_attempts = 1;
    let h = Harness::with_config(config);
    h.connector.fail_next_connects(u32::MAX);

    let first = h.session.connect().await.unwrap_err();
    assert!(first.is_transient());
    assert_eq!(h.session.state(), ConnectionState::Reconnecting);

    let second = h.session.connect().await.unwrap_err();
    assert_eq!(second, SessionError::MaxReconnectAttemptsExceeded(1));
    assert!(!second.is_transient());
    assert_eq!(h.session.state(), ConnectionState::Disconnected);
    assert_eq!(h.connector.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn connect_after_giving_up_gets_full_schedule_when_failing() {
    let mut config = SessionConfig::default();
    config.backoff.max_attempts = 2;
    let h = Harness::with_config(config);
    h.connector.fail_next_connects(u32::MAX);

    assert!(h.session.connect().await.is_err());
    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.connect_count(), 3);
    assert_eq!(h.session.reconnect_attempt(), 2);

    let err = h.session.connect().await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(h.session.state(), ConnectionState::Reconnecting);
    assert_eq!(h.session.reconnect_attempt(), 1);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.connect_count(), 6);
    assert_eq!(h.reconnection_attempts(), [1, 2, 1, 2]);
    assert_eq!(
        h.count(|e| matches!(e, SessionEvent::MaxReconnectAttempts { .. })),
        2
    );
}

// Closes

#[tokio::test(start_paused = true)]
async fn every_abnormal_close_schedules_reconnect() {
    for code in [1001u16, 1006, 1011, 4001, 4004, 4999] {
        let h = Harness::connected().await;
        h.connector.last_link().close_from_server(code, "gone");
        settle().await;

        assert_eq!(h.session.state(), ConnectionState::Reconnecting, "code {}", code);
        assert_eq!(h.reconnection_attempts(), [1], "code {}", code);
        assert!(h
            .errors()
            .contains(&SessionError::Transport {
                code,
                reason: "gone".into()
            }));
    }
}

#[tokio::test(start_paused = true)]
async fn normal_close_does_not_reconnect() {
    let h = Harness::connected().await;
    h.connector.last_link().close_from_server(close_code::NORMAL, "bye");
    settle().await;

    assert_eq!(h.session.state(), ConnectionState::Disconnected);
    assert!(h.reconnection_attempts().is_empty());
    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.connector.connect_count(), 1);
}

// Heartbeat

#[tokio::test(start_paused = true)]
async fn heartbeat_pings_and_pongs_keep_connection() {
    let h = Harness::connected().await;
    let link = h.connector.last_link();

    for round in 1..=4 {
        sleep(Duration::from_secs(15)).await;
        settle().await;
        let pings = link.sent_of(MessageType::Ping);
        assert_eq!(pings.len(), round);
        let last = pings.last().unwrap();
        link.push(WebSocketMessage::pong(last.id.clone(), "store-42"));
        settle().await;
    }
    assert!(h.session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn missed_pongs_leave_connected_exactly_once() {
    let h = Harness::connected().await;
    let link = h.connector.last_link();

    // pings at 15s, 30s, 45s; the third pong timeout fires at 50s
    sleep(Duration::from_millis(49_000)).await;
    assert!(h.session.is_connected());
    assert_eq!(link.sent_of(MessageType::Ping).len(), 3);

    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(h.session.state(), ConnectionState::Reconnecting);
    assert_eq!(link.close_code(), Some(close_code::HEARTBEAT_TIMEOUT));
    assert!(h.errors().contains(&SessionError::HeartbeatTimeout(3)));
    assert_eq!(
        h.count(|e| matches!(
            e,
            SessionEvent::StateChange {
                from: ConnectionState::Connected,
                ..
            }
        )),
        1
    );
    assert_eq!(h.count(|e| matches!(e, SessionEvent::Disconnect { .. })), 1);
}

#[tokio::test(start_paused = true)]
async fn pong_resets_missed_count() {
    let h = Harness::connected().await;
    let link = h.connector.last_link();

    // two misses, then a pong, then two more misses: never reaches three
    sleep(Duration::from_secs(36)).await;
    link.push(WebSocketMessage::pong("late", "store-42"));
    settle().await;
    sleep(Duration::from_secs(30)).await;
    assert!(h.session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn server_ping_is_answered() {
    let h = Harness::connected().await;
    let link = h.connector.last_link();
    let ping = WebSocketMessage::ping("store-42");
    link.push(ping.clone());
    settle().await;

    let pongs = link.sent_of(MessageType::Pong);
    assert_eq!(pongs.len(), 1);
    let payload: PongPayload = pongs[0].payload().unwrap();
    assert_eq!(payload.ping_id, ping.id);
}

// Authentication

#[tokio::test(start_paused = true)]
async fn token_expiry_reauths_on_same_transport() {
    let h = Harness::connected().await;
    h.tokens.queue_refresh("tok-2");
    let link = h.connector.last_link();
    let before = h.events().len();

    link.push(WebSocketMessage::token_expired(60, "store-42"));
    settle().await;

    assert!(h.session.is_connected());
    assert_eq!(h.connector.connect_count(), 1);
    let reauths = link.sent_of(MessageType::Reauth);
    assert_eq!(reauths.len(), 1);
    let payload: ReauthPayload = reauths[0].payload().unwrap();
    assert_eq!(payload.token.expose(), "tok-2");
    assert!(h.events()[before..]
        .iter()
        .all(|e| !matches!(e, SessionEvent::StateChange { .. })));
}

#[tokio::test(start_paused = true)]
async fn token_expiry_refresh_failure_keeps_connection() {
    let h = Harness::connected().await;
    h.tokens.fail_refresh(true);
    h.connector
        .last_link()
        .push(WebSocketMessage::token_expired(30, "store-42"));
    settle().await;

    assert!(h.session.is_connected());
    assert!(h
        .errors()
        .iter()
        .any(|e| matches!(e, SessionError::TokenRefresh(_))));
}

#[tokio::test(start_paused = true)]
async fn provider_refresh_is_forwarded_as_reauth() {
    let h = Harness::connected().await;
    h.tokens.publish_refresh("tok-3");
    settle().await;

    let reauths = h.connector.last_link().sent_of(MessageType::Reauth);
    assert_eq!(reauths.len(), 1);
    let payload: ReauthPayload = reauths[0].payload().unwrap();
    assert_eq!(payload.token.expose(), "tok-3");
}

#[tokio::test(start_paused = true)]
async fn auth_error_refreshes_token_and_reconnects() {
    let h = Harness::new();
    h.connector.auto_authenticate(false);
    h.tokens.queue_refresh("tok-2");

    h.kick_connect().await;
    let first = h.connector.last_link();
    first.push(WebSocketMessage::auth_error("expired", "store-42"));
    settle().await;

    assert_eq!(first.close_code(), Some(close_code::AUTH_FAILED));
    assert_eq!(h.tokens.refresh_count(), 1);
    assert_eq!(h.connector.connect_count(), 2);

    let second = h.connector.last_link();
    let payload = authenticate_payload(&second.sent()[0]);
    assert_eq!(payload.token.expose(), "tok-2");

    second.push(WebSocketMessage::authenticated("store-42"));
    settle().await;
    assert!(h.session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn second_auth_error_is_surfaced_without_another_refresh() {
    let h = Harness::new();
    h.connector.auto_authenticate(false);

    h.kick_connect().await;
    h.connector
        .last_link()
        .push(WebSocketMessage::auth_error("bad token", "store-42"));
    settle().await;
    h.connector
        .last_link()
        .push(WebSocketMessage::auth_error("still bad", "store-42"));
    settle().await;

    assert_eq!(h.session.state(), ConnectionState::Disconnected);
    assert_eq!(h.tokens.refresh_count(), 1);
    assert!(h
        .errors()
        .contains(&SessionError::Auth("still bad".to_string())));

    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.connector.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_after_auth_error_disconnects() {
    let h = Harness::new();
    h.connector.auto_authenticate(false);
    h.tokens.fail_refresh(true);

    h.kick_connect().await;
    h.connector
        .last_link()
        .push(WebSocketMessage::auth_error("expired", "store-42"));
    settle().await;

    assert_eq!(h.session.state(), ConnectionState::Disconnected);
    assert!(h
        .errors()
        .iter()
        .any(|e| matches!(e, SessionError::Auth(reason) if reason.contains("refresh"))));
    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.connector.connect_count(), 1);
}

/// Hands out a cached token until it is forced to refresh.
#[derive(Default)]
struct CachingTokenProvider {
    refreshed: Mutex<bool>,
}

impl TokenProvider for CachingTokenProvider {
    fn token_with_refresh(&self) -> BoxFuture<'_, Result<AuthToken, TokenError>> {
        Box::pin(async { Ok(AuthToken::new("cached")) })
    }

    fn force_refresh(&self) -> BoxFuture<'_, Result<AuthToken, TokenError>> {
        Box::pin(async move {
            *self.refreshed.lock().unwrap() = true;
            Ok(AuthToken::new("fresh"))
        })
    }
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_auth_error_uses_refreshed_token() {
    let connector = MockConnector::new();
    let tokens = Arc::new(CachingTokenProvider::default());
    let identity = Arc::new(StaticIdentityStore::new(
        Identity::new("user-1", "store-42").unwrap(),
    ));
    let session = SessionBuilder::new(SessionConfig::default(), tokens.clone(), identity)
        .connector(connector.clone())
        .spawn()
        .unwrap();

    let _ = timeout(Duration::from_millis(1), session.connect()).await;
    let first = connector.last_link();
    assert_eq!(authenticate_payload(&first.sent()[0]).token.expose(), "cached");
    first.push(WebSocketMessage::auth_error("expired", "store-42"));
    settle().await;

    assert!(*tokens.refreshed.lock().unwrap());
    assert_eq!(connector.connect_count(), 2);
    let second = connector.last_link();
    assert_eq!(authenticate_payload(&second.sent()[0]).token.expose(), "fresh");
}

// Disconnect and network

#[tokio::test(start_paused = true)]
async fn disconnect_closes_normally_and_unsubscribes() {
    let h = Harness::connected().await;
    assert_eq!(h.network.subscriber_count(), 1);
    assert_eq!(h.tokens.subscriber_count(), 1);

    h.session.disconnect();
    settle().await;

    assert_eq!(h.connector.last_link().close_code(), Some(close_code::NORMAL));
    assert_eq!(h.session.state(), ConnectionState::Disconnected);
    assert_eq!(h.session.reconnect_attempt(), 0);
    assert_eq!(h.network.subscriber_count(), 0);
    assert_eq!(h.tokens.subscriber_count(), 0);

    h.network.set_online();
    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_retry() {
    let h = Harness::new();
    h.connector.fail_next_connects(1);
    assert!(h.session.connect().await.is_err());
    assert_eq!(h.session.state(), ConnectionState::Reconnecting);

    h.session.disconnect();
    settle().await;
    assert_eq!(h.session.state(), ConnectionState::Disconnected);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_connect_cancels_attempt() {
    let h = Harness::new();
    h.connector.hang_connects(true);
    let (reply, _) = tokio::join!(h.session.connect(), async {
        settle().await;
        h.session.disconnect();
    });

    assert_eq!(reply.unwrap_err(), SessionError::Cancelled);
    assert_eq!(h.session.state(), ConnectionState::Disconnected);
    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn network_loss_tears_down_and_restore_reconnects() {
    let h = Harness::connected().await;

    h.network.set_offline();
    settle().await;
    assert_eq!(h.session.state(), ConnectionState::Disconnected);
    assert_eq!(
        h.connector.last_link().close_code(),
        Some(close_code::GOING_AWAY)
    );

    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.connector.connect_count(), 1);

    h.network.set_online();
    settle().await;
    assert!(h.session.is_connected());
    assert_eq!(h.connector.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn network_restore_after_giving_up_retries() {
    let mut config = SessionConfig::default();
    config.backoff.max_attempts = 1;
    let h = Harness::with_config(config);
    h.connector.fail_next_connects(2);

    assert!(h.session.connect().await.is_err());
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.session.state(), ConnectionState::Disconnected);

    h.network.set_online();
    settle().await;
    assert!(h.session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn network_restore_after_giving_up_restarts_schedule() {
    let mut config = SessionConfig::default();
    config.backoff.max_attempts = 1;
    let h = Harness::with_config(config);
    h.connector.fail_next_connects(u32::MAX);

    assert!(h.session.connect().await.is_err());
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.connector.connect_count(), 2);

    h.network.set_online();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.connector.connect_count(), 4);
    assert_eq!(h.reconnection_attempts(), [1, 1]);
    assert_eq!(h.session.state(), ConnectionState::Disconnected);
}

// Sending

#[tokio::test(start_paused = true)]
async fn queue_overflow_drops_oldest() {
    let mut config = SessionConfig::default();
    config.queue.max_size = 3;
    let h = Harness::with_config(config);

    for n in 1..=5 {
        let draft = MessageDraft::new(format!("M{}", n));
        assert_eq!(h.session.send(draft).await.unwrap(), SendOutcome::Queued);
    }
    assert_eq!(h.session.queued_messages(), 3);
    assert_eq!(
        h.count(|e| matches!(
            e,
            SessionEvent::Error(SessionError::QueueOverflow { capacity: 3, .. })
        )),
        2
    );

    h.session.connect().await.unwrap();
    assert_eq!(
        h.connector.last_link().sent_types(),
        ["AUTHENTICATE", "M3", "M4", "M5"]
    );
}

#[tokio::test(start_paused = true)]
async fn send_failure_requeues_and_reconnects() {
    let h = Harness::connected().await;
    let link = h.connector.last_link();
    link.fail_sends(true);

    let draft = MessageDraft::new("ORDER_UPDATED").with_id("order-1");
    assert_eq!(h.session.send(draft).await.unwrap(), SendOutcome::Queued);
    assert_eq!(h.session.state(), ConnectionState::Reconnecting);
    assert_eq!(link.close_code(), Some(close_code::SEND_FAILED));

    sleep(Duration::from_secs(2)).await;
    let retry = h.connector.last_link();
    assert_eq!(retry.sent_types(), ["AUTHENTICATE", "ORDER_UPDATED"]);
    assert_eq!(retry.sent()[1].id, "order-1");
}

#[tokio::test(start_paused = true)]
async fn protocol_types_cannot_be_sent() {
    let h = Harness::connected().await;
    for kind in ["PING", "AUTHENTICATE", "REAUTH"] {
        let err = h.session.send(MessageDraft::new(kind)).await.unwrap_err();
        assert!(matches!(err, SessionError::ReservedType(_)));
    }
    assert_eq!(h.connector.last_link().sent().len(), 1);
}

// Inbound routing

#[tokio::test(start_paused = true)]
async fn business_messages_reach_subscribers_verbatim() {
    let h = Harness::connected().await;
    let orders = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&orders);
    h.session.on(EventKind::message("ORDER_UPDATED"), move |event| {
        if let SessionEvent::Message(msg) = event {
            sink.lock().unwrap().push(msg.clone());
        }
    });

    let link = h.connector.last_link();
    let order = WebSocketMessage::new("ORDER_UPDATED", Some(json!({"id": 7})), "store-42");
    link.push(order.clone());
    link.push(WebSocketMessage::new("MENU_SYNC", None, "store-42"));
    settle().await;

    assert_eq!(*orders.lock().unwrap(), vec![order]);
    assert_eq!(h.count(|e| matches!(e, SessionEvent::Message(_))), 2);
}

#[tokio::test(start_paused = true)]
async fn protocol_and_reserved_frames_are_not_forwarded() {
    let h = Harness::connected().await;
    let link = h.connector.last_link();
    link.push(WebSocketMessage::new("reconnection_status", None, "store-42"));
    link.push(WebSocketMessage::new(MessageType::Connect, None, "store-42"));
    link.push(WebSocketMessage::authenticated("store-42"));
    settle().await;

    assert_eq!(h.count(|e| matches!(e, SessionEvent::Message(_))), 0);
    assert!(h.session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn server_error_is_reported_without_state_change() {
    let h = Harness::connected().await;
    h.connector
        .last_link()
        .push(WebSocketMessage::error("scope locked", "store-42"));
    settle().await;

    assert!(h.session.is_connected());
    assert!(h
        .errors()
        .contains(&SessionError::Server("scope locked".to_string())));
}

#[tokio::test(start_paused = true)]
async fn panicking_listener_does_not_break_session() {
    let h = Harness::new();
    h.session.on(EventKind::Connect, |_| {
        panic!("listener bug");
    });

    h.session.connect().await.unwrap();
    assert!(h.session.is_connected());
    assert_eq!(h.count(|e| *e == SessionEvent::Connect), 1);
}

// Lifecycle

#[tokio::test(start_paused = true)]
async fn dispose_closes_transport() {
    let h = Harness::connected().await;
    let link = h.connector.last_link();
    h.session.dispose().await;
    assert_eq!(link.close_code(), Some(close_code::NORMAL));
}

#[tokio::test(start_paused = true)]
async fn sessions_are_independent() {
    let a = Harness::connected().await;
    let b = Harness::new();
    assert!(a.session.is_connected());
    assert_eq!(b.session.state(), ConnectionState::Disconnected);
    assert_eq!(b.connector.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn status_reports_attempt() {
    let h = Harness::new();
    h.connector.fail_next_connects(1);
    assert!(h.session.connect().await.is_err());
    assert_eq!(h.session.status(), "reconnecting (attempt 1)");
}

#[tokio::test]
async fn pong_timeout_must_fit_inside_interval() {
    let mut config = SessionConfig::default();
    config.heartbeat.interval_ms = 5_000;
    config.heartbeat.pong_timeout_ms = 5_000;
    let result = SessionBuilder::new(
        config,
        Arc::new(StaticTokenProvider::new("tok-1")),
        Arc::new(StaticIdentityStore::empty()),
    )
    .spawn();
    assert!(result.is_err());
}
