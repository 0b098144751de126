// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Public session handle and builder.

use std::sync::Arc;

use pl_core::{MessageType, WebSocketMessage};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::collaborators::{IdentityStore, NetworkObserver, TokenProvider};
use super::events::{EventBus, EventKind, ListenerId, SessionEvent};
use super::manager::ConnectionManager;
use super::state::{ConnectionState, SharedConnectionState};
use super::transport::{Connector, WebSocketConnector};
use crate::config::{ConfigResult, SessionConfig};
use crate::error::{SessionError, SessionResult};

/// A business message to send. Unset fields are filled in by the session.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    pub kind: MessageType,
    pub data: Option<Value>,
    /// Defaults to the session's scope.
    pub scope: Option<String>,
    /// Defaults to a fresh id; set it to resend a message idempotently.
    pub id: Option<String>,
}

impl MessageDraft {
    pub fn new(kind: impl Into<MessageType>) -> Self {
        MessageDraft {
            kind: kind.into(),
            data: None,
            scope: None,
            id: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl From<WebSocketMessage> for MessageDraft {
    fn from(msg: WebSocketMessage) -> Self {
        MessageDraft {
            kind: msg.kind,
            data: msg.data,
            scope: Some(msg.scope).filter(|s| !s.is_empty()),
            id: Some(msg.id).filter(|id| !id.is_empty()),
        }
    }
}

/// What happened to a sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the open transport.
    Sent,
    /// Buffered until the next authenticated connection.
    Queued,
}

/// Requests from handles to the driver task.
#[derive(Debug)]
pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Disconnect,
    Send {
        draft: MessageDraft,
        reply: oneshot::Sender<SessionResult<SendOutcome>>,
    },
    Shutdown,
}

/// Builder for a [`Session`].
pub struct SessionBuilder<C = WebSocketConnector> {
    config: SessionConfig,
    connector: C,
    tokens: Arc<dyn TokenProvider>,
    identity: Arc<dyn IdentityStore>,
    network: Option<Arc<dyn NetworkObserver>>,
}

impl SessionBuilder<WebSocketConnector> {
    pub fn new(
        config: SessionConfig,
        tokens: Arc<dyn TokenProvider>,
        identity: Arc<dyn IdentityStore>,
    ) -> Self {
        SessionBuilder {
            config,
            connector: WebSocketConnector,
            tokens,
            identity,
            network: None,
        }
    }
}

impl<C: Connector> SessionBuilder<C> {
    /// Replaces the transport factory.
    pub fn connector<D: Connector>(self, connector: D) -> SessionBuilder<D> {
        SessionBuilder {
            config: self.config,
            connector,
            tokens: self.tokens,
            identity: self.identity,
            network: self.network,
        }
    }

    /// Reconnect on network restore and tear down on network loss.
    pub fn network_observer(mut self, observer: Arc<dyn NetworkObserver>) -> Self {
        self.network = Some(observer);
        self
    }

    /// Validates the config and starts the driver task.
    ///
    /// Must be called from within a tokio runtime. The session starts
    /// `Disconnected`; nothing is opened until [`Session::connect`].
    pub fn spawn(self) -> ConfigResult<Session> {
        self.config.validate()?;

        let shared = Arc::new(SharedConnectionState::new());
        let events = EventBus::new();
        let (commands, command_rx) = mpsc::unbounded_channel();

        let manager = ConnectionManager::new(
            self.config,
            Arc::new(self.connector),
            self.tokens,
            self.identity,
            self.network,
            events.clone(),
            Arc::clone(&shared),
        );
        let task = tokio::spawn(manager.run(command_rx));

        Ok(Session {
            commands,
            shared,
            events,
            task,
        })
    }
}

/// Handle to a running session.
///
/// Each session is independent. Dropping the handle (or calling
/// [`Session::dispose`]) disconnects and stops the driver task.
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<SharedConnectionState>,
    events: EventBus,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.shared.get())
            .field("attempt", &self.shared.attempt())
            .field("queued", &self.shared.queued())
            .finish()
    }
}

impl Session {
    /// Starts connecting if disconnected.
    ///
    /// Resolves once the session is authenticated, or with the first error
    /// of the attempt (retries continue in the background). Calling it while
    /// an attempt or retry is already underway opens nothing new and waits
    /// for that attempt.
    pub async fn connect(&self) -> SessionResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect { reply })
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Closes the connection with code 1000 and stops retrying.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Sends now if connected, otherwise queues for the next connection.
    pub async fn send(&self, draft: impl Into<MessageDraft>) -> SessionResult<SendOutcome> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                draft: draft.into(),
                reply,
            })
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub fn on<F>(&self, key: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.on(key, listener)
    }

    pub fn once<F>(&self, key: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.once(key, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.events.off(id)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.get()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Retries scheduled since the last authenticated connection.
    pub fn reconnect_attempt(&self) -> u32 {
        self.shared.attempt()
    }

    /// Messages waiting for a connection.
    pub fn queued_messages(&self) -> usize {
        self.shared.queued()
    }

    /// Status line for display, e.g. `reconnecting (attempt 2)`.
    pub fn status(&self) -> String {
        self.shared.status_string()
    }

    /// Disconnects, drops all listeners and waits for the driver to exit.
    pub async fn dispose(self) {
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.task.await;
    }
}
