// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashSet;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::{ConnectArgs, OutputFormat};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::session::{EventKind, SessionEvent};

use super::open_session;

const LIFECYCLE: [EventKind; 6] = [
    EventKind::Connect,
    EventKind::Disconnect,
    EventKind::Error,
    EventKind::ReconnectionStatus,
    EventKind::MaxReconnectAttempts,
    EventKind::StateChange,
];

/// Connect and print events until interrupted or the session gives up.
pub async fn run(
    config: SessionConfig,
    connect: ConnectArgs,
    types: Vec<String>,
    output: OutputFormat,
) -> Result<()> {
    let session = open_session(config, &connect)?;
    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel::<SessionError>();

    for kind in LIFECYCLE {
        let stop_tx = stop_tx.clone();
        session.on(kind, move |event| {
            println!("{}", format_event(event, output));
            if let Some(err) = terminal_error(event) {
                let _ = stop_tx.send(err);
            }
        });
    }
    let filter: HashSet<String> = types.into_iter().collect();
    session.on(EventKind::AnyMessage, move |event| {
        if let SessionEvent::Message(msg) = event {
            if filter.is_empty() || filter.contains(msg.kind.as_str()) {
                println!("{}", format_event(event, output));
            }
        }
    });

    if let Err(e) = session.connect().await {
        warn!(error = %e, "first connection attempt failed, retrying in background");
    }

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
        Some(err) = stop_rx.recv() => Err(err.into()),
    };
    session.dispose().await;
    outcome
}

/// Events after which the session will not recover on its own.
fn terminal_error(event: &SessionEvent) -> Option<SessionError> {
    match event {
        SessionEvent::MaxReconnectAttempts { attempts } => {
            Some(SessionError::MaxReconnectAttemptsExceeded(*attempts))
        }
        SessionEvent::Error(err @ SessionError::Auth(_)) => Some(err.clone()),
        _ => None,
    }
}

/// One line of output for an event.
pub(crate) fn format_event(event: &SessionEvent, output: OutputFormat) -> String {
    match output {
        OutputFormat::Text => format_text(event),
        OutputFormat::Json => format_json(event).to_string(),
    }
}

fn format_text(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Connect => "connected".to_string(),
        SessionEvent::Disconnect { code, reason } if reason.is_empty() => {
            format!("disconnected (code {})", code)
        }
        SessionEvent::Disconnect { code, reason } => {
            format!("disconnected (code {}): {}", code, reason)
        }
        SessionEvent::Error(err) => {
            // first line only, without the hint
            let first = err.to_string();
            format!("error: {}", first.lines().next().unwrap_or_default())
        }
        SessionEvent::ReconnectionStatus { attempt, delay } => format!(
            "reconnecting in {:.1}s (attempt {})",
            delay.as_secs_f64(),
            attempt
        ),
        SessionEvent::MaxReconnectAttempts { attempts } => {
            format!("gave up after {} reconnect attempts", attempts)
        }
        SessionEvent::StateChange { from, to } => format!("state: {} -> {}", from, to),
        SessionEvent::Message(msg) => match &msg.data {
            Some(data) => format!("{} {} {}", msg.kind, msg.id, data),
            None => format!("{} {}", msg.kind, msg.id),
        },
    }
}

fn format_json(event: &SessionEvent) -> serde_json::Value {
    let name = event.kind().name().to_string();
    match event {
        SessionEvent::Connect => json!({ "event": name }),
        SessionEvent::Disconnect { code, reason } => {
            json!({ "event": name, "code": code, "reason": reason })
        }
        SessionEvent::Error(err) => json!({ "event": name, "message": err.to_string() }),
        SessionEvent::ReconnectionStatus { attempt, delay } => json!({
            "event": name,
            "attempt": attempt,
            "delayMs": delay.as_millis() as u64,
        }),
        SessionEvent::MaxReconnectAttempts { attempts } => {
            json!({ "event": name, "attempts": attempts })
        }
        SessionEvent::StateChange { from, to } => json!({
            "event": name,
            "from": from.as_str(),
            "to": to.as_str(),
        }),
        SessionEvent::Message(msg) => json!({ "event": "message", "message": msg }),
    }
}

#[cfg(test)]
#[path = "listen_tests.rs"]
mod tests;
