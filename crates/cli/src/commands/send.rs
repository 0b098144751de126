// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use pl_core::protocol::new_message_id;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cli::ConnectArgs;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::session::{MessageDraft, Session};

use super::open_session;

/// Send one business message, waiting until it is written to the server.
pub async fn run(
    config: SessionConfig,
    connect: ConnectArgs,
    kind: String,
    data: Option<String>,
    id: Option<String>,
    timeout_secs: u64,
) -> Result<()> {
    let draft = build_draft(&kind, data.as_deref(), id)?;
    let id = draft.id.clone().unwrap_or_default();
    let session = open_session(config, &connect)?;

    let result = deliver(&session, draft, Duration::from_secs(timeout_secs)).await;
    session.dispose().await;
    result?;
    println!("{}", id);
    Ok(())
}

pub(crate) fn build_draft(kind: &str, data: Option<&str>, id: Option<String>) -> Result<MessageDraft> {
    let mut draft = MessageDraft::new(kind).with_id(id.unwrap_or_else(new_message_id));
    if let Some(data) = data {
        let value: Value = serde_json::from_str(data)?;
        draft = draft.with_data(value);
    }
    Ok(draft)
}

/// Queues the draft, then connects until the queue has been flushed.
pub(crate) async fn deliver(session: &Session, draft: MessageDraft, wait: Duration) -> Result<()> {
    let outcome = session.send(draft).await?;
    debug!(?outcome, "message accepted");

    let connected = tokio::time::timeout(wait, async {
        loop {
            match session.connect().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => warn!(error = %e, "connection attempt failed"),
                Err(e) => return Err(e),
            }
        }
    })
    .await
    .map_err(|_| Error::SendTimeout(wait))?;
    connected?;

    if session.queued_messages() > 0 {
        return Err(Error::SendTimeout(wait));
    }
    Ok(())
}

#[cfg(test)]
#[path = "send_tests.rs"]
mod tests;
