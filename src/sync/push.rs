use chrono::{DateTime, Utc};
use serde::Serialize;

use super::SyncEngine;
use crate::error::Result;
use crate::remote::{with_retry, RemoteSession};
use crate::sessions::SessionId;

/// A long-term row the remote did not accept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowFailure {
    pub content_hash: String,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushReport {
    pub server_id: String,
    pub session_id: String,
    pub turns: usize,
    pub last_updated: DateTime<Utc>,
    pub longterm_total: usize,
    pub longterm_pushed: usize,
    pub longterm_failed: usize,
    pub failures: Vec<RowFailure>,
}

impl PushReport {
    pub fn is_complete(&self) -> bool {
        self.longterm_failed == 0
    }
}

impl SyncEngine<'_> {
    /// Mirror the session, then every long-term entry of `server_id`.
    ///
    /// A failed session upsert aborts the push. Long-term rows are pushed one
    /// by one; a row that still fails after retries is recorded and the batch
    /// continues.
    pub async fn push(&self, session_id: &SessionId, server_id: &str) -> Result<PushReport> {
        let session = self.sessions.load(session_id).await?;
        let mut remote_session = RemoteSession::from_session(&session);
        remote_session.server_id = server_id.to_string();

        with_retry(self.retry, "upsert_session", || {
            self.remote.upsert_session(&remote_session)
        })
        .await?;
        tracing::info!(
            server_id,
            session_id = %session_id,
            turns = session.turns.len(),
            "Session pushed"
        );

        let entries = self.longterm.list(server_id);
        let longterm_total = entries.total();
        let mut pushed = 0usize;
        let mut failures = Vec::new();
        for entry in entries {
            let result = with_retry(self.retry, "upsert_longterm", || {
                self.remote.upsert_longterm(&entry)
            })
            .await;
            match result {
                Ok(()) => pushed += 1,
                Err(e) => {
                    tracing::warn!(
                        hash = %entry.content_hash.short(),
                        kind = e.kind(),
                        error = %e,
                        "Long-term row push failed"
                    );
                    failures.push(RowFailure {
                        content_hash: entry.content_hash.to_string(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            server_id,
            pushed,
            failed = failures.len(),
            "Long-term entries pushed"
        );
        Ok(PushReport {
            server_id: server_id.to_string(),
            session_id: session_id.to_string(),
            turns: session.turns.len(),
            last_updated: session.last_updated,
            longterm_total,
            longterm_pushed: pushed,
            longterm_failed: failures.len(),
            failures,
        })
    }
}
