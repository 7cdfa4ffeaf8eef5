use chrono::{DateTime, Utc};
use serde::Serialize;

use super::cursor::SyncCursor;
use super::push::RowFailure;
use super::SyncEngine;
use crate::error::{MemoraError, Result};
use crate::memory::MergeOutcome;
use crate::remote::with_retry;
use crate::sessions::SessionId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionPullOutcome {
    /// Local content was replaced by the newer remote copy.
    Restored {
        turns: usize,
        last_updated: DateTime<Utc>,
    },
    /// Local is at least as new as the remote.
    UpToDate,
    /// No remote row for this session.
    RemoteMissing,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LongTermPullSummary {
    pub received: usize,
    pub inserted: usize,
    pub refreshed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub failures: Vec<RowFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PullReport {
    pub server_id: String,
    pub session_id: String,
    /// Direction observed before anything was written.
    pub cursor: Option<SyncCursor>,
    pub session: SessionPullOutcome,
    pub longterm: LongTermPullSummary,
}

impl SyncEngine<'_> {
    /// Restore a session if the remote copy is strictly newer, then union the
    /// server's long-term entries into the local store.
    pub async fn pull(&self, session_id: &SessionId, server_id: &str) -> Result<PullReport> {
        let remote = with_retry(self.retry, "fetch_session", || {
            self.remote.fetch_session(server_id, session_id.as_str())
        })
        .await?;
        let local = match self.sessions.load(session_id).await {
            Ok(session) => Some(session),
            Err(MemoraError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let cursor = SyncCursor::compare(
            local.as_ref().map(|s| s.last_updated),
            remote.as_ref().map(|s| s.last_updated),
        );
        let session = match remote {
            None => {
                tracing::warn!(server_id, session_id = %session_id, "Remote session not found");
                SessionPullOutcome::RemoteMissing
            }
            Some(remote) if cursor.is_some_and(SyncCursor::remote_wins) => {
                let restored = self
                    .sessions
                    .replace(session_id, remote.into_replacement())
                    .await?;
                tracing::info!(
                    server_id,
                    session_id = %session_id,
                    turns = restored.turns.len(),
                    "Session restored from remote"
                );
                SessionPullOutcome::Restored {
                    turns: restored.turns.len(),
                    last_updated: restored.last_updated,
                }
            }
            Some(_) => {
                tracing::info!(session_id = %session_id, "Local session is up to date");
                SessionPullOutcome::UpToDate
            }
        };

        let rows = with_retry(self.retry, "list_longterm", || {
            self.remote.list_longterm(server_id, None)
        })
        .await?;
        let outcomes = self.longterm.merge_remote(server_id, &rows).await?;

        let mut longterm = LongTermPullSummary {
            received: rows.len(),
            ..LongTermPullSummary::default()
        };
        for (hash, outcome) in outcomes {
            match outcome {
                MergeOutcome::Inserted => longterm.inserted += 1,
                MergeOutcome::Refreshed => longterm.refreshed += 1,
                MergeOutcome::Unchanged => longterm.unchanged += 1,
                MergeOutcome::Rejected(reason) => {
                    tracing::warn!(hash = %hash, reason = %reason, "Remote long-term row rejected");
                    longterm.failed += 1;
                    longterm.failures.push(RowFailure {
                        content_hash: hash,
                        kind: "RemoteRejected",
                        message: reason,
                    });
                }
            }
        }

        Ok(PullReport {
            server_id: server_id.to_string(),
            session_id: session_id.to_string(),
            cursor,
            session,
            longterm,
        })
    }
}
