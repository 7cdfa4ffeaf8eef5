use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::SyncEngine;
use crate::error::Result;
use crate::remote::with_retry;

/// Direction between the local and remote watermarks of one session.
/// Derived on demand; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCursor {
    LocalAhead,
    RemoteAhead,
    InSync,
    LocalOnly,
    RemoteOnly,
}

impl SyncCursor {
    /// `None` when neither side has the session.
    pub fn compare(local: Option<DateTime<Utc>>, remote: Option<DateTime<Utc>>) -> Option<Self> {
        match (local, remote) {
            (None, None) => None,
            (Some(_), None) => Some(Self::LocalOnly),
            (None, Some(_)) => Some(Self::RemoteOnly),
            (Some(l), Some(r)) if r > l => Some(Self::RemoteAhead),
            (Some(l), Some(r)) if l > r => Some(Self::LocalAhead),
            (Some(_), Some(_)) => Some(Self::InSync),
        }
    }

    /// Pull overwrites local only when the remote is strictly newer or local is absent.
    pub fn remote_wins(self) -> bool {
        matches!(self, Self::RemoteAhead | Self::RemoteOnly)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub local_last_updated: Option<DateTime<Utc>>,
    pub remote_last_updated: Option<DateTime<Utc>>,
    pub cursor: Option<SyncCursor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub server_id: String,
    pub remote: String,
    pub sessions: Vec<SessionStatus>,
    pub local_longterm: usize,
}

impl SyncEngine<'_> {
    /// Compare every local session with the `remote_limit` most recent remote ones.
    pub async fn status(&self, server_id: &str, remote_limit: usize) -> Result<SyncStatus> {
        let remote_rows = with_retry(self.retry, "list_sessions", || {
            self.remote.list_sessions(server_id, remote_limit)
        })
        .await?;

        let mut merged: BTreeMap<String, (Option<DateTime<Utc>>, Option<DateTime<Utc>>)> =
            BTreeMap::new();
        for id in self.sessions.list().await? {
            match self.sessions.load(&id).await {
                Ok(session) if session.server_id == server_id => {
                    merged.entry(id.to_string()).or_default().0 = Some(session.last_updated);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Skipping unreadable session in status");
                }
            }
        }
        for row in remote_rows {
            merged.entry(row.session_id).or_default().1 = Some(row.last_updated);
        }

        let sessions = merged
            .into_iter()
            .map(|(session_id, (local, remote))| SessionStatus {
                session_id,
                local_last_updated: local,
                remote_last_updated: remote,
                cursor: SyncCursor::compare(local, remote),
            })
            .collect();

        Ok(SyncStatus {
            server_id: server_id.to_string(),
            remote: self.remote.name().to_string(),
            sessions,
            local_longterm: self.longterm.count(Some(server_id)),
        })
    }
}
