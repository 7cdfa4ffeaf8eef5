//! Remote mirror of sessions and long-term entries.
//!
//! [`RemoteStore`] is the seam the synchronizers talk to. The PostgREST
//! client lives in [`supabase`]; [`in_memory`] is a fake with the same
//! conflict rules used by tests.

pub mod in_memory;
pub mod retry;
pub mod supabase;
pub mod wire;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::error::{MemoraError, Result};
use crate::memory::{LongTermEntry, LongTermRow};
use crate::sessions::{Session, SessionReplacement, Turn};

pub use in_memory::InMemoryRemote;
pub use retry::{with_retry, RetryPolicy};
pub use supabase::SupabaseRemote;

/// A session as mirrored remotely.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSession {
    pub server_id: String,
    pub session_id: String,
    pub turns: Vec<Turn>,
    pub summary: String,
    pub summarized_through: usize,
    pub state: serde_json::Value,
    pub created_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl RemoteSession {
    /// Mirror of a local session; the watermark is the local `last_updated`.
    pub fn from_session(session: &Session) -> Self {
        Self {
            server_id: session.server_id.clone(),
            session_id: session.session_id.to_string(),
            turns: session.turns.clone(),
            summary: session.summary.clone(),
            summarized_through: session.summarized_through,
            state: session.state.clone(),
            created_at: Some(session.created_at),
            last_updated: session.last_updated,
        }
    }

    pub fn into_replacement(self) -> SessionReplacement {
        SessionReplacement {
            server_id: self.server_id,
            turns: self.turns,
            summary: self.summary,
            summarized_through: self.summarized_through,
            state: self.state,
            created_at: self.created_at,
            last_updated: self.last_updated,
        }
    }
}

/// One row of `backup status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteSessionInfo {
    pub session_id: String,
    pub last_updated: DateTime<Utc>,
}

/// Idempotent operations against the remote mirror.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert or overwrite the `(server_id, session_id)` row.
    async fn upsert_session(&self, session: &RemoteSession) -> Result<()>;

    /// Insert the entry if its hash is absent; otherwise refresh metadata and
    /// `updated_at` only. Text is never overwritten.
    async fn upsert_longterm(&self, entry: &LongTermEntry) -> Result<()>;

    async fn fetch_session(
        &self,
        server_id: &str,
        session_id: &str,
    ) -> Result<Option<RemoteSession>>;

    /// All rows of a server, `updated_at` descending, optionally only newer than `since`.
    async fn list_longterm(
        &self,
        server_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LongTermRow>>;

    /// Most recently updated sessions of a server.
    async fn list_sessions(&self, server_id: &str, limit: usize) -> Result<Vec<RemoteSessionInfo>>;

    fn name(&self) -> &str;
}

/// Build the configured remote client, failing with the missing settings listed.
pub fn create_remote_store(config: &Config) -> Result<Box<dyn RemoteStore>> {
    let missing = config.remote.missing_settings();
    if !missing.is_empty() {
        return Err(MemoraError::InvalidInput(format!(
            "missing required remote settings: {}",
            missing.join(", ")
        )));
    }
    Ok(Box::new(SupabaseRemote::from_config(&config.remote)?))
}
