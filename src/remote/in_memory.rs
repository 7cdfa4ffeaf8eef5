//! In-memory remote store with the same conflict rules as the real tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};

use super::wire::{self, SessionRow};
use super::{RemoteSession, RemoteSessionInfo, RemoteStore};
use crate::error::{MemoraError, Result};
use crate::memory::{LongTermEntry, LongTermRow};

#[derive(Debug, Clone)]
struct StoredEntry {
    text: String,
    metadata: Map<String, Value>,
    updated_at: DateTime<Utc>,
}

/// A remote backed by mutex-protected maps. Sessions are kept in their wire
/// form so the codec is exercised on every round trip.
#[derive(Default)]
pub struct InMemoryRemote {
    sessions: Mutex<HashMap<(String, String), SessionRow>>,
    longterm: Mutex<HashMap<(String, String), StoredEntry>>,
    faults: Mutex<VecDeque<MemoraError>>,
    rejected_hashes: Mutex<HashSet<String>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next calls (of any operation) fail with these errors, in order.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = MemoraError>) {
        self.faults.lock().extend(errors);
    }

    /// Every upsert of this hash is rejected.
    pub fn reject_hash(&self, hash: &str) {
        self.rejected_hashes.lock().insert(hash.to_string());
    }

    /// How many times `op` was called, failures included.
    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().get(op).copied().unwrap_or(0)
    }

    pub fn session_row(&self, server_id: &str, session_id: &str) -> Option<SessionRow> {
        self.sessions
            .lock()
            .get(&(server_id.to_string(), session_id.to_string()))
            .cloned()
    }

    /// Write a raw row, as another machine or a manual edit would.
    pub fn put_session_row(&self, row: SessionRow) {
        self.sessions
            .lock()
            .insert((row.server_id.clone(), row.session_id.clone()), row);
    }

    /// Seed a long-term row, as if another machine had pushed it.
    pub fn put_longterm_row(&self, server_id: &str, row: LongTermRow) {
        self.longterm.lock().insert(
            (server_id.to_string(), row.content_hash),
            StoredEntry {
                text: row.text,
                metadata: crate::memory::normalize_metadata(row.metadata),
                updated_at: row.updated_at,
            },
        );
    }

    pub fn longterm_count(&self, server_id: &str) -> usize {
        self.longterm
            .lock()
            .keys()
            .filter(|(s, _)| s == server_id)
            .count()
    }

    fn enter(&self, op: &'static str) -> Result<()> {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        match self.faults.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn upsert_session(&self, session: &RemoteSession) -> Result<()> {
        self.enter("upsert_session")?;
        let row = wire::encode_session(session);
        self.put_session_row(row);
        Ok(())
    }

    async fn upsert_longterm(&self, entry: &LongTermEntry) -> Result<()> {
        self.enter("upsert_longterm")?;
        if self
            .rejected_hashes
            .lock()
            .contains(entry.content_hash.as_str())
        {
            return Err(MemoraError::RemoteRejected(format!(
                "row {} violates a table constraint",
                entry.content_hash.short()
            )));
        }
        let key = (entry.server_id.clone(), entry.content_hash.to_string());
        let mut longterm = self.longterm.lock();
        match longterm.get_mut(&key) {
            // Existing rows keep their text; only metadata and updated_at change.
            Some(stored) => {
                stored.metadata = entry.metadata.clone();
                stored.updated_at = entry.updated_at;
            }
            None => {
                longterm.insert(
                    key,
                    StoredEntry {
                        text: entry.text.clone(),
                        metadata: entry.metadata.clone(),
                        updated_at: entry.updated_at,
                    },
                );
            }
        }
        Ok(())
    }

    async fn fetch_session(
        &self,
        server_id: &str,
        session_id: &str,
    ) -> Result<Option<RemoteSession>> {
        self.enter("fetch_session")?;
        self.session_row(server_id, session_id)
            .map(wire::decode_session)
            .transpose()
    }

    async fn list_longterm(
        &self,
        server_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LongTermRow>> {
        self.enter("list_longterm")?;
        let mut rows: Vec<LongTermRow> = self
            .longterm
            .lock()
            .iter()
            .filter(|((s, _), stored)| {
                s == server_id && since.map_or(true, |since| stored.updated_at > since)
            })
            .map(|((_, hash), stored)| LongTermRow {
                content_hash: hash.clone(),
                text: stored.text.clone(),
                metadata: Value::Object(stored.metadata.clone()),
                updated_at: stored.updated_at,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.content_hash.cmp(&b.content_hash))
        });
        Ok(rows)
    }

    async fn list_sessions(&self, server_id: &str, limit: usize) -> Result<Vec<RemoteSessionInfo>> {
        self.enter("list_sessions")?;
        let mut rows: Vec<RemoteSessionInfo> = self
            .sessions
            .lock()
            .values()
            .filter(|row| row.server_id == server_id)
            .map(|row| RemoteSessionInfo {
                session_id: row.session_id.clone(),
                last_updated: row.last_updated,
            })
            .collect();
        rows.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        rows.truncate(limit);
        Ok(rows)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::content_hash;
    use crate::sessions::{Role, Turn};

    fn entry(text: &str, metadata: Value) -> LongTermEntry {
        LongTermEntry {
            server_id: "srv".into(),
            content_hash: content_hash(text),
            text: text.into(),
            metadata: crate::memory::normalize_metadata(metadata),
            updated_at: crate::util::now(),
        }
    }

    #[tokio::test]
    async fn session_upsert_is_idempotent_and_overwrites() {
        let remote = InMemoryRemote::new();
        let mut session = RemoteSession {
            server_id: "srv".into(),
            session_id: "s1".into(),
            turns: vec![Turn::new(Role::User, "one")],
            summary: String::new(),
            summarized_through: 0,
            state: Value::Null,
            created_at: None,
            last_updated: crate::util::now(),
        };

        remote.upsert_session(&session).await.unwrap();
        remote.upsert_session(&session).await.unwrap();
        assert_eq!(remote.fetch_session("srv", "s1").await.unwrap(), Some(session.clone()));

        session.turns.push(Turn::new(Role::Assistant, "two"));
        remote.upsert_session(&session).await.unwrap();
        let fetched = remote.fetch_session("srv", "s1").await.unwrap().unwrap();
        assert_eq!(fetched.turns.len(), 2);
        assert_eq!(remote.list_sessions("srv", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn longterm_upsert_never_overwrites_text() {
        let remote = InMemoryRemote::new();
        remote.upsert_longterm(&entry("fact", Value::Null)).await.unwrap();

        let mut forged = entry("fact", serde_json::json!({"v": 2}));
        forged.text = "tampered".into();
        remote.upsert_longterm(&forged).await.unwrap();

        let rows = remote.list_longterm("srv", None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "fact");
        assert_eq!(rows[0].metadata["v"], 2);
    }

    #[tokio::test]
    async fn list_longterm_filters_by_since() {
        let remote = InMemoryRemote::new();
        let t = crate::util::now();
        for (text, offset) in [("old", -10), ("new", 10)] {
            remote.put_longterm_row(
                "srv",
                LongTermRow {
                    content_hash: content_hash(text).to_string(),
                    text: text.into(),
                    metadata: Value::Null,
                    updated_at: t + chrono::Duration::seconds(offset),
                },
            );
        }
        let rows = remote.list_longterm("srv", Some(t)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "new");
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_in_order() {
        let remote = InMemoryRemote::new();
        remote.fail_next([MemoraError::NetworkTransient("503".into())]);

        assert!(remote.fetch_session("srv", "s").await.is_err());
        assert!(remote.fetch_session("srv", "s").await.unwrap().is_none());
        assert_eq!(remote.calls("fetch_session"), 2);
    }

    #[tokio::test]
    async fn rejected_hash_fails_every_time() {
        let remote = InMemoryRemote::new();
        let e = entry("bad", Value::Null);
        remote.reject_hash(e.content_hash.as_str());

        for _ in 0..2 {
            let err = remote.upsert_longterm(&e).await.unwrap_err();
            assert_eq!(err.kind(), "RemoteRejected");
        }
        assert_eq!(remote.longterm_count("srv"), 0);
    }
}
