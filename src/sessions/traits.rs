//! Session storage traits and types for conversation state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MemoraError, Result};

const MAX_SESSION_ID_LEN: usize = 128;

/// Local identifier of a session; also its directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Accepts `[A-Za-z0-9._-]{1,128}` not starting with `.`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let valid_chars = raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if raw.is_empty() || raw.len() > MAX_SESSION_ID_LEN || raw.starts_with('.') || !valid_chars
        {
            return Err(MemoraError::InvalidInput(format!(
                "session id must match [A-Za-z0-9._-]{{1,{MAX_SESSION_ID_LEN}}} and not start with '.', got {raw:?}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// `YYYY-MM-DD-default` for today (UTC).
    pub fn default_for_today() -> Self {
        Self(Utc::now().format("%Y-%m-%d-default").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = MemoraError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(MemoraError::InvalidInput(format!(
                "role must be one of: user, assistant, system (got {other:?})"
            ))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable exchange unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: crate::util::now(),
        }
    }
}

/// A session as reconstructed from its checkpoint and transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub server_id: String,
    /// Transcript generation; changes only when the transcript is replaced.
    pub epoch: String,
    pub turns: Vec<Turn>,
    pub summary: String,
    /// Number of leading turns already folded into `summary`.
    pub summarized_through: usize,
    /// Opaque structured state used for resume. `Null` until first written.
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Session {
    /// The last `n` turns in log order.
    pub fn recent_turns(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// Turns not yet folded into the summary.
    pub fn unsummarized_turns(&self) -> &[Turn] {
        let start = self.summarized_through.min(self.turns.len());
        &self.turns[start..]
    }
}

/// Full content that overwrites a local session during restore.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReplacement {
    pub server_id: String,
    pub turns: Vec<Turn>,
    pub summary: String,
    pub summarized_through: usize,
    pub state: serde_json::Value,
    pub created_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

/// Persistent storage for conversation sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session. Returns the existing one unless `overwrite` is set.
    async fn create(&self, id: &SessionId, server_id: &str, overwrite: bool) -> Result<Session>;

    /// Full ordered turns plus summary/state, or `NotFound`.
    async fn load(&self, id: &SessionId) -> Result<Session>;

    async fn exists(&self, id: &SessionId) -> bool;

    /// Append durably and bump `last_updated`.
    async fn append_turn(&self, id: &SessionId, turn: Turn) -> Result<Session>;

    /// Overwrite the rolling summary.
    async fn update_summary(
        &self,
        id: &SessionId,
        summary: String,
        summarized_through: usize,
    ) -> Result<Session>;

    /// Atomically replace the opaque snapshot state.
    async fn write_snapshot(&self, id: &SessionId, state: serde_json::Value) -> Result<Session>;

    /// Swap in remote content under a new transcript epoch.
    async fn replace(&self, id: &SessionId, replacement: SessionReplacement) -> Result<Session>;

    /// Session ids present on disk, sorted.
    async fn list(&self) -> Result<Vec<SessionId>>;

    async fn active(&self) -> Result<Option<SessionId>>;

    async fn set_active(&self, id: &SessionId) -> Result<()>;

    /// The name of this session store implementation.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_accepts_safe_names() {
        for ok in ["s1", "2026-10-19-default", "feature_x.v2", "A-b_c.d"] {
            assert_eq!(SessionId::parse(ok).unwrap().as_str(), ok);
        }
    }

    #[test]
    fn session_id_rejects_path_tricks() {
        for bad in ["", "..", ".hidden", "a/b", "a b", "../etc", &"x".repeat(129)] {
            assert!(SessionId::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn default_session_id_has_date_prefix() {
        let id = SessionId::default_for_today();
        assert!(id.as_str().ends_with("-default"));
        assert_eq!(id.as_str().len(), "2026-10-19-default".len());
    }

    #[test]
    fn role_parse_is_case_insensitive_and_strict() {
        assert_eq!(Role::parse(" User ").unwrap(), Role::User);
        assert_eq!(Role::parse("SYSTEM").unwrap(), Role::System);
        assert!(Role::parse("tool").is_err());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert!(serde_json::from_str::<Role>("\"robot\"").is_err());
    }

    #[test]
    fn recent_and_unsummarized_slices() {
        let now = Utc::now();
        let turns: Vec<Turn> = (0..5)
            .map(|i| Turn {
                role: Role::User,
                content: format!("m{i}"),
                timestamp: now,
            })
            .collect();
        let session = Session {
            session_id: SessionId::parse("s").unwrap(),
            server_id: "srv".into(),
            epoch: "e".into(),
            turns,
            summary: String::new(),
            summarized_through: 3,
            state: serde_json::Value::Null,
            created_at: now,
            last_updated: now,
        };
        assert_eq!(session.recent_turns(2)[0].content, "m3");
        assert_eq!(session.recent_turns(10).len(), 5);
        assert_eq!(session.unsummarized_turns().len(), 2);
    }
}
