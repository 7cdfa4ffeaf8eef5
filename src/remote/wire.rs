//! Row shapes exchanged with the remote tables.
//!
//! `conversation` is an array of `{role, content, timestamp?}`. `snapshot`
//! is a tagged object:
//!
//! ```json
//! {"format": "memora.snapshot", "version": 1, "state": {...}, "summarized_through": 3}
//! ```
//!
//! Older writers stored the whole session object as the snapshot; such
//! objects are accepted and everything except the session fields becomes
//! the opaque state. Any other shape is rejected rather than guessed at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::RemoteSession;
use crate::error::{MemoraError, Result};
use crate::memory::{LongTermEntry, LongTermRow};
use crate::sessions::{Role, Turn};

pub const SNAPSHOT_FORMAT: &str = "memora.snapshot";
pub const SNAPSHOT_VERSION: u32 = 1;

/// Keys of a legacy snapshot object that duplicate row columns.
const LEGACY_SESSION_KEYS: [&str; 4] = ["session_id", "summary", "conversation", "last_updated"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub server_id: String,
    pub session_id: String,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub conversation: Value,
    #[serde(default)]
    pub snapshot: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTurn {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format: String,
    version: u32,
    #[serde(default)]
    state: Value,
    #[serde(default)]
    summarized_through: usize,
}

/// Insert payload for the long-term table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongTermInsert<'a> {
    pub server_id: &'a str,
    pub content_hash: &'a str,
    pub text: &'a str,
    pub metadata: &'a Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl<'a> From<&'a LongTermEntry> for LongTermInsert<'a> {
    fn from(entry: &'a LongTermEntry) -> Self {
        Self {
            server_id: &entry.server_id,
            content_hash: entry.content_hash.as_str(),
            text: &entry.text,
            metadata: &entry.metadata,
            updated_at: entry.updated_at,
        }
    }
}

/// Refresh payload: never carries `text`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongTermRefresh<'a> {
    pub metadata: &'a Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

/// Long-term row as returned by the table. Older tables may hold a null `updated_at`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LongTermSelect {
    pub content_hash: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<LongTermSelect> for LongTermRow {
    fn from(row: LongTermSelect) -> Self {
        Self {
            content_hash: row.content_hash,
            text: row.text,
            metadata: row.metadata,
            updated_at: row.updated_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        }
    }
}

pub fn encode_session(session: &RemoteSession) -> SessionRow {
    let conversation = session
        .turns
        .iter()
        .map(|t| WireTurn {
            role: t.role.as_str().to_string(),
            content: t.content.clone(),
            timestamp: Some(t.timestamp),
        })
        .collect::<Vec<_>>();
    let snapshot = SnapshotEnvelope {
        format: SNAPSHOT_FORMAT.to_string(),
        version: SNAPSHOT_VERSION,
        state: session.state.clone(),
        summarized_through: session.summarized_through,
    };
    SessionRow {
        server_id: session.server_id.clone(),
        session_id: session.session_id.clone(),
        last_updated: session.last_updated,
        summary: Some(session.summary.clone()),
        conversation: serde_json::to_value(conversation).unwrap_or(Value::Array(Vec::new())),
        snapshot: serde_json::to_value(snapshot).unwrap_or(Value::Null),
        created_at: session.created_at,
    }
}

fn rejected(session_id: &str, detail: impl std::fmt::Display) -> MemoraError {
    MemoraError::RemoteRejected(format!("session '{session_id}': {detail}"))
}

fn decode_turns(row: &SessionRow) -> Result<Vec<Turn>> {
    let items = match &row.conversation {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(rejected(
                &row.session_id,
                format!("conversation must be an array, got {}", json_kind(other)),
            ))
        }
    };
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let wire: WireTurn = serde_json::from_value(item.clone())
                .map_err(|e| rejected(&row.session_id, format!("turn {idx}: {e}")))?;
            let role = Role::parse(&wire.role)
                .map_err(|_| rejected(&row.session_id, format!("turn {idx}: unknown role {:?}", wire.role)))?;
            Ok(Turn {
                role,
                content: wire.content,
                timestamp: wire.timestamp.unwrap_or(row.last_updated),
            })
        })
        .collect()
}

/// `(state, summarized_through)` from a snapshot column.
fn decode_snapshot(row: &SessionRow) -> Result<(Value, usize)> {
    let object = match &row.snapshot {
        Value::Null => return Ok((Value::Null, 0)),
        Value::Object(object) => object,
        other => {
            return Err(rejected(
                &row.session_id,
                format!("snapshot must be an object, got {}", json_kind(other)),
            ))
        }
    };

    if object.get("format").and_then(Value::as_str) == Some(SNAPSHOT_FORMAT) {
        let envelope: SnapshotEnvelope = serde_json::from_value(row.snapshot.clone())
            .map_err(|e| rejected(&row.session_id, format!("snapshot: {e}")))?;
        if envelope.version > SNAPSHOT_VERSION {
            return Err(rejected(
                &row.session_id,
                format!("unsupported snapshot version {}", envelope.version),
            ));
        }
        return Ok((envelope.state, envelope.summarized_through));
    }

    let state: Map<String, Value> = object
        .iter()
        .filter(|(k, _)| !LEGACY_SESSION_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let state = if state.is_empty() {
        Value::Null
    } else {
        Value::Object(state)
    };
    Ok((state, 0))
}

pub fn decode_session(row: SessionRow) -> Result<RemoteSession> {
    let turns = decode_turns(&row)?;
    let (state, summarized_through) = decode_snapshot(&row)?;
    if summarized_through > turns.len() {
        return Err(rejected(
            &row.session_id,
            format!(
                "snapshot summarizes {summarized_through} turns but conversation has {}",
                turns.len()
            ),
        ));
    }
    Ok(RemoteSession {
        server_id: row.server_id,
        session_id: row.session_id,
        turns,
        summary: row.summary.unwrap_or_default(),
        summarized_through,
        state,
        created_at: row.created_at,
        last_updated: row.last_updated,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
