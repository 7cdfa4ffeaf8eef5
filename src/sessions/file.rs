//! File-backed session store.
//!
//! Each session lives in `<sessions>/<id>/`:
//!
//! ```text
//! transcript.jsonl    append-only log, authoritative
//! snapshot.json       checkpoint of the log fold through `log_records`
//! snapshot.prev.json  previous checkpoint, used when the current one is unreadable
//! .lock               advisory lock taken by every mutation
//! ```
//!
//! A checkpoint is only trusted when its epoch matches the transcript header
//! and it does not claim more records than the log holds; the remainder of
//! the log is replayed on top of it. Without a usable checkpoint the whole
//! log is replayed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::traits::{Role, Session, SessionId, SessionReplacement, SessionStore, Turn};
use crate::error::{MemoraError, Result};
use crate::store::{jsonl, sweep_orphans, write_atomic, StoreLock};

const TRANSCRIPT_FILE: &str = "transcript.jsonl";
const SNAPSHOT_FILE: &str = "snapshot.json";
const PREV_SNAPSHOT_FILE: &str = "snapshot.prev.json";
const LOCK_FILE: &str = ".lock";
const ACTIVE_FILE: &str = "ACTIVE";

const TRANSCRIPT_VERSION: u32 = 1;
const CHECKPOINT_FORMAT: &str = "memora.checkpoint";
const CHECKPOINT_VERSION: u32 = 1;

/// One line of `transcript.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    Header {
        v: u32,
        session_id: SessionId,
        server_id: String,
        epoch: String,
        created_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// `timestamp` is the turn's own time; `at` is when it was written.
    Turn {
        seq: usize,
        role: Role,
        content: String,
        timestamp: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    Summary {
        text: String,
        summarized_through: usize,
        at: DateTime<Utc>,
    },
    State {
        state: serde_json::Value,
        at: DateTime<Utc>,
    },
}

impl LogRecord {
    fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Header { at, .. }
            | Self::Turn { at, .. }
            | Self::Summary { at, .. }
            | Self::State { at, .. } => *at,
        }
    }
}

#[derive(Serialize)]
struct CheckpointOut<'a> {
    format: &'static str,
    version: u32,
    log_records: usize,
    #[serde(flatten)]
    session: &'a Session,
}

#[derive(Deserialize)]
struct Checkpoint {
    format: String,
    version: u32,
    log_records: usize,
    #[serde(flatten)]
    session: Session,
}

/// Start a session from its header record.
fn session_from_header(record: &LogRecord) -> std::result::Result<Session, String> {
    match record {
        LogRecord::Header {
            v,
            session_id,
            server_id,
            epoch,
            created_at,
            at,
        } => {
            if *v > TRANSCRIPT_VERSION {
                return Err(format!("unsupported transcript version {v}"));
            }
            Ok(Session {
                session_id: session_id.clone(),
                server_id: server_id.clone(),
                epoch: epoch.clone(),
                turns: Vec::new(),
                summary: String::new(),
                summarized_through: 0,
                state: serde_json::Value::Null,
                created_at: *created_at,
                last_updated: *at,
            })
        }
        _ => Err("first record is not a header".to_string()),
    }
}

/// Fold one post-header record into `session`.
fn apply_record(session: &mut Session, record: &LogRecord) -> std::result::Result<(), String> {
    match record {
        LogRecord::Header { .. } => return Err("unexpected header record".to_string()),
        LogRecord::Turn {
            seq,
            role,
            content,
            timestamp,
            ..
        } => {
            if *seq != session.turns.len() {
                return Err(format!(
                    "turn seq {seq} out of order (expected {})",
                    session.turns.len()
                ));
            }
            session.turns.push(Turn {
                role: *role,
                content: content.clone(),
                timestamp: *timestamp,
            });
        }
        LogRecord::Summary {
            text,
            summarized_through,
            ..
        } => {
            if *summarized_through > session.turns.len() {
                return Err(format!(
                    "summary covers {summarized_through} turns but only {} exist",
                    session.turns.len()
                ));
            }
            session.summary = text.clone();
            session.summarized_through = *summarized_through;
        }
        LogRecord::State { state, .. } => session.state = state.clone(),
    }
    session.last_updated = session.last_updated.max(record.at());
    Ok(())
}

fn count_turns(records: &[LogRecord]) -> usize {
    records
        .iter()
        .filter(|r| matches!(r, LogRecord::Turn { .. }))
        .count()
}

/// Newest checkpoint consistent with `records`, trying the previous one as fallback.
fn usable_checkpoint(dir: &Path, base: &Session, records: &[LogRecord]) -> Option<Checkpoint> {
    for name in [SNAPSHOT_FILE, PREV_SNAPSHOT_FILE] {
        let path = dir.join(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read checkpoint");
                continue;
            }
        };
        let checkpoint: Checkpoint = match serde_json::from_slice(&bytes) {
            Ok(cp) => cp,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable checkpoint");
                continue;
            }
        };
        let consistent = checkpoint.format == CHECKPOINT_FORMAT
            && checkpoint.version <= CHECKPOINT_VERSION
            && checkpoint.session.session_id == base.session_id
            && checkpoint.session.epoch == base.epoch
            && checkpoint.log_records >= 1
            && checkpoint.log_records <= records.len()
            && count_turns(&records[..checkpoint.log_records]) == checkpoint.session.turns.len();
        if consistent {
            return Some(checkpoint);
        }
        tracing::debug!(path = %path.display(), "Checkpoint does not match transcript; skipping");
    }
    None
}

/// Rebuild a session from its log, starting from a checkpoint when one fits.
fn replay(dir: &Path, records: &[LogRecord]) -> Result<Session> {
    let transcript = dir.join(TRANSCRIPT_FILE);
    let first = records
        .first()
        .ok_or_else(|| MemoraError::corrupt(&transcript, "empty transcript"))?;
    let base = session_from_header(first).map_err(|d| MemoraError::corrupt(&transcript, d))?;

    let (mut session, start) = match usable_checkpoint(dir, &base, records) {
        Some(checkpoint) => (checkpoint.session, checkpoint.log_records),
        None => (base, 1),
    };
    for (idx, record) in records.iter().enumerate().skip(start) {
        apply_record(&mut session, record)
            .map_err(|d| MemoraError::corrupt(&transcript, format!("record {}: {d}", idx + 1)))?;
    }
    Ok(session)
}

/// Rotate the current checkpoint to `.prev` and write a new one.
fn write_checkpoint(dir: &Path, session: &Session, log_records: usize) -> Result<()> {
    let current = dir.join(SNAPSHOT_FILE);
    if let Ok(bytes) = fs::read(&current) {
        if serde_json::from_slice::<Checkpoint>(&bytes).is_ok() {
            write_atomic(&dir.join(PREV_SNAPSHOT_FILE), &bytes)?;
        }
    }
    let checkpoint = CheckpointOut {
        format: CHECKPOINT_FORMAT,
        version: CHECKPOINT_VERSION,
        log_records,
        session,
    };
    let bytes = serde_json::to_vec_pretty(&checkpoint).map_err(std::io::Error::other)?;
    write_atomic(&current, &bytes)
}

/// The checkpoint is derived data; a failed rewrite leaves the log authoritative.
fn refresh_checkpoint(dir: &Path, session: &Session, log_records: usize) {
    if let Err(e) = write_checkpoint(dir, session, log_records) {
        tracing::warn!(
            session_id = %session.session_id,
            error = %e,
            "Checkpoint rewrite failed; transcript remains authoritative"
        );
    }
}

fn new_epoch() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Sessions stored as transcript + checkpoint directories under one root.
pub struct FileSessionStore {
    root: PathBuf,
    lock_timeout: Duration,
}

impl FileSessionStore {
    pub fn new(root: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            lock_timeout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn transcript_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join(TRANSCRIPT_FILE)
    }

    pub fn snapshot_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join(SNAPSHOT_FILE)
    }

    pub fn lock_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join(LOCK_FILE)
    }

    async fn lock(&self, id: &SessionId) -> Result<StoreLock> {
        let lock = StoreLock::acquire(&self.lock_path(id), self.lock_timeout).await?;
        let swept = sweep_orphans(&self.session_dir(id))?;
        if swept > 0 {
            tracing::debug!(session_id = %id, swept, "Removed orphaned temp files");
        }
        Ok(lock)
    }

    fn not_found(id: &SessionId) -> MemoraError {
        MemoraError::NotFound(format!("session '{id}' does not exist"))
    }

    /// Load without locking. Returns the session and the number of log records.
    fn load_unlocked(&self, id: &SessionId) -> Result<(Session, usize)> {
        let transcript = self.transcript_path(id);
        if !transcript.exists() {
            return Err(Self::not_found(id));
        }
        let records: Vec<LogRecord> = jsonl::read_records(&transcript)?;
        let session = replay(&self.session_dir(id), &records)?;
        Ok((session, records.len()))
    }

    /// Append one record derived from the current state, under the session lock.
    async fn mutate<F>(&self, id: &SessionId, build: F) -> Result<Session>
    where
        F: FnOnce(&Session) -> Result<LogRecord>,
    {
        if !self.transcript_path(id).exists() {
            return Err(Self::not_found(id));
        }
        let _lock = self.lock(id).await?;
        let (mut session, count) = self.load_unlocked(id)?;
        let record = build(&session)?;

        let transcript = self.transcript_path(id);
        jsonl::append_record(&transcript, &record)?;
        apply_record(&mut session, &record).map_err(|d| MemoraError::corrupt(&transcript, d))?;
        refresh_checkpoint(&self.session_dir(id), &session, count + 1);
        Ok(session)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create(&self, id: &SessionId, server_id: &str, overwrite: bool) -> Result<Session> {
        let _lock = self.lock(id).await?;
        if self.transcript_path(id).exists() && !overwrite {
            return self.load_unlocked(id).map(|(session, _)| session);
        }

        let now = crate::util::now();
        let header = LogRecord::Header {
            v: TRANSCRIPT_VERSION,
            session_id: id.clone(),
            server_id: server_id.to_string(),
            epoch: new_epoch(),
            created_at: now,
            at: now,
        };
        let session = session_from_header(&header)
            .map_err(|d| MemoraError::corrupt(self.transcript_path(id), d))?;
        jsonl::rewrite_records(&self.transcript_path(id), [&header])?;
        refresh_checkpoint(&self.session_dir(id), &session, 1);

        tracing::info!(session_id = %id, server_id, overwrite, "Session created");
        Ok(session)
    }

    async fn load(&self, id: &SessionId) -> Result<Session> {
        if !self.transcript_path(id).exists() {
            return Err(Self::not_found(id));
        }
        let _lock = self.lock(id).await?;
        self.load_unlocked(id).map(|(session, _)| session)
    }

    async fn exists(&self, id: &SessionId) -> bool {
        self.transcript_path(id).exists()
    }

    async fn append_turn(&self, id: &SessionId, turn: Turn) -> Result<Session> {
        let session = self
            .mutate(id, |session| {
                Ok(LogRecord::Turn {
                    seq: session.turns.len(),
                    role: turn.role,
                    content: turn.content,
                    timestamp: turn.timestamp,
                    at: crate::util::now(),
                })
            })
            .await?;
        tracing::debug!(session_id = %id, turns = session.turns.len(), "Turn appended");
        Ok(session)
    }

    async fn update_summary(
        &self,
        id: &SessionId,
        summary: String,
        summarized_through: usize,
    ) -> Result<Session> {
        self.mutate(id, |session| {
            if summarized_through > session.turns.len() {
                return Err(MemoraError::InvalidInput(format!(
                    "summary cannot cover {summarized_through} turns; session has {}",
                    session.turns.len()
                )));
            }
            Ok(LogRecord::Summary {
                text: summary,
                summarized_through,
                at: crate::util::now(),
            })
        })
        .await
    }

    async fn write_snapshot(&self, id: &SessionId, state: serde_json::Value) -> Result<Session> {
        self.mutate(id, |_| {
            Ok(LogRecord::State {
                state,
                at: crate::util::now(),
            })
        })
        .await
    }

    async fn replace(&self, id: &SessionId, replacement: SessionReplacement) -> Result<Session> {
        if replacement.summarized_through > replacement.turns.len() {
            return Err(MemoraError::InvalidInput(format!(
                "summary cannot cover {} turns; replacement has {}",
                replacement.summarized_through,
                replacement.turns.len()
            )));
        }
        let _lock = self.lock(id).await?;

        let created_at = replacement
            .created_at
            .or_else(|| self.load_unlocked(id).ok().map(|(s, _)| s.created_at))
            .unwrap_or(replacement.last_updated);
        let mut records = Vec::with_capacity(replacement.turns.len() + 3);
        records.push(LogRecord::Header {
            v: TRANSCRIPT_VERSION,
            session_id: id.clone(),
            server_id: replacement.server_id.clone(),
            epoch: new_epoch(),
            created_at,
            at: replacement.last_updated,
        });
        for (seq, turn) in replacement.turns.into_iter().enumerate() {
            records.push(LogRecord::Turn {
                seq,
                role: turn.role,
                content: turn.content,
                timestamp: turn.timestamp,
                at: replacement.last_updated,
            });
        }
        if !replacement.summary.is_empty() || replacement.summarized_through > 0 {
            records.push(LogRecord::Summary {
                text: replacement.summary,
                summarized_through: replacement.summarized_through,
                at: replacement.last_updated,
            });
        }
        if !replacement.state.is_null() {
            records.push(LogRecord::State {
                state: replacement.state,
                at: replacement.last_updated,
            });
        }

        let transcript = self.transcript_path(id);
        let mut session =
            session_from_header(&records[0]).map_err(|d| MemoraError::corrupt(&transcript, d))?;
        for record in &records[1..] {
            apply_record(&mut session, record).map_err(|d| MemoraError::corrupt(&transcript, d))?;
        }
        jsonl::rewrite_records(&transcript, &records)?;
        refresh_checkpoint(&self.session_dir(id), &session, records.len());

        tracing::info!(
            session_id = %id,
            turns = session.turns.len(),
            epoch = %session.epoch,
            "Session replaced from remote"
        );
        Ok(session)
    }

    async fn list(&self) -> Result<Vec<SessionId>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.path().join(TRANSCRIPT_FILE).is_file() {
                continue;
            }
            if let Ok(id) = SessionId::parse(&entry.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn active(&self) -> Result<Option<SessionId>> {
        let path = self.root.join(ACTIVE_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match SessionId::parse(&raw) {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring invalid active session pointer");
                Ok(None)
            }
        }
    }

    async fn set_active(&self, id: &SessionId) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        write_atomic(&self.root.join(ACTIVE_FILE), format!("{id}\n").as_bytes())
    }

    fn name(&self) -> &str {
        "file"
    }
}
