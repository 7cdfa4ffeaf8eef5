//! Content-addressed long-term memory.
//!
//! `longterm/memory.jsonl` is an append-only log of `put` and `touch`
//! records. The in-memory index keyed by `(server_id, content_hash)` is
//! rebuilt from the log on open and again under the lock before every
//! mutation, so appends from other processes are never shadowed.

use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{MemoraError, Result};
use crate::hashing::{content_hash, normalize, ContentHash};
use crate::store::{jsonl, sweep_orphans, StoreLock};

const LOG_FILE: &str = "memory.jsonl";
const LOCK_FILE: &str = ".lock";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermEntry {
    pub server_id: String,
    pub content_hash: ContentHash,
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

/// An entry received from the remote; its hash is not yet verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermRow {
    pub content_hash: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Value,
    pub updated_at: DateTime<Utc>,
}

/// One line of the long-term log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LongTermRecord {
    Put(LongTermEntry),
    Touch {
        server_id: String,
        content_hash: ContentHash,
        #[serde(default)]
        metadata: Map<String, Value>,
        updated_at: DateTime<Utc>,
    },
}

/// Lines written before records were tagged: `{"text": ..., "metadata": ...}`.
/// Anything else, such as a tagged record that failed validation, is corrupt.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LegacyLine {
    text: String,
    #[serde(default)]
    metadata: Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LogLine {
    Record(LongTermRecord),
    Legacy(LegacyLine),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum MergeOutcome {
    Inserted,
    Refreshed,
    Unchanged,
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddOutcome {
    pub content_hash: ContentHash,
    pub outcome: MergeOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongTermStats {
    pub path: PathBuf,
    pub total: usize,
    pub per_server: BTreeMap<String, usize>,
    pub newest: Option<DateTime<Utc>>,
}

/// Wrap non-object metadata as `{"value": ...}`; `null` becomes `{}`.
pub fn normalize_metadata(metadata: Value) -> Map<String, Value> {
    match metadata {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

type Key = (String, ContentHash);

#[derive(Debug, Default)]
struct Index {
    entries: HashMap<Key, LongTermEntry>,
}

impl Index {
    fn apply(&mut self, record: LongTermRecord, log: &Path) -> Result<()> {
        match record {
            LongTermRecord::Put(entry) => {
                if !entry.content_hash.matches(&entry.text) {
                    return Err(MemoraError::corrupt(
                        log,
                        format!("put {} does not match its text", entry.content_hash),
                    ));
                }
                let key = (entry.server_id.clone(), entry.content_hash.clone());
                match self.entries.get_mut(&key) {
                    // Content is write-once; a repeated put only refreshes newer metadata.
                    Some(existing) => {
                        if entry.updated_at > existing.updated_at {
                            existing.metadata = entry.metadata;
                            existing.updated_at = entry.updated_at;
                        }
                    }
                    None => {
                        self.entries.insert(key, entry);
                    }
                }
            }
            LongTermRecord::Touch {
                server_id,
                content_hash,
                metadata,
                updated_at,
            } => match self.entries.get_mut(&(server_id, content_hash.clone())) {
                Some(existing) => {
                    existing.metadata = metadata;
                    existing.updated_at = updated_at;
                }
                None => {
                    tracing::debug!(hash = %content_hash.short(), "Touch for unknown entry ignored");
                }
            },
        }
        Ok(())
    }

    fn get(&self, server_id: &str, hash: &ContentHash) -> Option<&LongTermEntry> {
        self.entries.get(&(server_id.to_string(), hash.clone()))
    }
}

/// Entries of one server, newest first. Cloning restarts from the same position.
#[derive(Debug, Clone)]
pub struct Entries {
    items: Arc<[LongTermEntry]>,
    pos: usize,
}

impl Entries {
    /// Start over from the newest entry.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }
}

impl Iterator for Entries {
    type Item = LongTermEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.items.get(self.pos)?.clone();
        self.pos += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.items.len().saturating_sub(self.pos);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Entries {}

pub struct LongTermStore {
    dir: PathBuf,
    default_server_id: String,
    lock_timeout: Duration,
    index: RwLock<Index>,
}

impl LongTermStore {
    /// Open the store and build the index from the log.
    ///
    /// Legacy untagged lines are rewritten as `put` records once, under the
    /// lock, so their timestamp is fixed from then on.
    pub async fn open(
        dir: impl Into<PathBuf>,
        default_server_id: impl Into<String>,
        lock_timeout: Duration,
    ) -> Result<Self> {
        let store = Self {
            dir: dir.into(),
            default_server_id: default_server_id.into(),
            lock_timeout,
            index: RwLock::new(Index::default()),
        };
        let (records, upgraded) = store.read_log()?;
        let index = if upgraded == 0 {
            build_index(records, &store.log_path())?
        } else {
            let _lock = store.lock().await?;
            store.load_locked()?
        };
        tracing::debug!(
            path = %store.log_path().display(),
            entries = index.entries.len(),
            "Long-term index loaded"
        );
        *store.index.write() = index;
        Ok(store)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn default_server_id(&self) -> &str {
        &self.default_server_id
    }

    /// Records of the log with legacy lines converted. Returns how many were converted.
    fn read_log(&self) -> Result<(Vec<LongTermRecord>, usize)> {
        let path = self.log_path();
        let lines: Vec<LogLine> = jsonl::read_records(&path)?;
        let legacy_time = legacy_timestamp(&path);

        let mut records = Vec::with_capacity(lines.len());
        let mut upgraded = 0usize;
        for line in lines {
            match line {
                LogLine::Record(record) => records.push(record),
                LogLine::Legacy(legacy) => {
                    upgraded += 1;
                    let text = normalize(&legacy.text);
                    if text.is_empty() {
                        continue;
                    }
                    records.push(LongTermRecord::Put(LongTermEntry {
                        server_id: self.default_server_id.clone(),
                        content_hash: content_hash(text),
                        text: text.to_string(),
                        metadata: normalize_metadata(legacy.metadata),
                        updated_at: legacy_time,
                    }));
                }
            }
        }
        Ok((records, upgraded))
    }

    /// Re-read the log while holding the lock, persisting any legacy upgrade.
    fn load_locked(&self) -> Result<Index> {
        let path = self.log_path();
        let (records, upgraded) = self.read_log()?;
        if upgraded > 0 {
            jsonl::rewrite_records(&path, &records)?;
            tracing::info!(upgraded, path = %path.display(), "Upgraded legacy long-term lines");
        }
        build_index(records, &path)
    }

    async fn lock(&self) -> Result<StoreLock> {
        let lock = StoreLock::acquire(&self.dir.join(LOCK_FILE), self.lock_timeout).await?;
        sweep_orphans(&self.dir)?;
        Ok(lock)
    }

    /// Store `text` once per server. Re-adding refreshes changed metadata.
    pub async fn add(&self, server_id: &str, text: &str, metadata: Value) -> Result<AddOutcome> {
        let text = normalize(text);
        if text.is_empty() {
            return Err(MemoraError::InvalidInput(
                "long-term text must not be empty".to_string(),
            ));
        }
        let hash = content_hash(text);
        let metadata = normalize_metadata(metadata);

        let _lock = self.lock().await?;
        let mut index = self.load_locked()?;
        let now = crate::util::now();
        let record = match index.get(server_id, &hash) {
            None => Some(LongTermRecord::Put(LongTermEntry {
                server_id: server_id.to_string(),
                content_hash: hash.clone(),
                text: text.to_string(),
                metadata,
                updated_at: now,
            })),
            Some(existing) if existing.metadata != metadata => Some(LongTermRecord::Touch {
                server_id: server_id.to_string(),
                content_hash: hash.clone(),
                metadata,
                updated_at: now.max(existing.updated_at),
            }),
            Some(_) => None,
        };

        let outcome = match record {
            Some(record) => {
                let outcome = match record {
                    LongTermRecord::Put(_) => MergeOutcome::Inserted,
                    LongTermRecord::Touch { .. } => MergeOutcome::Refreshed,
                };
                jsonl::append_record(&self.log_path(), &record)?;
                index.apply(record, &self.log_path())?;
                outcome
            }
            None => MergeOutcome::Unchanged,
        };
        *self.index.write() = index;

        tracing::debug!(server_id, hash = %hash.short(), ?outcome, "Long-term add");
        Ok(AddOutcome {
            content_hash: hash,
            outcome,
        })
    }

    /// Union remote rows into the store under one lock.
    ///
    /// Absent hashes are inserted; existing ones only take metadata and
    /// `updated_at` from a strictly newer row. Rows whose hash does not
    /// match their text are rejected and nothing is written for them.
    pub async fn merge_remote(
        &self,
        server_id: &str,
        rows: &[LongTermRow],
    ) -> Result<Vec<(String, MergeOutcome)>> {
        let _lock = self.lock().await?;
        let mut index = self.load_locked()?;
        let log = self.log_path();

        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            let hash = match ContentHash::parse(&row.content_hash) {
                Ok(hash) => hash,
                Err(e) => {
                    outcomes.push((row.content_hash.clone(), MergeOutcome::Rejected(e.to_string())));
                    continue;
                }
            };
            let text = normalize(&row.text);
            if text.is_empty() || !hash.matches(text) {
                outcomes.push((
                    row.content_hash.clone(),
                    MergeOutcome::Rejected("content_hash does not match text".to_string()),
                ));
                continue;
            }

            let record = match index.get(server_id, &hash) {
                None => Some(LongTermRecord::Put(LongTermEntry {
                    server_id: server_id.to_string(),
                    content_hash: hash.clone(),
                    text: text.to_string(),
                    metadata: normalize_metadata(row.metadata.clone()),
                    updated_at: row.updated_at,
                })),
                Some(existing) if row.updated_at > existing.updated_at => {
                    Some(LongTermRecord::Touch {
                        server_id: server_id.to_string(),
                        content_hash: hash.clone(),
                        metadata: normalize_metadata(row.metadata.clone()),
                        updated_at: row.updated_at,
                    })
                }
                Some(_) => None,
            };
            let outcome = match record {
                Some(record) => {
                    let outcome = match record {
                        LongTermRecord::Put(_) => MergeOutcome::Inserted,
                        LongTermRecord::Touch { .. } => MergeOutcome::Refreshed,
                    };
                    jsonl::append_record(&log, &record)?;
                    index.apply(record, &log)?;
                    outcome
                }
                None => MergeOutcome::Unchanged,
            };
            outcomes.push((hash.to_string(), outcome));
        }
        *self.index.write() = index;
        Ok(outcomes)
    }

    pub fn find_by_hash(&self, server_id: &str, hash: &ContentHash) -> Option<LongTermEntry> {
        self.index.read().get(server_id, hash).cloned()
    }

    /// Entries of `server_id`, `updated_at` descending, ties by hash.
    pub fn list(&self, server_id: &str) -> Entries {
        let mut items: Vec<LongTermEntry> = self
            .index
            .read()
            .entries
            .values()
            .filter(|e| e.server_id == server_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.content_hash.cmp(&b.content_hash))
        });
        Entries {
            items: items.into(),
            pos: 0,
        }
    }

    pub fn count(&self, server_id: Option<&str>) -> usize {
        let index = self.index.read();
        match server_id {
            Some(server_id) => index
                .entries
                .keys()
                .filter(|(s, _)| s == server_id)
                .count(),
            None => index.entries.len(),
        }
    }

    pub fn stats(&self) -> LongTermStats {
        let index = self.index.read();
        let mut per_server = BTreeMap::new();
        for (server_id, _) in index.entries.keys() {
            *per_server.entry(server_id.clone()).or_insert(0) += 1;
        }
        LongTermStats {
            path: self.log_path(),
            total: index.entries.len(),
            per_server,
            newest: index.entries.values().map(|e| e.updated_at).max(),
        }
    }
}

fn build_index(records: Vec<LongTermRecord>, log: &Path) -> Result<Index> {
    let mut index = Index::default();
    for record in records {
        index.apply(record, log)?;
    }
    Ok(index)
}

/// Legacy lines carry no time; use the log's modification time at upgrade.
fn legacy_timestamp(path: &Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|t| DateTime::<Utc>::from(t).trunc_subsecs(6))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    async fn open(tmp: &TempDir) -> LongTermStore {
        LongTermStore::open(tmp.path().join("longterm"), "srv", Duration::from_millis(500))
            .await
            .unwrap()
    }

    fn row(text: &str, updated_at: DateTime<Utc>, metadata: Value) -> LongTermRow {
        LongTermRow {
            content_hash: content_hash(text).to_string(),
            text: text.to_string(),
            metadata,
            updated_at,
        }
    }

    #[tokio::test]
    async fn add_is_deduplicated_by_hash() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;

        let first = store.add("srv", "prefer tabs", json!({"tag": "style"})).await.unwrap();
        let second = store.add("srv", "  prefer tabs\n", json!({"tag": "style"})).await.unwrap();

        assert_eq!(first.outcome, MergeOutcome::Inserted);
        assert_eq!(second.outcome, MergeOutcome::Unchanged);
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(store.count(Some("srv")), 1);
        assert_eq!(fs::read_to_string(store.log_path()).unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn re_add_with_new_metadata_refreshes_without_touching_text() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let added = store.add("srv", "fact", json!({"v": 1})).await.unwrap();

        let again = store.add("srv", "fact", json!({"v": 2})).await.unwrap();
        assert_eq!(again.outcome, MergeOutcome::Refreshed);

        let entry = store.find_by_hash("srv", &added.content_hash).unwrap();
        assert_eq!(entry.text, "fact");
        assert_eq!(entry.metadata["v"], 2);
        assert_eq!(store.count(None), 1);
    }

    #[tokio::test]
    async fn same_text_on_two_servers_is_two_entries() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        store.add("a", "shared", Value::Null).await.unwrap();
        store.add("b", "shared", Value::Null).await.unwrap();

        assert_eq!(store.count(None), 2);
        assert_eq!(store.count(Some("a")), 1);
        assert_eq!(store.stats().per_server.len(), 2);
    }

    #[tokio::test]
    async fn empty_text_is_invalid_input() {
        let tmp = TempDir::new().unwrap();
        let err = open(&tmp).await.add("srv", "   \n", Value::Null).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }

    #[tokio::test]
    async fn index_is_rebuilt_on_reopen() {
        let tmp = TempDir::new().unwrap();
        let added = open(&tmp).await.add("srv", "persisted", json!({})).await.unwrap();

        let reopened = open(&tmp).await;
        let entry = reopened.find_by_hash("srv", &added.content_hash).unwrap();
        assert_eq!(entry.text, "persisted");
    }

    #[tokio::test]
    async fn list_is_newest_first_and_rewindable() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let base = Utc::now();
        let rows = vec![
            row("old", base - chrono::Duration::hours(2), Value::Null),
            row("newest", base, Value::Null),
            row("middle", base - chrono::Duration::hours(1), Value::Null),
        ];
        store.merge_remote("srv", &rows).await.unwrap();

        let mut entries = store.list("srv");
        let texts: Vec<String> = entries.by_ref().map(|e| e.text).collect();
        assert_eq!(texts, ["newest", "middle", "old"]);
        assert!(entries.next().is_none());

        entries.rewind();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.next().unwrap().text, "newest");
        assert!(store.list("other").next().is_none());
    }

    #[tokio::test]
    async fn merge_is_a_union_that_never_duplicates() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        store.add("srv", "local only", Value::Null).await.unwrap();
        let t = Utc::now();

        let rows = vec![row("from remote", t, json!({"a": 1}))];
        let first = store.merge_remote("srv", &rows).await.unwrap();
        let second = store.merge_remote("srv", &rows).await.unwrap();

        assert_eq!(first[0].1, MergeOutcome::Inserted);
        assert_eq!(second[0].1, MergeOutcome::Unchanged);
        assert_eq!(store.count(Some("srv")), 2);
    }

    #[tokio::test]
    async fn merge_refreshes_metadata_only_when_strictly_newer() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let t = Utc::now();
        store
            .merge_remote("srv", &[row("fact", t, json!({"v": 1}))])
            .await
            .unwrap();

        let older = store
            .merge_remote("srv", &[row("fact", t - chrono::Duration::seconds(1), json!({"v": 0}))])
            .await
            .unwrap();
        assert_eq!(older[0].1, MergeOutcome::Unchanged);

        let newer_time = t + chrono::Duration::seconds(1);
        let newer = store
            .merge_remote("srv", &[row("fact", newer_time, json!({"v": 2}))])
            .await
            .unwrap();
        assert_eq!(newer[0].1, MergeOutcome::Refreshed);

        let entry = store.find_by_hash("srv", &content_hash("fact")).unwrap();
        assert_eq!(entry.metadata["v"], 2);
        assert_eq!(entry.updated_at, newer_time);
    }

    #[tokio::test]
    async fn merge_rejects_mismatched_hashes() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let mut bad = row("real text", Utc::now(), Value::Null);
        bad.content_hash = content_hash("other text").to_string();
        let garbage = LongTermRow {
            content_hash: "not-a-hash".into(),
            ..row("x", Utc::now(), Value::Null)
        };

        let outcomes = store.merge_remote("srv", &[bad, garbage]).await.unwrap();
        assert!(matches!(outcomes[0].1, MergeOutcome::Rejected(_)));
        assert!(matches!(outcomes[1].1, MergeOutcome::Rejected(_)));
        assert_eq!(store.count(None), 0);
    }

    #[tokio::test]
    async fn legacy_lines_are_upgraded_on_load() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("longterm");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(LOG_FILE),
            concat!(
                "{\"text\": \"legacy fact\", \"metadata\": {\"source\": \"py\"}}\n",
                "{\"text\": \"scalar meta\", \"metadata\": 7}\n",
                "{\"text\": \"   \"}\n",
                "{\"text\": \"legacy fact\"}\n",
            ),
        )
        .unwrap();

        let store = open(&tmp).await;
        assert_eq!(store.count(Some("srv")), 2);
        let scalar = store.find_by_hash("srv", &content_hash("scalar meta")).unwrap();
        assert_eq!(scalar.metadata, normalize_metadata(json!({"value": 7})));
        let fact = store.find_by_hash("srv", &content_hash("legacy fact")).unwrap();
        assert_eq!(fact.metadata["source"], "py");
    }

    #[tokio::test]
    async fn legacy_timestamp_is_fixed_across_later_appends() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("longterm");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(LOG_FILE), "{\"text\": \"legacy fact\"}\n").unwrap();
        let hash = content_hash("legacy fact");

        let store = open(&tmp).await;
        let before = store.find_by_hash("srv", &hash).unwrap().updated_at;
        assert_eq!(before.timestamp_subsec_nanos() % 1_000, 0);
        let log = fs::read_to_string(store.log_path()).unwrap();
        assert!(log.starts_with("{\"kind\":\"put\""));

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.add("srv", "brand new fact", Value::Null).await.unwrap();
        store
            .merge_remote("srv", &[row("from remote", Utc::now(), Value::Null)])
            .await
            .unwrap();

        let reopened = open(&tmp).await;
        assert_eq!(reopened.find_by_hash("srv", &hash).unwrap().updated_at, before);
        assert_eq!(reopened.count(Some("srv")), 3);
    }

    #[tokio::test]
    async fn corrupt_log_line_fails_open() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("longterm");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(LOG_FILE), "{\"kind\":\"put\",\"server_id\"\n").unwrap();

        let err = LongTermStore::open(&dir, "srv", Duration::from_millis(100))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "StoreCorrupt");
    }

    #[tokio::test]
    async fn tagged_put_with_wrong_hash_is_not_read_as_legacy() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("longterm");
        fs::create_dir_all(&dir).unwrap();
        let line = json!({
            "kind": "put",
            "server_id": "srv",
            "content_hash": "zz",
            "text": "t",
            "updated_at": "2026-01-01T00:00:00Z",
        });
        fs::write(dir.join(LOG_FILE), format!("{line}\n")).unwrap();

        let err = LongTermStore::open(&dir, "srv", Duration::from_millis(100))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "StoreCorrupt");
    }

    #[tokio::test]
    async fn mutation_sees_appends_from_other_handles() {
        let tmp = TempDir::new().unwrap();
        let a = open(&tmp).await;
        let b = open(&tmp).await;
        a.add("srv", "from a", Value::Null).await.unwrap();
        b.add("srv", "from b", Value::Null).await.unwrap();

        assert_eq!(b.count(Some("srv")), 2);
        let again = b.add("srv", "from a", Value::Null).await.unwrap();
        assert_eq!(again.outcome, MergeOutcome::Unchanged);
    }

    #[tokio::test]
    async fn held_lock_is_store_locked() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("longterm");
        let store = LongTermStore::open(&dir, "srv", Duration::from_millis(80))
            .await
            .unwrap();
        let _held = StoreLock::acquire(&dir.join(LOCK_FILE), Duration::from_millis(80))
            .await
            .unwrap();

        let err = store.add("srv", "blocked", Value::Null).await.unwrap_err();
        assert_eq!(err.kind(), "StoreLocked");
    }
}
