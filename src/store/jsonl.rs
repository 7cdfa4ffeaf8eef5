//! Line-delimited JSON logs.
//!
//! Every record is one line ending in `\n`. Blank lines are skipped. Any
//! other unparsable line, including a final line without its newline, is
//! corruption: the reader fails instead of truncating.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use super::atomic::AtomicFile;
use crate::error::{MemoraError, Result};

/// Read every record. A missing file is an empty log.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    parse_records(&raw).map_err(|detail| MemoraError::corrupt(path, detail))
}

/// Parse a log body; the error is a human-readable location + cause.
pub fn parse_records<T: DeserializeOwned>(raw: &[u8]) -> std::result::Result<Vec<T>, String> {
    let text = std::str::from_utf8(raw).map_err(|e| format!("invalid utf-8: {e}"))?;
    if !text.is_empty() && !text.ends_with('\n') {
        let line_no = text.lines().count();
        return Err(format!("line {line_no}: torn final record (no newline)"));
    }

    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|e| format!("line {}: {e}", idx + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Append one record and flush it to disk before returning.
pub fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let mut line = serde_json::to_vec(record).map_err(std::io::Error::other)?;
    line.push(b'\n');

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&line)?;
    file.sync_data()?;
    Ok(())
}

/// Replace the whole log with `records` in one atomic step.
pub fn rewrite_records<'a, T, I>(path: &Path, records: I) -> Result<()>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut file = AtomicFile::create(path)?;
    for record in records {
        let mut line = serde_json::to_vec(record).map_err(std::io::Error::other)?;
        line.push(b'\n');
        file.write_all(&line)?;
    }
    file.commit()
}
