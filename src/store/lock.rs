//! Cross-process advisory lock for a store area.
//!
//! The lock file is never removed; only the OS-level `flock` matters, so a
//! crashed holder releases it automatically. Acquisition polls with an async
//! sleep until the timeout and then fails with `StoreLocked`.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{MemoraError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A held exclusive lock. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    pub async fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let started = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        tracing::warn!(
                            path = %path.display(),
                            waited_ms = waited.as_millis() as u64,
                            "Lock acquisition timed out"
                        );
                        return Err(MemoraError::StoreLocked {
                            path: path.to_path_buf(),
                            waited,
                        });
                    }
                    tokio::time::sleep(POLL_INTERVAL.min(timeout - waited)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut lock = Self {
            file,
            path: path.to_path_buf(),
        };
        lock.write_holder();
        tracing::debug!(path = %lock.path.display(), "Lock acquired");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record who holds the lock, for humans inspecting a stuck workspace.
    fn write_holder(&mut self) {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let line = format!(
            "pid={} host={} since={}\n",
            std::process::id(),
            host,
            chrono::Utc::now().to_rfc3339()
        );
        let _ = self.file.set_len(0);
        let _ = self.file.seek(SeekFrom::Start(0));
        let _ = self.file.write_all(line.as_bytes());
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
