//! Workspace layout on disk.
//!
//! ```text
//! <root>/config.toml
//! <root>/core/master_memory.md
//! <root>/sessions/ACTIVE
//! <root>/sessions/<session_id>/...
//! <root>/longterm/memory.jsonl
//! ```

use std::path::{Path, PathBuf};

/// Maximum core memory size injected into prompts (20 KB).
const MAX_CORE_MEMORY_BYTES: usize = 20 * 1024;

const DEFAULT_CORE_MEMORY: &str = "# Master Core Memory

This file is always included in Memora prompts.

- Long-term goals of the project
- Development philosophy
- Forbidden patterns
- Architecture principles to keep consistent
";

/// Paths of one workspace root. Cheap to clone; owns no handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn longterm_dir(&self) -> PathBuf {
        self.root.join("longterm")
    }

    pub fn core_memory_path(&self) -> PathBuf {
        self.root.join("core").join("master_memory.md")
    }

    /// Create the directory skeleton and seed the core memory file.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.sessions_dir())?;
        std::fs::create_dir_all(self.longterm_dir())?;
        let core = self.core_memory_path();
        if let Some(parent) = core.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !core.exists() {
            std::fs::write(&core, DEFAULT_CORE_MEMORY)?;
        }
        Ok(())
    }

    /// Core memory, truncated to `MAX_CORE_MEMORY_BYTES`; `None` if absent.
    pub async fn core_memory(&self) -> anyhow::Result<Option<String>> {
        match tokio::fs::read_to_string(self.core_memory_path()).await {
            Ok(content) => {
                let content = content.trim();
                if content.len() > MAX_CORE_MEMORY_BYTES {
                    // Truncate at a char boundary.
                    let mut end = MAX_CORE_MEMORY_BYTES;
                    while end > 0 && !content.is_char_boundary(end) {
                        end -= 1;
                    }
                    Ok(Some(content[..end].to_string()))
                } else {
                    Ok(Some(content.to_string()))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
