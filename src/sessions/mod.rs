//! Local session store: append-only transcripts with atomic checkpoints.

pub mod file;
pub mod summary;
pub mod traits;

use std::sync::Arc;

pub use file::{FileSessionStore, LogRecord};
pub use summary::{append_with_summary, plan_auto_summary, SummaryPolicy};
pub use traits::{Role, Session, SessionId, SessionReplacement, SessionStore, Turn};

use crate::config::Config;

/// Create the session store for a loaded configuration.
pub fn create_session_store(config: &Config) -> Arc<dyn SessionStore> {
    Arc::new(FileSessionStore::new(
        config.workspace().sessions_dir(),
        config.store.lock_timeout(),
    ))
}
