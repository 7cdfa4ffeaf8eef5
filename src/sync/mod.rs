//! Backup (push) and restore (pull) between the local stores and the remote.
//!
//! Push is local-wins and idempotent. Pull replaces a session only when the
//! remote copy is strictly newer, and unions long-term entries by hash.

pub mod cursor;
pub mod pull;
pub mod push;

pub use cursor::{SessionStatus, SyncCursor, SyncStatus};
pub use pull::{LongTermPullSummary, PullReport, SessionPullOutcome};
pub use push::{PushReport, RowFailure};

use crate::memory::LongTermStore;
use crate::remote::{RemoteStore, RetryPolicy};
use crate::sessions::SessionStore;

/// Borrowed view of the stores a sync run works on.
pub struct SyncEngine<'a> {
    sessions: &'a dyn SessionStore,
    longterm: &'a LongTermStore,
    remote: &'a dyn RemoteStore,
    retry: RetryPolicy,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        sessions: &'a dyn SessionStore,
        longterm: &'a LongTermStore,
        remote: &'a dyn RemoteStore,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            sessions,
            longterm,
            remote,
            retry,
        }
    }
}
