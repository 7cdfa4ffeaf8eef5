//! Error taxonomy shared by the stores, the sync engine and the resume manager.
//!
//! Library code returns [`Result`]; the binary works in `anyhow` and recovers
//! the kind with `downcast_ref::<MemoraError>()` to choose an exit code.

use std::path::PathBuf;
use std::time::Duration;

pub type Result<T, E = MemoraError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum MemoraError {
    /// A local log or snapshot could not be parsed.
    #[error("store corrupt at {}: {detail}", path.display())]
    StoreCorrupt { path: PathBuf, detail: String },

    /// Another invocation held the advisory lock past the timeout.
    #[error("store locked at {} (waited {}ms)", path.display(), waited.as_millis())]
    StoreLocked { path: PathBuf, waited: Duration },

    #[error("not found: {0}")]
    NotFound(String),

    /// Timeouts, connection failures, 408/429/5xx. Retried internally first.
    #[error("transient network failure: {0}")]
    NetworkTransient(String),

    /// Auth or validation failure, or a payload shape we refuse to guess at.
    #[error("remote rejected request: {0}")]
    RemoteRejected(String),

    #[error("resume unavailable: {0}")]
    ResumeUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MemoraError {
    pub fn corrupt(path: impl Into<PathBuf>, detail: impl std::fmt::Display) -> Self {
        Self::StoreCorrupt {
            path: path.into(),
            detail: detail.to_string(),
        }
    }

    /// Stable kind name reported to the caller.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StoreCorrupt { .. } => "StoreCorrupt",
            Self::StoreLocked { .. } => "StoreLocked",
            Self::NotFound(_) => "NotFound",
            Self::NetworkTransient(_) => "NetworkTransient",
            Self::RemoteRejected(_) => "RemoteRejected",
            Self::ResumeUnavailable(_) => "ResumeUnavailable",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Io(_) => "Io",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) => 2,
            Self::StoreCorrupt { .. } => 3,
            Self::StoreLocked { .. } => 4,
            Self::NotFound(_) => 5,
            Self::NetworkTransient(_) => 6,
            Self::RemoteRejected(_) => 7,
            Self::ResumeUnavailable(_) => 8,
            Self::Io(_) => 1,
        }
    }

    /// Only transient network failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkTransient(_))
    }
}
