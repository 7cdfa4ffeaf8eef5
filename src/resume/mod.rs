//! Terminal-multiplexer resume for interrupted sessions.
//!
//! This module defines the [`Multiplexer`] trait, a narrow capability over a
//! terminal multiplexer (probe, create, replay, attach, destroy), and the
//! [`ResumeManager`] state machine that decides whether to reattach to a live
//! multiplexer session or rebuild one from the local session store.

pub mod manager;
pub mod tmux;

pub use manager::{MultiplexerStatus, ResumeManager, ResumeOutcome, ResumeState};
pub use tmux::TmuxMultiplexer;

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::config::ResumeConfig;
use crate::error::{MemoraError, Result};
use crate::sessions::SessionId;

const NAME_PREFIX: &str = "memora-";
const MAX_NAME_CHARS: usize = 80;

/// Terminal multiplexer backend.
///
/// Every call is a blocking subprocess interaction on a real backend, so the
/// trait is async. Implementations must be `Send + Sync` because the resume
/// manager holds them behind a shared reference.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Human-readable backend name, used in logs and status output.
    fn name(&self) -> &str;

    /// Whether the backend binary can be run at all.
    async fn is_available(&self) -> bool;

    /// Whether a session with exactly this name is alive.
    ///
    /// # Errors
    ///
    /// Returns `ResumeUnavailable` when the backend cannot be run.
    async fn probe(&self, name: &str) -> Result<bool>;

    /// Create a detached session, optionally starting in `cwd`.
    async fn create(&self, name: &str, cwd: Option<&Path>) -> Result<()>;

    /// Type `line` into the session and press Enter.
    async fn replay(&self, name: &str, line: &str) -> Result<()>;

    /// Attach the current terminal; returns when the user detaches.
    async fn attach(&self, name: &str) -> Result<()>;

    /// Command line a user can run to attach by hand.
    fn attach_command(&self, name: &str) -> String;

    /// Kill the session. Killing a session that does not exist is not an error.
    async fn destroy(&self, name: &str) -> Result<()>;

    /// Names of every live session; empty when the backend has no server.
    async fn list(&self) -> Result<Vec<String>>;
}

static UNSAFE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]+").unwrap());

/// Deterministic multiplexer session name for a session id.
pub fn session_name(id: &SessionId) -> String {
    let normalized = UNSAFE_RUNS.replace_all(id.as_str().trim(), "-");
    format!("{NAME_PREFIX}{normalized}")
        .chars()
        .take(MAX_NAME_CHARS)
        .collect()
}

/// Build the multiplexer backend named by `[resume] multiplexer`.
///
/// The value is a binary path or name; every supported backend speaks the
/// tmux command language.
pub fn create_multiplexer(config: &ResumeConfig) -> Result<Box<dyn Multiplexer>> {
    let binary = config.multiplexer.trim();
    if binary.is_empty() {
        return Err(MemoraError::InvalidInput(
            "resume.multiplexer must name a tmux-compatible binary".into(),
        ));
    }
    Ok(Box::new(TmuxMultiplexer::new(binary)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_of(raw: &str) -> String {
        session_name(&SessionId::parse(raw).unwrap())
    }

    #[test]
    fn name_keeps_safe_characters() {
        assert_eq!(name_of("2026-10-19-default"), "memora-2026-10-19-default");
        assert_eq!(name_of("feature_x"), "memora-feature_x");
    }

    #[test]
    fn name_collapses_unsafe_runs() {
        assert_eq!(name_of("a.b..c"), "memora-a-b-c");
    }

    #[test]
    fn name_is_truncated() {
        let long = "x".repeat(120);
        let name = name_of(&long);
        assert_eq!(name.chars().count(), MAX_NAME_CHARS);
        assert!(name.starts_with(NAME_PREFIX));
    }

    #[test]
    fn factory_rejects_empty_binary() {
        let config = ResumeConfig {
            multiplexer: "  ".into(),
            ..ResumeConfig::default()
        };
        let err = create_multiplexer(&config).err().unwrap();
        assert_eq!(err.kind(), "InvalidInput");
    }

    #[test]
    fn factory_uses_configured_binary() {
        let config = ResumeConfig {
            multiplexer: "/opt/bin/tmux".into(),
            ..ResumeConfig::default()
        };
        let mux = create_multiplexer(&config).unwrap();
        assert_eq!(mux.name(), "/opt/bin/tmux");
        assert_eq!(
            mux.attach_command("memora-s1"),
            "/opt/bin/tmux attach-session -t memora-s1"
        );
    }
}
