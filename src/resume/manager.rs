use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};

use super::{session_name, Multiplexer};
use crate::config::ResumeConfig;
use crate::context::render_turns;
use crate::error::{MemoraError, Result};
use crate::sessions::{Session, SessionId, SessionStore};
use crate::store::write_atomic;

const CONTEXT_FILE: &str = "resume_context.md";

/// What `resume` found for a session id. Decided once per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeState {
    /// Neither a live multiplexer session nor a local session.
    NoSession,
    /// A live multiplexer session exists; attach as is.
    LiveRemote,
    /// Only the local session exists; rebuild the multiplexer session from it.
    StaleLocal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeOutcome {
    pub state: ResumeState,
    pub session_id: String,
    pub multiplexer_session: String,
    pub created: bool,
    pub attached: bool,
    pub attach_command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_path: Option<PathBuf>,
    pub replayed_turns: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiplexerStatus {
    pub multiplexer: String,
    pub available: bool,
    pub session_id: String,
    pub multiplexer_session: String,
    pub exists: bool,
    pub attach_command: String,
    pub live_sessions: Vec<String>,
}

/// Reattaches to, or reconstructs, the multiplexer session of a local session.
pub struct ResumeManager<'a> {
    sessions: &'a dyn SessionStore,
    mux: &'a dyn Multiplexer,
    sessions_root: PathBuf,
    replay_turns: usize,
    bootstrap_command: Option<String>,
    cwd: Option<PathBuf>,
}

impl<'a> ResumeManager<'a> {
    pub fn new(
        sessions: &'a dyn SessionStore,
        mux: &'a dyn Multiplexer,
        sessions_root: impl Into<PathBuf>,
        config: &ResumeConfig,
    ) -> Self {
        Self {
            sessions,
            mux,
            sessions_root: sessions_root.into(),
            replay_turns: config.replay_turns,
            bootstrap_command: config.bootstrap_command.clone(),
            cwd: None,
        }
    }

    /// Working directory for recreated sessions.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn context_path(&self, id: &SessionId) -> PathBuf {
        self.sessions_root.join(id.as_str()).join(CONTEXT_FILE)
    }

    async fn ensure_available(&self) -> Result<()> {
        if self.mux.is_available().await {
            Ok(())
        } else {
            Err(MemoraError::ResumeUnavailable(format!(
                "{} is not installed or not in PATH",
                self.mux.name()
            )))
        }
    }

    pub async fn inspect(&self, id: &SessionId) -> Result<ResumeState> {
        self.ensure_available().await?;
        if self.mux.probe(&session_name(id)).await? {
            Ok(ResumeState::LiveRemote)
        } else if self.sessions.exists(id).await {
            Ok(ResumeState::StaleLocal)
        } else {
            Ok(ResumeState::NoSession)
        }
    }

    /// Run one resume transition.
    ///
    /// `command` overrides the configured bootstrap command. Creation and
    /// replay race `interrupt`; if it fires first, or any step fails, the
    /// newly created multiplexer session is destroyed before returning.
    pub async fn resume<F>(
        &self,
        id: &SessionId,
        command: Option<&str>,
        attach: bool,
        interrupt: F,
    ) -> Result<ResumeOutcome>
    where
        F: Future<Output = ()> + Send,
    {
        let state = self.inspect(id).await?;
        let name = session_name(id);
        let mut outcome = ResumeOutcome {
            state,
            session_id: id.to_string(),
            multiplexer_session: name.clone(),
            created: false,
            attached: false,
            attach_command: self.mux.attach_command(&name),
            context_path: None,
            replayed_turns: 0,
        };

        match state {
            ResumeState::NoSession => {
                return Err(MemoraError::ResumeUnavailable(format!(
                    "no live {} session and no local session for '{id}'; run `memora start --session-id {id}` first",
                    self.mux.name()
                )));
            }
            ResumeState::LiveRemote => {
                tracing::info!(session = %name, "Live multiplexer session found");
            }
            ResumeState::StaleLocal => {
                let session = match self.sessions.load(id).await {
                    Ok(session) => session,
                    // Removed between probe and load.
                    Err(MemoraError::NotFound(_)) => {
                        return Err(MemoraError::ResumeUnavailable(format!(
                            "local session '{id}' disappeared during resume"
                        )));
                    }
                    Err(e) => return Err(e),
                };
                let path = self.context_path(id);
                let replayed = self.write_context(&path, &session)?;
                let command = command
                    .or(self.bootstrap_command.as_deref())
                    .map(str::trim)
                    .filter(|c| !c.is_empty());

                let rebuild = self.rebuild(&name, &path, command);
                let result = tokio::select! {
                    result = rebuild => result,
                    () = interrupt => Err(MemoraError::ResumeUnavailable(format!(
                        "interrupted while recreating {name}"
                    ))),
                };
                if let Err(e) = result {
                    self.rollback(&name).await;
                    return Err(e);
                }

                tracing::info!(session = %name, turns = replayed, "Multiplexer session recreated");
                outcome.created = true;
                outcome.context_path = Some(path);
                outcome.replayed_turns = replayed;
            }
        }

        if attach {
            self.mux.attach(&name).await?;
            outcome.attached = true;
        }
        Ok(outcome)
    }

    async fn rebuild(&self, name: &str, context: &Path, command: Option<&str>) -> Result<()> {
        self.mux.create(name, self.cwd.as_deref()).await?;
        let show = format!("cat {}", shell_quote(&context.to_string_lossy()));
        self.mux.replay(name, &show).await?;
        if let Some(command) = command {
            self.mux.replay(name, command).await?;
        }
        Ok(())
    }

    async fn rollback(&self, name: &str) {
        match self.mux.destroy(name).await {
            Ok(()) => tracing::warn!(session = name, "Rolled back partially created session"),
            Err(e) => {
                tracing::error!(session = name, error = %e, "Failed to roll back multiplexer session");
            }
        }
    }

    /// Summary, state and the last `replay_turns` turns as Markdown.
    /// Returns how many turns were written.
    fn write_context(&self, path: &Path, session: &Session) -> Result<usize> {
        let recent = session.recent_turns(self.replay_turns);
        let summary = session.summary.trim();
        let mut body = format!(
            "# Resumed session {}\n\nserver: {}\nlast updated: {}\n\n## Summary\n\n{}\n",
            session.session_id,
            session.server_id,
            session.last_updated.to_rfc3339(),
            if summary.is_empty() { "(empty)" } else { summary },
        );
        if !session.state.is_null() {
            let state = serde_json::to_string_pretty(&session.state)
                .map_err(|e| MemoraError::InvalidInput(format!("unserializable state: {e}")))?;
            body.push_str(&format!("\n## State\n\n```json\n{state}\n```\n"));
        }
        body.push_str(&format!(
            "\n## Recent turns ({} of {})\n\n{}\n",
            recent.len(),
            session.turns.len(),
            render_turns(recent)
        ));

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_atomic(path, body.as_bytes())?;
        Ok(recent.len())
    }

    /// Name mapping, liveness and every live session of the backend.
    pub async fn status(&self, id: &SessionId) -> Result<MultiplexerStatus> {
        let name = session_name(id);
        let available = self.mux.is_available().await;
        let (exists, live_sessions) = if available {
            (self.mux.probe(&name).await?, self.mux.list().await?)
        } else {
            (false, Vec::new())
        };
        Ok(MultiplexerStatus {
            multiplexer: self.mux.name().to_string(),
            available,
            session_id: id.to_string(),
            attach_command: self.mux.attach_command(&name),
            multiplexer_session: name,
            exists,
            live_sessions,
        })
    }
}

/// Single-quote for POSIX shells.
fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::{FileSessionStore, Role, Turn};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeMux {
        unavailable: bool,
        fail_replay: bool,
        hang_replay: bool,
        live: Mutex<BTreeSet<String>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeMux {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().push(call);
        }

        fn is_live(&self, name: &str) -> bool {
            self.live.lock().contains(name)
        }
    }

    #[async_trait]
    impl Multiplexer for FakeMux {
        fn name(&self) -> &str {
            "fake"
        }

        async fn is_available(&self) -> bool {
            !self.unavailable
        }

        async fn probe(&self, name: &str) -> Result<bool> {
            Ok(self.is_live(name))
        }

        async fn create(&self, name: &str, _cwd: Option<&Path>) -> Result<()> {
            self.record(format!("create {name}"));
            self.live.lock().insert(name.to_string());
            Ok(())
        }

        async fn replay(&self, name: &str, line: &str) -> Result<()> {
            self.record(format!("replay {name} {line}"));
            if self.hang_replay {
                std::future::pending::<()>().await;
            }
            if self.fail_replay {
                return Err(MemoraError::ResumeUnavailable("send-keys failed".into()));
            }
            Ok(())
        }

        async fn attach(&self, name: &str) -> Result<()> {
            self.record(format!("attach {name}"));
            Ok(())
        }

        fn attach_command(&self, name: &str) -> String {
            format!("fake attach {name}")
        }

        async fn destroy(&self, name: &str) -> Result<()> {
            self.record(format!("destroy {name}"));
            self.live.lock().remove(name);
            Ok(())
        }

        async fn list(&self) -> Result<Vec<String>> {
            Ok(self.live.lock().iter().cloned().collect())
        }
    }

    struct Fixture {
        _tmp: TempDir,
        sessions: FileSessionStore,
        config: ResumeConfig,
        id: SessionId,
    }

    impl Fixture {
        fn manager<'a>(&'a self, mux: &'a FakeMux) -> ResumeManager<'a> {
            ResumeManager::new(&self.sessions, mux, self.sessions.root(), &self.config)
        }
    }

    async fn fixture(turns: usize) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let sessions = FileSessionStore::new(tmp.path().join("sessions"), Duration::from_secs(1));
        let id = SessionId::parse("s1").unwrap();
        sessions.create(&id, "srv", false).await.unwrap();
        for i in 0..turns {
            sessions
                .append_turn(&id, Turn::new(Role::User, format!("turn {i}")))
                .await
                .unwrap();
        }
        Fixture {
            _tmp: tmp,
            sessions,
            config: ResumeConfig {
                replay_turns: 2,
                ..ResumeConfig::default()
            },
            id,
        }
    }

    fn never() -> std::future::Pending<()> {
        std::future::pending()
    }

    #[tokio::test]
    async fn live_session_is_attached_without_recreating() {
        let f = fixture(1).await;
        let mux = FakeMux::default();
        mux.live.lock().insert("memora-s1".into());

        let outcome = f
            .manager(&mux)
            .resume(&f.id, None, true, never())
            .await
            .unwrap();
        assert_eq!(outcome.state, ResumeState::LiveRemote);
        assert!(!outcome.created);
        assert!(outcome.attached);
        assert_eq!(mux.calls(), vec!["attach memora-s1"]);
    }

    #[tokio::test]
    async fn stale_local_is_recreated_and_replayed() {
        let f = fixture(3).await;
        f.sessions
            .update_summary(&f.id, "what happened so far".into(), 1)
            .await
            .unwrap();
        let mux = FakeMux::default();

        let outcome = f
            .manager(&mux)
            .resume(&f.id, Some("codex"), false, never())
            .await
            .unwrap();
        assert_eq!(outcome.state, ResumeState::StaleLocal);
        assert!(outcome.created);
        assert!(!outcome.attached);
        assert_eq!(outcome.replayed_turns, 2);
        assert_eq!(outcome.attach_command, "fake attach memora-s1");
        assert!(mux.is_live("memora-s1"));

        let path = outcome.context_path.unwrap();
        let calls = mux.calls();
        assert_eq!(calls[0], "create memora-s1");
        assert_eq!(calls[1], format!("replay memora-s1 cat '{}'", path.display()));
        assert_eq!(calls[2], "replay memora-s1 codex");

        let context = std::fs::read_to_string(path).unwrap();
        assert!(context.contains("what happened so far"));
        assert!(context.contains("## Recent turns (2 of 3)"));
        assert!(context.contains("[USER] turn 2"));
        assert!(!context.contains("turn 0"));
    }

    #[tokio::test]
    async fn configured_bootstrap_command_is_sent() {
        let mut f = fixture(0).await;
        f.config.bootstrap_command = Some("claude".into());
        let mux = FakeMux::default();

        f.manager(&mux)
            .resume(&f.id, None, true, never())
            .await
            .unwrap();
        let calls = mux.calls();
        assert_eq!(calls[2], "replay memora-s1 claude");
        assert_eq!(calls[3], "attach memora-s1");
    }

    #[tokio::test]
    async fn no_session_is_resume_unavailable() {
        let f = fixture(0).await;
        let mux = FakeMux::default();
        let ghost = SessionId::parse("ghost").unwrap();

        let err = f
            .manager(&mux)
            .resume(&ghost, None, true, never())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ResumeUnavailable");
        assert!(err.to_string().contains("memora start"));
        assert!(mux.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_backend_is_resume_unavailable() {
        let f = fixture(1).await;
        let mux = FakeMux {
            unavailable: true,
            ..FakeMux::default()
        };
        let err = f
            .manager(&mux)
            .resume(&f.id, None, false, never())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ResumeUnavailable");
    }

    #[tokio::test]
    async fn failed_replay_destroys_the_new_session() {
        let f = fixture(1).await;
        let mux = FakeMux {
            fail_replay: true,
            ..FakeMux::default()
        };

        let err = f
            .manager(&mux)
            .resume(&f.id, None, true, never())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ResumeUnavailable");
        assert!(!mux.is_live("memora-s1"));
        assert_eq!(mux.calls().last().unwrap(), "destroy memora-s1");
        assert!(!mux.calls().iter().any(|c| c.starts_with("attach")));
    }

    #[tokio::test]
    async fn interrupt_rolls_back_creation() {
        let f = fixture(1).await;
        let mux = FakeMux {
            hang_replay: true,
            ..FakeMux::default()
        };
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let interrupt = async move {
            let _ = rx.await;
        };
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(());
        };

        let manager = f.manager(&mux);
        let (result, ()) = tokio::join!(manager.resume(&f.id, None, true, interrupt), trigger);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("interrupted"));
        assert!(!mux.is_live("memora-s1"));
        assert_eq!(mux.calls().last().unwrap(), "destroy memora-s1");
    }

    #[tokio::test]
    async fn status_reports_mapping_and_live_sessions() {
        let f = fixture(0).await;
        let mux = FakeMux::default();
        mux.live.lock().insert("memora-other".into());

        let status = f.manager(&mux).status(&f.id).await.unwrap();
        assert!(status.available);
        assert!(!status.exists);
        assert_eq!(status.multiplexer_session, "memora-s1");
        assert_eq!(status.live_sessions, vec!["memora-other"]);
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/tmp/a b"), "'/tmp/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
