use async_trait::async_trait;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;

use super::Multiplexer;
use crate::error::{MemoraError, Result};

/// tmux driven through its command line.
pub struct TmuxMultiplexer {
    binary: String,
}

impl TmuxMultiplexer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, err: std::io::Error) -> MemoraError {
        if err.kind() == std::io::ErrorKind::NotFound {
            MemoraError::ResumeUnavailable(format!(
                "{} is not installed or not in PATH",
                self.binary
            ))
        } else {
            MemoraError::ResumeUnavailable(format!("failed to run {}: {err}", self.binary))
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        self.command(args)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))
    }

    /// Run and require a zero exit status.
    async fn run_ok(&self, what: &str, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;
        if output.status.success() {
            return Ok(output);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.trim();
        Err(MemoraError::ResumeUnavailable(if detail.is_empty() {
            format!("{} {what} failed ({})", self.binary, output.status)
        } else {
            format!("{} {what} failed: {detail}", self.binary)
        }))
    }
}

/// Exact-match target; a bare name would also match longer names by prefix.
fn exact(name: &str) -> String {
    format!("={name}")
}

#[async_trait]
impl Multiplexer for TmuxMultiplexer {
    fn name(&self) -> &str {
        &self.binary
    }

    async fn is_available(&self) -> bool {
        self.run(&["-V"])
            .await
            .is_ok_and(|output| output.status.success())
    }

    async fn probe(&self, name: &str) -> Result<bool> {
        let output = self.run(&["has-session", "-t", &exact(name)]).await?;
        Ok(output.status.success())
    }

    async fn create(&self, name: &str, cwd: Option<&Path>) -> Result<()> {
        let cwd = cwd.map(|p| p.to_string_lossy().into_owned());
        let mut args = vec!["new-session", "-d", "-s", name];
        if let Some(dir) = cwd.as_deref() {
            args.extend(["-c", dir]);
        }
        self.run_ok("new-session", &args).await?;
        tracing::debug!(session = name, "Multiplexer session created");
        Ok(())
    }

    async fn replay(&self, name: &str, line: &str) -> Result<()> {
        self.run_ok("send-keys", &["send-keys", "-t", name, "-l", line])
            .await?;
        self.run_ok("send-keys", &["send-keys", "-t", name, "Enter"])
            .await?;
        Ok(())
    }

    async fn attach(&self, name: &str) -> Result<()> {
        // Inherits the terminal; returns once the user detaches.
        let target = exact(name);
        let status = Command::new(&self.binary)
            .args(["attach-session", "-t", target.as_str()])
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;
        if status.success() {
            Ok(())
        } else {
            Err(MemoraError::ResumeUnavailable(format!(
                "{} attach-session failed ({status})",
                self.binary
            )))
        }
    }

    fn attach_command(&self, name: &str) -> String {
        format!("{} attach-session -t {name}", self.binary)
    }

    async fn destroy(&self, name: &str) -> Result<()> {
        if self.probe(name).await? {
            self.run_ok("kill-session", &["kill-session", "-t", &exact(name)])
                .await?;
            tracing::debug!(session = name, "Multiplexer session destroyed");
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let output = self
            .run(&["list-sessions", "-F", "#{session_name}"])
            .await?;
        // Non-zero means no server is running, which is an empty list.
        if !output.status.success() {
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect())
    }
}
