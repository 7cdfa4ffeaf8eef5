//! External language-model command used by `ask`.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::Result;

const EMPTY_RESPONSE: &str = "(empty response)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Response {
    /// Text recorded as the assistant turn: stdout, else stderr, else a placeholder.
    pub fn text(&self) -> &str {
        [self.stdout.as_str(), self.stderr.as_str()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or(EMPTY_RESPONSE)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Something that turns a prompt into a reply.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, prompt: &str) -> Result<Response>;

    fn name(&self) -> &str;
}

/// Runs a shell command with the prompt on stdin.
pub struct ShellResponder {
    command: String,
}

impl ShellResponder {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Responder for ShellResponder {
    async fn respond(&self, prompt: &str) -> Result<Response> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // A command that exits without reading closes the pipe early.
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }

        let output = child.wait_with_output().await?;
        let response = Response {
            exit_code: output.status.code().unwrap_or(1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        tracing::debug!(
            command = %self.command,
            exit_code = response.exit_code,
            "Responder finished"
        );
        Ok(response)
    }

    fn name(&self) -> &str {
        &self.command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(stdout: &str, stderr: &str) -> Response {
        Response {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn text_prefers_stdout_then_stderr() {
        assert_eq!(response("out", "err").text(), "out");
        assert_eq!(response("", "err").text(), "err");
        assert_eq!(response("", "").text(), "(empty response)");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cat_echoes_the_prompt() {
        let reply = ShellResponder::new("cat").respond("hello\n").await.unwrap();
        assert!(reply.success());
        assert_eq!(reply.text(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_code_and_stderr_are_kept() {
        let reply = ShellResponder::new("echo oops >&2; exit 3")
            .respond("ignored")
            .await
            .unwrap();
        assert_eq!(reply.exit_code, 3);
        assert_eq!(reply.text(), "oops");
    }
}
