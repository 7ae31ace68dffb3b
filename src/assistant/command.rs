//! Subprocess-backed assistant

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{Assistant, AssistantError};

/// Assistant driven by a configured argv, prompt supplied on stdin
///
/// The subprocess runs with the sandbox as its working directory; the
/// prompt names the target file. The timeout is mandatory and the process
/// is killed when it elapses.
pub struct CommandAssistant {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandAssistant {
    /// Create an assistant from an argv and timeout
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }
}

#[async_trait]
impl Assistant for CommandAssistant {
    fn name(&self) -> &str {
        self.program().unwrap_or("<unconfigured>")
    }

    async fn available(&self) -> bool {
        let Some(program) = self.program() else {
            return false;
        };
        // Spawnable is enough; not every assistant understands --version,
        // so a non-zero exit still counts as present.
        Command::new(program).arg("--version").output().await.is_ok()
    }

    async fn rewrite(&self, workdir: &Path, file: &Path, prompt: &str) -> Result<(), AssistantError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| AssistantError::Unavailable("assistant command is empty".to_string()))?;

        debug!(
            %program,
            file = %file.display(),
            workdir = %workdir.display(),
            "CommandAssistant::rewrite: spawning"
        );

        let mut child = Command::new(program)
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AssistantError::Unavailable(format!("{}: {}", program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // The assistant may exit before reading everything; that shows
            // up in its exit status, not here.
            let _ = stdin.write_all(prompt.as_bytes()).await;
            let _ = stdin.shutdown().await;
        }

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => {
                // Dropping the timed-out future kills the child (kill_on_drop)
                Err(AssistantError::Timeout {
                    seconds: self.timeout.as_secs(),
                })
            }
            Ok(Err(e)) => Err(AssistantError::Failed {
                exit_code: -1,
                stderr: e.to_string(),
            }),
            Ok(Ok(output)) if !output.status.success() => Err(AssistantError::Failed {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            Ok(Ok(_)) => Ok(()),
        }
    }
}
