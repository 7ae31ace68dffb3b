//! Test-suite execution inside a sandbox

use std::path::Path;
use std::time::Duration;

/// Result of running the configured test command
#[derive(Debug, Clone)]
pub struct TestRunResult {
    /// Exit code from the test command
    pub exit_code: i32,

    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// How long the run took
    pub duration_ms: u64,
}

impl TestRunResult {
    /// Check if the run passed
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// Whichever stream carries the interesting output
    pub fn output(&self) -> &str {
        if !self.stdout.is_empty() { &self.stdout } else { &self.stderr }
    }
}

/// Run a test command in the given working directory
///
/// `scope` appends a path argument for file-scoped (quick) runs. A timeout
/// of zero means none.
pub async fn run_test_command(
    command: &str,
    scope: Option<&Path>,
    workdir: &Path,
    timeout: Duration,
) -> eyre::Result<TestRunResult> {
    let full_command = match scope {
        Some(path) => format!("{} {}", command, path.display()),
        None => command.to_string(),
    };

    let start = std::time::Instant::now();

    let run = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&full_command)
        .current_dir(workdir)
        .output();

    let output = if timeout.is_zero() {
        run.await?
    } else {
        tokio::time::timeout(timeout, run).await??
    };

    let duration_ms = start.elapsed().as_millis() as u64;

    Ok(TestRunResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms,
    })
}
