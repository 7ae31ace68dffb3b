//! Mypy type-check runner

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::domain::{Finding, Severity};

use super::{ToolError, ToolRunner, probe_binary, relativize};

/// One diagnostic line in mypy's JSON output
#[derive(Debug, Deserialize)]
struct MypyDiagnostic {
    file: String,
    line: u32,
    column: i64,
    message: String,
    code: Option<String>,
    severity: String,
}

/// Runner for `mypy --output json`
///
/// The report is JSON-lines: one object per diagnostic. Exit 0 means clean,
/// exit 1 means issues found; exit 2 is an invocation failure (bad flags,
/// unreadable config).
pub struct MypyTool {
    binary: String,
}

impl MypyTool {
    pub fn new() -> Self {
        Self {
            binary: "mypy".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    fn map_severity(severity: &str) -> Severity {
        match severity {
            "error" => Severity::Error,
            "note" => Severity::Info,
            _ => Severity::Warning,
        }
    }

    fn parse_report(&self, stdout: &str, dir: &Path) -> Result<Vec<Finding>, ToolError> {
        let mut findings = Vec::new();

        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            let diag: MypyDiagnostic = serde_json::from_str(line).map_err(|e| ToolError::ParseFailed {
                tool: self.name().to_string(),
                message: format!("{}: {}", e, line),
            })?;

            // Notes attach to a preceding error and carry no code
            let code = match diag.code {
                Some(code) => code,
                None => continue,
            };

            let mut finding = Finding::new(
                self.name(),
                code,
                Self::map_severity(&diag.severity),
                relativize(Path::new(&diag.file), dir),
                diag.line,
                diag.message,
            );
            // mypy reports column 0 when it has no precise location
            if diag.column > 0 {
                finding = finding.with_column(diag.column as u32);
            }
            findings.push(finding);
        }

        Ok(findings)
    }
}

impl Default for MypyTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRunner for MypyTool {
    fn name(&self) -> &'static str {
        "mypy"
    }

    async fn available(&self) -> bool {
        probe_binary(&self.binary).await
    }

    async fn run(&self, dir: &Path, files: Option<&[PathBuf]>) -> Result<Vec<Finding>, ToolError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["--output", "json", "--no-error-summary"]);
        match files {
            Some(files) => {
                cmd.args(files);
            }
            None => {
                cmd.arg(".");
            }
        }
        cmd.current_dir(dir);

        debug!(dir = %dir.display(), "MypyTool::run: invoking");
        let output = cmd.output().await.map_err(|e| ToolError::NotAvailable(format!("{}: {}", self.binary, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let exit_code = output.status.code().unwrap_or(-1);

        // Exit 1 with a parseable report is success-with-findings
        if exit_code != 0 && exit_code != 1 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::InvocationFailed {
                tool: self.name().to_string(),
                message: stderr.trim().to_string(),
            });
        }

        self.parse_report(&stdout, dir)
    }
}
