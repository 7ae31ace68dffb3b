//! Ruff lint runner

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::domain::{Finding, Severity};

use super::{ToolError, ToolRunner, probe_binary, relativize};

/// One diagnostic in ruff's JSON report
#[derive(Debug, Deserialize)]
struct RuffDiagnostic {
    code: Option<String>,
    message: String,
    filename: String,
    location: RuffLocation,
    fix: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RuffLocation {
    row: u32,
    column: u32,
}

/// Runner for `ruff check --output-format json`
///
/// Exit 0 means clean, exit 1 means violations found; both carry a valid
/// JSON report on stdout. Exit 2 is an invocation failure.
pub struct RuffTool {
    binary: String,
}

impl RuffTool {
    pub fn new() -> Self {
        Self {
            binary: "ruff".to_string(),
        }
    }

    /// Use a non-default binary name (tests, hermetic environments)
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    fn parse_report(&self, stdout: &str, dir: &Path) -> Result<Vec<Finding>, ToolError> {
        let diagnostics: Vec<RuffDiagnostic> =
            serde_json::from_str(stdout).map_err(|e| ToolError::ParseFailed {
                tool: self.name().to_string(),
                message: e.to_string(),
            })?;

        let findings = diagnostics
            .into_iter()
            .map(|d| {
                // Syntax errors carry no code; attribute them to a fixed one
                let code = d.code.unwrap_or_else(|| "syntax-error".to_string());
                Finding::new(
                    self.name(),
                    code,
                    Severity::Warning,
                    relativize(Path::new(&d.filename), dir),
                    d.location.row,
                    d.message,
                )
                .with_column(d.location.column)
                .with_fixable(d.fix.is_some())
            })
            .collect();

        Ok(findings)
    }
}

impl Default for RuffTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRunner for RuffTool {
    fn name(&self) -> &'static str {
        "ruff"
    }

    async fn available(&self) -> bool {
        probe_binary(&self.binary).await
    }

    async fn run(&self, dir: &Path, files: Option<&[PathBuf]>) -> Result<Vec<Finding>, ToolError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["check", "--output-format", "json"]);
        match files {
            Some(files) => {
                cmd.args(files);
            }
            None => {
                cmd.arg(".");
            }
        }
        cmd.current_dir(dir);

        debug!(dir = %dir.display(), "RuffTool::run: invoking");
        let output = cmd.output().await.map_err(|e| ToolError::NotAvailable(format!("{}: {}", self.binary, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);

        // Exit 1 just means violations were found; the report still parses.
        // Anything else without a parseable report is an invocation failure.
        if !output.status.success() {
            if let Ok(findings) = self.parse_report(&stdout, dir) {
                return Ok(findings);
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::InvocationFailed {
                tool: self.name().to_string(),
                message: stderr.trim().to_string(),
            });
        }

        self.parse_report(&stdout, dir)
    }
}
