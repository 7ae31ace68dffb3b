//! Finding - one diagnostic reported by an analysis tool

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Severity ladder for findings
///
/// Every tool's native severity vocabulary is mapped onto these three values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One diagnostic produced by an analysis tool
///
/// Immutable after collection; identity for fixed/remaining bookkeeping is
/// the `(tool, code)` pair because line numbers shift once a file is
/// rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Finding {
    /// Name of the tool that reported this finding
    pub tool: String,

    /// Rule code (e.g. "E501", "arg-type")
    pub code: String,

    /// Severity on the three-value ladder
    pub severity: Severity,

    /// Repo-relative path of the offending file
    pub path: PathBuf,

    /// 1-indexed line number
    pub line: u32,

    /// 1-indexed column, when the tool reports one
    pub column: Option<u32>,

    /// Human-readable message
    pub message: String,

    /// Whether the tool considers this auto-fixable
    #[serde(default)]
    pub fixable: bool,
}

impl Finding {
    /// Create a finding with the fields every tool reports
    pub fn new(
        tool: impl Into<String>,
        code: impl Into<String>,
        severity: Severity,
        path: impl Into<PathBuf>,
        line: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            code: code.into(),
            severity,
            path: path.into(),
            line,
            column: None,
            message: message.into(),
            fixable: false,
        }
    }

    /// Builder method to set the column
    pub fn with_column(mut self, column: u32) -> Self {
        self.column = Some(column);
        self
    }

    /// Builder method to set the auto-fixable flag
    pub fn with_fixable(mut self, fixable: bool) -> Self {
        self.fixable = fixable;
        self
    }

    /// Learning-store pattern key: `"{tool}:{code}"`
    pub fn pattern_key(&self) -> String {
        format!("{}:{}", self.tool, self.code)
    }

    /// Identity used for fixed/remaining set arithmetic
    pub fn identity(&self) -> (&str, &str) {
        (&self.tool, &self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finding_pattern_key() {
        let finding = Finding::new("ruff", "E501", Severity::Warning, "src/app.py", 10, "line too long");
        assert_eq!(finding.pattern_key(), "ruff:E501");
    }

    #[test]
    fn test_finding_builders() {
        let finding = Finding::new("mypy", "arg-type", Severity::Error, "src/app.py", 3, "bad arg")
            .with_column(7)
            .with_fixable(false);

        assert_eq!(finding.column, Some(7));
        assert!(!finding.fixable);
        assert_eq!(finding.identity(), ("mypy", "arg-type"));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
    }

    #[test]
    fn test_finding_serde() {
        let finding = Finding::new("ruff", "F401", Severity::Warning, "a.py", 1, "unused import").with_fixable(true);

        let json = serde_json::to_string(&finding).unwrap();
        assert!(json.contains("\"severity\":\"warning\""));

        let back: Finding = serde_json::from_str(&json).unwrap();
        assert_eq!(back, finding);
    }
}
