//! FileWork - the per-file unit of processing
//!
//! Created by the orchestrator after collection; mutated only by the
//! sub-workflow that owns it; discarded at session end.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::Finding;

/// Terminal and in-flight states of a FileWork
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Waiting for a sub-workflow
    #[default]
    Pending,
    /// Sub-workflow running
    InProgress,
    /// Verification left findings outstanding, another attempt follows
    Retrying,
    /// Commit landed on the main tree
    Completed,
    /// Terminal failure, no change visible on the main tree
    Failed,
    /// Excluded before processing (filters, fatal collection error)
    Skipped,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Retrying => write!(f, "retrying"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One file with findings, owned by exactly one sub-workflow at a time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileWork {
    /// Repo-relative path of the file
    pub path: PathBuf,

    /// Findings still outstanding (collection order preserved)
    pub findings: Vec<Finding>,

    /// Findings confirmed fixed by verification
    pub fixed: Vec<Finding>,

    /// Assistant invocations consumed so far
    pub attempts: u32,

    /// Attempt bound for this file
    pub max_attempts: u32,

    /// Current status
    pub status: FileStatus,

    /// Last error message (if any)
    pub last_error: Option<String>,
}

impl FileWork {
    /// Create a new FileWork for a file with at least one finding
    pub fn new(path: impl Into<PathBuf>, findings: Vec<Finding>, max_attempts: u32) -> Self {
        Self {
            path: path.into(),
            findings,
            fixed: Vec::new(),
            attempts: 0,
            max_attempts,
            status: FileStatus::Pending,
            last_error: None,
        }
    }

    /// Count of findings present at collection time
    pub fn original_count(&self) -> usize {
        self.findings.len() + self.fixed.len()
    }

    /// Consume one attempt
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Whether another attempt is allowed
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Move verified-fixed findings out of the outstanding set
    ///
    /// `remaining` is the verification result; everything outstanding that is
    /// not in it (by `(tool, code)` identity) is promoted to `fixed`.
    pub fn apply_verification(&mut self, remaining: Vec<Finding>) {
        let still_open: Vec<(String, String)> = remaining
            .iter()
            .map(|f| (f.tool.clone(), f.code.clone()))
            .collect();

        let (open, done): (Vec<Finding>, Vec<Finding>) = self
            .findings
            .drain(..)
            .partition(|f| still_open.iter().any(|(t, c)| (t.as_str(), c.as_str()) == f.identity()));

        self.fixed.extend(done);
        self.findings = open;
    }

    /// Update the status
    pub fn set_status(&mut self, status: FileStatus) {
        self.status = status;
    }

    /// Set an error message
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// Check if the work is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            FileStatus::Completed | FileStatus::Failed | FileStatus::Skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;

    fn finding(code: &str, line: u32) -> Finding {
        Finding::new("ruff", code, Severity::Warning, "src/app.py", line, "msg")
    }

    #[test]
    fn test_file_work_new() {
        let work = FileWork::new("src/app.py", vec![finding("E501", 1), finding("F401", 2)], 3);
        assert_eq!(work.status, FileStatus::Pending);
        assert_eq!(work.attempts, 0);
        assert_eq!(work.original_count(), 2);
        assert!(!work.is_terminal());
    }

    #[test]
    fn test_attempts_and_retry_bound() {
        let mut work = FileWork::new("a.py", vec![finding("E501", 1)], 2);
        assert!(work.can_retry());

        work.record_attempt();
        assert!(work.can_retry());

        work.record_attempt();
        assert!(!work.can_retry());
        assert_eq!(work.attempts, 2);
    }

    #[test]
    fn test_apply_verification_partitions() {
        let mut work = FileWork::new("a.py", vec![finding("E501", 1), finding("F401", 2)], 3);

        // Verification says F401 survived (line moved, identity matches)
        work.apply_verification(vec![finding("F401", 5)]);

        assert_eq!(work.fixed.len(), 1);
        assert_eq!(work.fixed[0].code, "E501");
        assert_eq!(work.findings.len(), 1);
        assert_eq!(work.findings[0].code, "F401");
        assert_eq!(work.original_count(), 2);
    }

    #[test]
    fn test_apply_verification_all_fixed() {
        let mut work = FileWork::new("a.py", vec![finding("E501", 1)], 3);
        work.apply_verification(vec![]);

        assert!(work.findings.is_empty());
        assert_eq!(work.fixed.len(), 1);
    }

    #[test]
    fn test_terminal_states() {
        let mut work = FileWork::new("a.py", vec![finding("E501", 1)], 3);

        work.set_status(FileStatus::InProgress);
        assert!(!work.is_terminal());

        work.set_status(FileStatus::Completed);
        assert!(work.is_terminal());

        work.set_status(FileStatus::Failed);
        assert!(work.is_terminal());

        work.set_status(FileStatus::Skipped);
        assert!(work.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        let mut work = FileWork::new("a.py", vec![finding("E501", 1)], 3);
        work.set_status(FileStatus::InProgress);
        work.set_error("assistant timed out");

        let json = serde_json::to_string(&work).unwrap();
        assert!(json.contains("\"status\":\"in_progress\""));

        let back: FileWork = serde_json::from_str(&json).unwrap();
        assert_eq!(back.last_error, Some("assistant timed out".to_string()));
    }
}
