//! SessionState - one end-to-end run of the orchestrator

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::FileWork;

/// Session terminal status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Sub-workflows in flight
    #[default]
    Running,
    /// Every file succeeded (vacuously true for a clean tree)
    Completed,
    /// At least one file failed, or the session was cancelled
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// How findings are grouped into a single prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingStrategy {
    /// All findings for the file, capped by the per-prompt bound
    #[default]
    BatchErrors,
    /// Only findings of the file's most frequent rule code
    OneErrorType,
    /// All findings regardless of the per-prompt bound
    AllErrors,
}

impl std::str::FromStr for ProcessingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "batch-errors" | "batch" => Ok(Self::BatchErrors),
            "one-error-type" | "one" => Ok(Self::OneErrorType),
            "all-errors" | "all" => Ok(Self::AllErrors),
            _ => Err(format!(
                "Unknown strategy: {}. Use: batch-errors, one-error-type, or all-errors",
                s
            )),
        }
    }
}

/// When and how the test suite runs for a fixed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TestMode {
    /// Whole suite in the sandbox
    #[default]
    Full,
    /// Best-effort file-scoped subset
    Quick,
    /// Deferred to session teardown
    Final,
    /// Skip entirely
    None,
}

impl std::str::FromStr for TestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "quick" => Ok(Self::Quick),
            "final" => Ok(Self::Final),
            "none" => Ok(Self::None),
            _ => Err(format!("Unknown test mode: {}. Use: full, quick, final, or none", s)),
        }
    }
}

/// State of one orchestrator run
///
/// `id` and `base_commit` are immutable after initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Timestamped unique session id
    pub id: String,

    /// Commit every sandbox is rooted on
    pub base_commit: String,

    /// Per-file work units, sorted by path
    pub files: Vec<FileWork>,

    /// Enabled tool names
    pub enabled_tools: Vec<String>,

    /// Prompt grouping strategy
    pub strategy: ProcessingStrategy,

    /// Attempt bound applied to each file
    pub max_attempts: u32,

    /// Whether sandbox test runs are enabled
    pub run_tests: bool,

    /// Whether per-file sandboxes are used
    pub use_isolation: bool,

    /// Bounded concurrency for sub-workflows
    pub max_parallel_files: usize,

    /// Paths committed successfully, completion order
    pub successful_fixes: Vec<PathBuf>,

    /// Paths that failed, completion order
    pub failed_fixes: Vec<PathBuf>,

    /// Sum of findings fixed across committed files
    pub total_errors_fixed: usize,

    /// Terminal status
    pub status: SessionStatus,

    /// Final error message (if any)
    pub error: Option<String>,
}

impl SessionState {
    /// Allocate a new session rooted at the given commit
    pub fn new(base_commit: impl Into<String>) -> Self {
        let id = format!(
            "{}-{}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            &uuid::Uuid::now_v7().simple().to_string()[..8]
        );

        Self {
            id,
            base_commit: base_commit.into(),
            files: Vec::new(),
            enabled_tools: Vec::new(),
            strategy: ProcessingStrategy::default(),
            max_attempts: 3,
            run_tests: true,
            use_isolation: true,
            max_parallel_files: 1,
            successful_fixes: Vec::new(),
            failed_fixes: Vec::new(),
            total_errors_fixed: 0,
            status: SessionStatus::Running,
            error: None,
        }
    }

    /// Record one successful file in completion order
    pub fn record_success(&mut self, path: PathBuf, errors_fixed: usize) {
        self.successful_fixes.push(path);
        self.total_errors_fixed += errors_fixed;
    }

    /// Record one failed file in completion order
    pub fn record_failure(&mut self, path: PathBuf) {
        self.failed_fixes.push(path);
    }

    /// Compute the terminal status from aggregated results
    pub fn finalize(&mut self) {
        self.status = if self.failed_fixes.is_empty() {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_shape() {
        let state = SessionState::new("abc123");
        // yyyymmdd-HHMMSS dash 8 hex chars
        assert_eq!(state.id.len(), 15 + 1 + 8);
        assert_eq!(state.base_commit, "abc123");
    }

    #[test]
    fn test_session_ids_unique() {
        let a = SessionState::new("c");
        let b = SessionState::new("c");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_finalize_completed_when_no_failures() {
        let mut state = SessionState::new("c");
        state.record_success(PathBuf::from("a.py"), 2);
        state.finalize();

        assert_eq!(state.status, SessionStatus::Completed);
        assert_eq!(state.total_errors_fixed, 2);
    }

    #[test]
    fn test_finalize_failed_on_any_failure() {
        let mut state = SessionState::new("c");
        state.record_success(PathBuf::from("a.py"), 1);
        state.record_failure(PathBuf::from("b.py"));
        state.finalize();

        assert_eq!(state.status, SessionStatus::Failed);
    }

    #[test]
    fn test_empty_session_completes() {
        let mut state = SessionState::new("c");
        state.finalize();
        assert_eq!(state.status, SessionStatus::Completed);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "one-error-type".parse::<ProcessingStrategy>().unwrap(),
            ProcessingStrategy::OneErrorType
        );
        assert_eq!("batch".parse::<ProcessingStrategy>().unwrap(), ProcessingStrategy::BatchErrors);
        assert!("bogus".parse::<ProcessingStrategy>().is_err());
    }

    #[test]
    fn test_test_mode_from_str() {
        assert_eq!("quick".parse::<TestMode>().unwrap(), TestMode::Quick);
        assert_eq!("NONE".parse::<TestMode>().unwrap(), TestMode::None);
        assert!("sometimes".parse::<TestMode>().is_err());
    }
}
