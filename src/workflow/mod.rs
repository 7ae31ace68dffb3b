//! Per-file sub-workflow
//!
//! Processes exactly one FileWork end-to-end inside one sandbox:
//! create worktree, prompt, invoke assistant, verify, test, extract patch,
//! apply and commit under the session lock, destroy worktree, record
//! outcomes. On return, either a commit for the file exists on the main
//! tree or no change is visible there.

mod file_workflow;
mod testrun;

pub use file_workflow::{FileOutcome, FileWorkflow, WorkflowConfig, WorkflowError};
pub use testrun::{TestRunResult, run_test_command};
