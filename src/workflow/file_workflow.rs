//! FileWorkflow - the per-file state machine

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::assistant::{AssistantError, AssistantInvoker};
use crate::domain::{FileStatus, FileWork, Finding, ProcessingStrategy, TestMode};
use crate::learning::{LearningStore, Outcome, Strategy};
use crate::patch::{PatchBroker, PatchError};
use crate::prompt::{PromptContext, render, select_findings};
use crate::sandbox::{SandboxError, SandboxHandle, SandboxManager};
use crate::tools::{ToolError, ToolRunner};
use crate::workflow::testrun::run_test_command;

/// Error types for the sub-workflow, carrying the originating cause
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("sandbox: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("tool: {0}")]
    Tool(#[from] ToolError),

    #[error("patch: {0}")]
    Patch(#[from] PatchError),

    #[error("assistant: {0}")]
    Assistant(#[from] AssistantError),

    #[error("tests failed (exit {exit_code})")]
    TestsFailed { exit_code: i32, output: String },

    #[error("sandbox produced an empty patch")]
    EmptyPatch,

    #[error("{remaining} finding(s) remain after {attempts} attempt(s)")]
    RetriesExhausted { remaining: usize, attempts: u32 },

    #[error("cancelled")]
    Cancelled,

    #[error("io: {0}")]
    Io(String),
}

/// Per-session parameters shared by every sub-workflow
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub session_id: String,
    pub base_commit: String,
    pub repo_root: PathBuf,
    pub strategy: ProcessingStrategy,
    pub max_errors_per_prompt: usize,
    pub run_tests: bool,
    pub test_mode: TestMode,
    pub test_command: String,
    pub test_timeout_ms: u64,
    pub use_isolation: bool,
}

/// Aggregation record returned by one sub-workflow
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub status: FileStatus,
    pub errors_fixed: usize,
    pub error: Option<String>,
}

/// Workflow states, driven in order by [`FileWorkflow::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    CreateSandbox,
    InvokeAssistant,
    Verify,
    RunTests,
    ExtractPatch,
    ApplyCommit,
    Done,
}

/// Mutable state threaded through the step loop
struct RunState {
    work: FileWork,
    workdir: PathBuf,
    sandbox: Option<SandboxHandle>,
    patch: String,
    last_strategy: Option<Strategy>,
    change_produced: bool,
    cancelled: bool,
}

/// Executes one FileWork end-to-end inside one sandbox
pub struct FileWorkflow {
    config: WorkflowConfig,
    tools: Vec<Arc<dyn ToolRunner>>,
    sandboxes: Arc<SandboxManager>,
    broker: Arc<PatchBroker>,
    invoker: Arc<AssistantInvoker>,
    mapper: Arc<LearningStore>,
    apply_lock: Arc<tokio::sync::Mutex<()>>,
    cancel: watch::Receiver<bool>,
}

impl FileWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: WorkflowConfig,
        tools: Vec<Arc<dyn ToolRunner>>,
        sandboxes: Arc<SandboxManager>,
        broker: Arc<PatchBroker>,
        invoker: Arc<AssistantInvoker>,
        mapper: Arc<LearningStore>,
        apply_lock: Arc<tokio::sync::Mutex<()>>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            tools,
            sandboxes,
            broker,
            invoker,
            mapper,
            apply_lock,
            cancel,
        }
    }

    /// Process one file to a terminal status
    ///
    /// The sandbox is destroyed on every path out, success or failure.
    pub async fn run(&self, mut work: FileWork) -> FileOutcome {
        if work.findings.is_empty() {
            work.set_status(FileStatus::Skipped);
            return FileOutcome {
                path: work.path.clone(),
                status: FileStatus::Skipped,
                errors_fixed: 0,
                error: None,
            };
        }

        work.set_status(FileStatus::InProgress);
        let mut state = RunState {
            work,
            workdir: self.config.repo_root.clone(),
            sandbox: None,
            patch: String::new(),
            last_strategy: None,
            change_produced: false,
            cancelled: false,
        };

        let result = self.drive(&mut state).await;

        if let Some(handle) = state.sandbox.take() {
            self.sandboxes.destroy(&handle.id).await;
        }

        match result {
            Ok(()) => {
                self.record_terminal(&state, true);
                state.work.set_status(FileStatus::Completed);
                info!(
                    path = %state.work.path.display(),
                    fixed = state.work.fixed.len(),
                    "File completed"
                );
                FileOutcome {
                    path: state.work.path.clone(),
                    status: FileStatus::Completed,
                    errors_fixed: state.work.fixed.len(),
                    error: None,
                }
            }
            Err(e) => {
                state.cancelled = matches!(e, WorkflowError::Cancelled);
                self.record_terminal(&state, false);
                state.work.set_status(FileStatus::Failed);
                state.work.set_error(e.to_string());
                warn!(path = %state.work.path.display(), "File failed: {}", e);
                FileOutcome {
                    path: state.work.path.clone(),
                    status: FileStatus::Failed,
                    errors_fixed: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Step loop: each arm performs its effect and yields the next state
    async fn drive(&self, state: &mut RunState) -> Result<(), WorkflowError> {
        let mut step = Step::CreateSandbox;

        loop {
            self.check_cancel()?;
            debug!(?step, path = %state.work.path.display(), "FileWorkflow::drive: transition");

            step = match step {
                Step::CreateSandbox => {
                    if self.config.use_isolation {
                        let id = self.sandbox_id(&state.work.path);
                        let handle = self.sandboxes.create(&id, &self.config.base_commit).await?;
                        state.workdir = handle.path.clone();
                        state.sandbox = Some(handle);
                    }
                    Step::InvokeAssistant
                }

                Step::InvokeAssistant => {
                    self.invoke_assistant(state).await?;
                    Step::Verify
                }

                Step::Verify => {
                    let remaining = self.verify(state).await?;
                    state.work.apply_verification(remaining);

                    if state.work.findings.is_empty() {
                        Step::RunTests
                    } else if state.work.can_retry() {
                        state.work.set_status(FileStatus::Retrying);
                        Step::InvokeAssistant
                    } else {
                        return Err(WorkflowError::RetriesExhausted {
                            remaining: state.work.findings.len(),
                            attempts: state.work.attempts,
                        });
                    }
                }

                Step::RunTests => {
                    self.run_tests(state).await?;
                    Step::ExtractPatch
                }

                Step::ExtractPatch => {
                    if self.config.use_isolation {
                        let sandbox = state.sandbox.as_ref().ok_or(WorkflowError::EmptyPatch)?;
                        state.patch = self.broker.extract(&sandbox.path).await?;
                        if state.patch.trim().is_empty() {
                            return Err(WorkflowError::EmptyPatch);
                        }
                    }
                    Step::ApplyCommit
                }

                Step::ApplyCommit => {
                    let _guard = self.apply_lock.lock().await;
                    // A cancellation that raced us to the lock wins
                    self.check_cancel()?;

                    if self.config.use_isolation {
                        self.broker.apply(&state.patch).await?;
                    }
                    let message = self.commit_message(&state.work);
                    self.broker.commit(&[state.work.path.clone()], &message).await?;
                    Step::Done
                }

                Step::Done => return Ok(()),
            };
        }
    }

    /// Run the assistant with adaptive fallback against the remaining budget
    async fn invoke_assistant(&self, state: &mut RunState) -> Result<(), WorkflowError> {
        let budget = state.work.max_attempts.saturating_sub(state.work.attempts);
        if budget == 0 {
            return Err(WorkflowError::RetriesExhausted {
                remaining: state.work.findings.len(),
                attempts: state.work.attempts,
            });
        }

        let file_content = tokio::fs::read_to_string(state.workdir.join(&state.work.path))
            .await
            .map_err(|e| WorkflowError::Io(format!("{}: {}", state.work.path.display(), e)))?;

        // Outcomes for the whole file are keyed on its first finding
        let primary: Finding = state.work.findings[0].clone();
        let selected = select_findings(
            &state.work.findings,
            self.config.strategy,
            self.config.max_errors_per_prompt,
        );

        let file_path = state.work.path.clone();
        let attempt = state.work.attempts + 1;
        let max_attempts = state.work.max_attempts;

        let factory = move |adaptive: &crate::learning::AdaptiveStrategy| {
            render(&PromptContext {
                file_path: file_path.clone(),
                file_content: file_content.clone(),
                findings: selected.clone(),
                adaptive: adaptive.clone(),
                attempt,
                max_attempts,
            })
        };

        let retry_count = state.work.attempts;
        let outcome = self
            .guarded(self.invoker.invoke_with_fallback(
                &state.workdir,
                &state.work.path,
                &primary,
                factory,
                budget,
                retry_count,
            ))
            .await?;

        match outcome {
            Ok(fallback) => {
                state.work.attempts += fallback.attempts_used;
                state.last_strategy = Some(fallback.strategy);
                state.change_produced = true;
                Ok(())
            }
            Err(e) => {
                // Mechanical attempts were recorded by the invoker as they ran
                Err(WorkflowError::Assistant(e))
            }
        }
    }

    /// Re-run every enabled tool against the file; return surviving findings
    async fn verify(&self, state: &RunState) -> Result<Vec<Finding>, WorkflowError> {
        let original: BTreeSet<(String, String)> = state
            .work
            .findings
            .iter()
            .map(|f| (f.tool.clone(), f.code.clone()))
            .collect();

        let mut remaining = Vec::new();
        for tool in &self.tools {
            let reported = tool.run(&state.workdir, Some(std::slice::from_ref(&state.work.path))).await?;
            remaining.extend(
                reported
                    .into_iter()
                    .filter(|f| f.path == state.work.path)
                    .filter(|f| original.contains(&(f.tool.clone(), f.code.clone()))),
            );
        }

        debug!(
            path = %state.work.path.display(),
            remaining = remaining.len(),
            "FileWorkflow::verify: completed"
        );
        Ok(remaining)
    }

    /// Execute the configured test-validation mode
    async fn run_tests(&self, state: &RunState) -> Result<(), WorkflowError> {
        if !self.config.run_tests {
            return Ok(());
        }

        let scope = match self.config.test_mode {
            TestMode::Full => None,
            TestMode::Quick => Some(state.work.path.as_path()),
            // Final defers to session teardown; None skips outright
            TestMode::Final | TestMode::None => return Ok(()),
        };

        let result = self
            .guarded(run_test_command(
                &self.config.test_command,
                scope,
                &state.workdir,
                Duration::from_millis(self.config.test_timeout_ms),
            ))
            .await?
            .map_err(|e| WorkflowError::TestsFailed {
                exit_code: -1,
                output: e.to_string(),
            })?;

        if !result.passed() {
            return Err(WorkflowError::TestsFailed {
                exit_code: result.exit_code,
                output: result.output().to_string(),
            });
        }

        Ok(())
    }

    /// Conventional-commits message for one fixed file
    fn commit_message(&self, work: &FileWork) -> String {
        let basename = work
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| work.path.display().to_string());

        let mut message = format!("fix(quality): resolve {} issues in {}\n\n", work.fixed.len(), basename);
        for finding in &work.fixed {
            message.push_str(&format!("- {}\n", finding.code));
        }
        message.push_str(&format!("\nFixed by: stomper v{}", env!("CARGO_PKG_VERSION")));
        message
    }

    /// Record terminal outcomes per distinct (tool, code)
    ///
    /// Success is recorded only for committed fixes. A failure after the
    /// assistant produced a change is recorded against every attempted
    /// code; mechanical failures were already recorded per attempt by the
    /// invoker, and cancellations record nothing.
    fn record_terminal(&self, state: &RunState, success: bool) {
        let strategy = state.last_strategy.unwrap_or(Strategy::Normal);

        if success {
            for (tool, code) in distinct_identities(&state.work.fixed) {
                self.mapper
                    .record(&tool, &code, Outcome::Success, strategy, Some(&state.work.path));
            }
        } else if state.change_produced && !state.cancelled {
            let attempted: Vec<&Finding> = state.work.fixed.iter().chain(state.work.findings.iter()).collect();
            let identities = distinct_identities(attempted.into_iter());
            for (tool, code) in identities {
                self.mapper
                    .record(&tool, &code, Outcome::Failure, strategy, Some(&state.work.path));
            }
        }
    }

    /// Sandbox id: session id plus file stem, uniquified on collision
    fn sandbox_id(&self, path: &Path) -> String {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let base = format!("{}_{}", self.config.session_id, stem);

        if self.sandboxes.list_active().contains(&base) {
            let suffix = &uuid::Uuid::now_v7().simple().to_string()[..8];
            format!("{}-{}", base, suffix)
        } else {
            base
        }
    }

    fn check_cancel(&self) -> Result<(), WorkflowError> {
        if *self.cancel.borrow() {
            return Err(WorkflowError::Cancelled);
        }
        Ok(())
    }

    /// Race a long-running step against cancellation
    ///
    /// Dropping the step's future on cancellation kills any subprocess it
    /// spawned (tokio kill-on-drop), so an in-flight assistant or test run
    /// does not outlive the session.
    async fn guarded<F: std::future::Future>(&self, fut: F) -> Result<F::Output, WorkflowError> {
        let mut cancel = self.cancel.clone();
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => return Ok(out),
                changed = cancel.changed() => {
                    if changed.is_err() {
                        // Cancellation source is gone; just finish the step
                        return Ok(fut.await);
                    }
                    if *cancel.borrow() {
                        return Err(WorkflowError::Cancelled);
                    }
                }
            }
        }
    }
}

fn distinct_identities<'a>(findings: impl IntoIterator<Item = &'a Finding>) -> Vec<(String, String)> {
    let mut identities = Vec::new();
    for finding in findings {
        let identity = (finding.tool.clone(), finding.code.clone());
        if !identities.contains(&identity) {
            identities.push(identity);
        }
    }
    identities
}
