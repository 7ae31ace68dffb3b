//! Session - initialize, collect, fan out, aggregate, tear down

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Context, Result, bail};
use tokio::sync::{Semaphore, mpsc, watch};
use tracing::{debug, info, warn};

use crate::assistant::{Assistant, AssistantInvoker};
use crate::domain::{
    FileStatus, FileWork, Finding, ProcessingStrategy, SessionState, SessionStatus, TestMode,
};
use crate::learning::{LearningOptions, LearningStore};
use crate::patch::PatchBroker;
use crate::sandbox::{SandboxConfig, SandboxManager};
use crate::session::reporter::{Reporter, TracingReporter};
use crate::tools::ToolRegistry;
use crate::workflow::{FileOutcome, FileWorkflow, WorkflowConfig, run_test_command};

/// Everything a session run needs, resolved from config and CLI flags
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Main repository root
    pub root: PathBuf,

    /// Enabled tool names
    pub tools: Vec<String>,

    pub strategy: ProcessingStrategy,
    pub max_attempts: u32,
    pub max_errors_per_prompt: usize,
    pub run_tests: bool,
    pub test_mode: TestMode,
    pub test_command: String,
    pub test_timeout_ms: u64,
    pub use_isolation: bool,
    pub max_parallel_files: usize,
    pub continue_on_error: bool,

    /// Glob patterns restricting which files are processed
    pub file_filters: Vec<String>,

    pub learning: LearningOptions,
}

impl SessionConfig {
    /// Defaults for a repository root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tools: vec!["ruff".to_string(), "mypy".to_string()],
            strategy: ProcessingStrategy::default(),
            max_attempts: 3,
            max_errors_per_prompt: 0,
            run_tests: true,
            test_mode: TestMode::Full,
            test_command: "pytest".to_string(),
            test_timeout_ms: 0,
            use_isolation: true,
            max_parallel_files: 1,
            continue_on_error: true,
            file_filters: Vec::new(),
            learning: LearningOptions::default(),
        }
    }
}

/// One end-to-end fixing session
pub struct Session {
    config: SessionConfig,
    registry: ToolRegistry,
    assistant: Arc<dyn Assistant>,
    reporter: Arc<dyn Reporter>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl Session {
    pub fn new(config: SessionConfig, registry: ToolRegistry, assistant: Arc<dyn Assistant>) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            config,
            registry,
            assistant,
            reporter: Arc::new(TracingReporter),
            cancel_tx,
            cancel_rx,
        }
    }

    /// Replace the progress reporter
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Request cooperative cancellation of the session
    ///
    /// In-flight sub-workflows stop at their next state transition; files
    /// already committed stay committed.
    pub fn cancel(&self) {
        info!("Session cancellation requested");
        let _ = self.cancel_tx.send(true);
    }

    /// Run the session to completion
    pub async fn run(&self) -> Result<SessionState> {
        let root = self
            .config
            .root
            .canonicalize()
            .with_context(|| format!("Repository root not found: {}", self.config.root.display()))?;

        let broker = Arc::new(PatchBroker::new(&root));
        let base_commit = broker.head().await.context("Failed to resolve HEAD")?;

        let mut state = SessionState::new(base_commit.clone());
        state.enabled_tools = self.config.tools.clone();
        state.strategy = self.config.strategy;
        state.max_attempts = self.config.max_attempts;
        state.run_tests = self.config.run_tests;
        state.use_isolation = self.config.use_isolation;
        state.max_parallel_files = self.config.max_parallel_files.clamp(1, 16);

        // An enabled tool that cannot run is fatal before any work starts
        let tools = self.registry.select(&self.config.tools)?;
        for tool in &tools {
            if !tool.available().await {
                bail!("Tool not available: {}", tool.name());
            }
        }

        let sandboxes = Arc::new(SandboxManager::new(SandboxConfig::with_repo(&root)));
        if self.config.use_isolation {
            sandboxes.sweep_stale().await;
        }

        // Collect findings on the main tree, never a sandbox
        let mut by_file: BTreeMap<PathBuf, Vec<Finding>> = BTreeMap::new();
        for tool in &tools {
            let findings = tool
                .run(&root, None)
                .await
                .with_context(|| format!("Collection failed for tool {}", tool.name()))?;
            for finding in findings {
                if self.matches_filters(&finding.path) {
                    by_file.entry(finding.path.clone()).or_default().push(finding);
                }
            }
        }

        state.files = by_file
            .into_iter()
            .map(|(path, findings)| FileWork::new(path, findings, self.config.max_attempts))
            .collect();

        self.reporter.session_started(&state.id, state.files.len());
        info!(
            session_id = %state.id,
            base_commit = %base_commit,
            files = state.files.len(),
            "Session initialized"
        );

        if state.files.is_empty() {
            state.finalize();
            self.reporter.session_completed(&state);
            return Ok(state);
        }

        let mapper = Arc::new(LearningStore::open_with(&root, self.config.learning.clone())?);
        let invoker = Arc::new(AssistantInvoker::new(self.assistant.clone(), mapper.clone()));
        let apply_lock = Arc::new(tokio::sync::Mutex::new(()));

        let workflow = Arc::new(FileWorkflow::new(
            WorkflowConfig {
                session_id: state.id.clone(),
                base_commit,
                repo_root: root.clone(),
                strategy: self.config.strategy,
                max_errors_per_prompt: self.config.max_errors_per_prompt,
                run_tests: self.config.run_tests,
                test_mode: self.config.test_mode,
                test_command: self.config.test_command.clone(),
                test_timeout_ms: self.config.test_timeout_ms,
                use_isolation: self.config.use_isolation,
            },
            tools,
            sandboxes.clone(),
            broker,
            invoker,
            mapper.clone(),
            apply_lock,
            self.cancel_rx.clone(),
        ));

        self.fan_out(&mut state, workflow).await;

        // Deferred test validation: one suite run on the main tree after all
        // commits have landed
        let mut final_tests_failed = false;
        if self.config.run_tests
            && self.config.test_mode == TestMode::Final
            && !state.successful_fixes.is_empty()
            && !*self.cancel_rx.borrow()
        {
            match run_test_command(
                &self.config.test_command,
                None,
                &root,
                std::time::Duration::from_millis(self.config.test_timeout_ms),
            )
            .await
            {
                Ok(result) if !result.passed() => {
                    warn!(exit_code = result.exit_code, "Final test validation failed");
                    final_tests_failed = true;
                }
                Ok(_) => debug!("Final test validation passed"),
                Err(e) => {
                    warn!("Final test validation could not run: {}", e);
                    final_tests_failed = true;
                }
            }
        }

        // Teardown: persist learning, then make sure no sandbox survived
        if let Err(e) = mapper.save() {
            warn!("Final learning store save failed: {}", e);
        }

        let stragglers = sandboxes.list_active();
        if !stragglers.is_empty() {
            warn!(count = stragglers.len(), "Active sandboxes at teardown, destroying");
            for id in stragglers {
                sandboxes.destroy(&id).await;
            }
        }

        if *self.cancel_rx.borrow() {
            state.status = SessionStatus::Failed;
            state.error = Some("session cancelled".to_string());
        } else {
            state.finalize();
            if state.status == SessionStatus::Failed {
                state.error = Some(format!("{} file(s) failed", state.failed_fixes.len()));
            } else if final_tests_failed {
                state.status = SessionStatus::Failed;
                state.error = Some("final test validation failed".to_string());
            }
        }

        self.reporter.session_completed(&state);
        Ok(state)
    }

    /// Spawn sub-workflows with permit-before-spawn ordering and aggregate
    /// outcomes in completion order
    async fn fan_out(&self, state: &mut SessionState, workflow: Arc<FileWorkflow>) {
        let semaphore = Arc::new(Semaphore::new(state.max_parallel_files));
        let (tx, mut rx) = mpsc::channel::<FileOutcome>(state.files.len());

        let mut pending = 0usize;
        for work in state.files.clone() {
            // Acquiring before spawning makes permit order equal sorted-path
            // order, so max_parallel_files = 1 degenerates to sequential
            // processing without a special case.
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            // Every finished workflow sends its outcome before releasing its
            // permit, so draining here observes any failure that should stop
            // the spawn loop.
            while let Ok(outcome) = rx.try_recv() {
                pending -= 1;
                self.aggregate(state, outcome);
            }

            if *self.cancel_rx.borrow() {
                debug!(path = %work.path.display(), "Skipping unspawned file after cancellation");
                set_file_status(state, &work.path, FileStatus::Skipped);
                drop(permit);
                continue;
            }

            self.reporter.file_started(&work.path);
            let workflow = workflow.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = workflow.run(work).await;
                let _ = tx.send(outcome).await;
                drop(permit);
            });
            pending += 1;
        }
        drop(tx);

        while pending > 0 {
            match rx.recv().await {
                Some(outcome) => {
                    pending -= 1;
                    self.aggregate(state, outcome);
                }
                None => break,
            }
        }
    }

    /// Fold one sub-workflow record into the session state
    fn aggregate(&self, state: &mut SessionState, outcome: FileOutcome) {
        set_file_status(state, &outcome.path, outcome.status);

        match outcome.status {
            FileStatus::Completed => {
                self.reporter.file_completed(&outcome.path, outcome.errors_fixed);
                state.record_success(outcome.path, outcome.errors_fixed);
            }
            FileStatus::Failed => {
                let cause = outcome.error.unwrap_or_else(|| "unknown".to_string());
                self.reporter.file_failed(&outcome.path, &cause);
                state.record_failure(outcome.path);
                if !self.config.continue_on_error {
                    debug!("Failure with continue-on-error disabled, cancelling session");
                    let _ = self.cancel_tx.send(true);
                }
            }
            _ => {}
        }
    }

    fn matches_filters(&self, path: &Path) -> bool {
        if self.config.file_filters.is_empty() {
            return true;
        }
        self.config.file_filters.iter().any(|pattern| {
            glob::Pattern::new(pattern)
                .map(|p| p.matches_path(path))
                .unwrap_or(false)
        })
    }
}

fn set_file_status(state: &mut SessionState, path: &Path, status: FileStatus) {
    if let Some(work) = state.files.iter_mut().find(|w| w.path == path) {
        work.set_status(status);
    }
}
