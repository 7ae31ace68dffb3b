//! End-to-end session tests
//!
//! Each scenario drives a real temp git repository through a full session
//! with a scripted assistant and the marker tool double: a finding is one
//! `LINT:<code>` comment, and "fixing" a file means stripping its markers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::{TempDir, tempdir};
use tokio::process::Command;

use stomper::assistant::{Assistant, AssistantError, MockAssistant, MockBehavior};
use stomper::domain::{SessionStatus, TestMode};
use stomper::learning::LearningStore;
use stomper::session::{Reporter, Session, SessionConfig};
use stomper::tools::{MarkerTool, ToolRegistry};

// =============================================================================
// Fixtures
// =============================================================================

async fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git").args(args).current_dir(dir).output().await.unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

async fn setup_repo(files: &[(&str, &str)]) -> TempDir {
    let temp = tempdir().unwrap();
    git(temp.path(), &["init"]).await;
    git(temp.path(), &["config", "user.email", "test@test.com"]).await;
    git(temp.path(), &["config", "user.name", "Test"]).await;

    for (name, content) in files {
        std::fs::write(temp.path().join(name), content).unwrap();
    }
    git(temp.path(), &["add", "."]).await;
    git(temp.path(), &["commit", "-m", "initial"]).await;
    temp
}

fn marker_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(MarkerTool::named("L")));
    registry
}

fn test_config(root: &Path) -> SessionConfig {
    let mut config = SessionConfig::new(root);
    config.tools = vec!["L".to_string()];
    config.test_command = "true".to_string();
    config
}

async fn commit_count(dir: &Path) -> usize {
    git(dir, &["rev-list", "--count", "HEAD"]).await.trim().parse().unwrap()
}

fn sandboxes_on_disk(root: &Path) -> usize {
    let dir = root.join(".stomper").join("sandboxes");
    if !dir.exists() {
        return 0;
    }
    std::fs::read_dir(dir).unwrap().count()
}

/// Assistant whose behavior depends on the target file name
struct PerFileAssistant {
    behaviors: Vec<(&'static str, MockBehavior)>,
}

#[async_trait]
impl Assistant for PerFileAssistant {
    fn name(&self) -> &str {
        "per-file-mock"
    }

    async fn available(&self) -> bool {
        true
    }

    async fn rewrite(&self, workdir: &Path, file: &Path, prompt: &str) -> Result<(), AssistantError> {
        let name = file.file_name().unwrap().to_string_lossy().to_string();
        let behavior = self
            .behaviors
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, b)| b.clone())
            .unwrap_or(MockBehavior::StripMarkers);
        MockAssistant::new(behavior).rewrite(workdir, file, prompt).await
    }
}

// =============================================================================
// Scenario 1: single file, single finding, assistant succeeds first try
// =============================================================================

#[tokio::test]
async fn test_single_file_first_try_success() {
    let repo = setup_repo(&[("a.py", "import os  # LINT:X\nx = 1\n")]).await;
    let assistant = Arc::new(MockAssistant::strip_markers());

    let session = Session::new(test_config(repo.path()), marker_registry(), assistant.clone());
    let state = session.run().await.unwrap();

    assert_eq!(state.status, SessionStatus::Completed);
    assert_eq!(state.successful_fixes, vec![PathBuf::from("a.py")]);
    assert!(state.failed_fixes.is_empty());
    assert_eq!(state.total_errors_fixed, 1);
    assert_eq!(assistant.calls(), 1);

    // One commit landed on the main branch with the expected message
    assert_eq!(commit_count(repo.path()).await, 2);
    let subject = git(repo.path(), &["log", "-1", "--format=%s"]).await;
    assert_eq!(subject.trim(), "fix(quality): resolve 1 issues in a.py");
    let body = git(repo.path(), &["log", "-1", "--format=%b"]).await;
    assert!(body.contains("- X"));
    assert!(body.contains("Fixed by: stomper v"));

    // The fix is visible in the main tree; the sandbox is gone
    let content = std::fs::read_to_string(repo.path().join("a.py")).unwrap();
    assert!(!content.contains("LINT"));
    assert_eq!(sandboxes_on_disk(repo.path()), 0);

    // The mapper learned exactly one success for L:X
    let store = LearningStore::open(repo.path()).unwrap();
    let data = store.snapshot();
    assert_eq!(data.patterns["L:X"].total_attempts, 1);
    assert_eq!(data.patterns["L:X"].successes, 1);
}

// =============================================================================
// Scenario 2: two files, two concurrent sub-workflows
// =============================================================================

#[tokio::test]
async fn test_two_files_concurrent() {
    let repo = setup_repo(&[
        ("a.py", "import os  # LINT:X\n"),
        ("b.py", "import sys  # LINT:Y\nval = 2  # LINT:Z\n"),
    ])
    .await;

    let mut config = test_config(repo.path());
    config.max_parallel_files = 2;

    let session = Session::new(config, marker_registry(), Arc::new(MockAssistant::strip_markers()));
    let state = session.run().await.unwrap();

    assert_eq!(state.status, SessionStatus::Completed);
    assert_eq!(state.successful_fixes.len(), 2);
    assert!(state.failed_fixes.is_empty());
    assert_eq!(state.total_errors_fixed, 3);

    // Every path lands in exactly one aggregation list
    assert!(!state.successful_fixes.iter().any(|p| state.failed_fixes.contains(p)));

    // Two commits in some order, no sandboxes left
    assert_eq!(commit_count(repo.path()).await, 3);
    assert_eq!(sandboxes_on_disk(repo.path()), 0);
}

// =============================================================================
// Scenario 3: retry exhaustion
// =============================================================================

#[tokio::test]
async fn test_retry_exhaustion_no_change() {
    let repo = setup_repo(&[("a.py", "import os  # LINT:X\n")]).await;
    let assistant = Arc::new(MockAssistant::no_change());

    let session = Session::new(test_config(repo.path()), marker_registry(), assistant.clone());
    let state = session.run().await.unwrap();

    assert_eq!(state.status, SessionStatus::Failed);
    assert!(state.successful_fixes.is_empty());
    assert_eq!(state.failed_fixes, vec![PathBuf::from("a.py")]);

    // Assistant invoked once per attempt, no commit on the main tree
    assert_eq!(assistant.calls(), 3);
    assert_eq!(commit_count(repo.path()).await, 1);
    assert_eq!(sandboxes_on_disk(repo.path()), 0);

    // Three mechanical failures recorded for L:X
    let data = LearningStore::open(repo.path()).unwrap().snapshot();
    assert_eq!(data.patterns["L:X"].total_attempts, 3);
    assert_eq!(data.patterns["L:X"].failures, 3);
    assert_eq!(data.patterns["L:X"].successes, 0);
}

// =============================================================================
// Scenario 4: tests regress after a fix
// =============================================================================

#[tokio::test]
async fn test_regression_blocks_commit() {
    let repo = setup_repo(&[("a.py", "import os  # LINT:X\n")]).await;

    let mut config = test_config(repo.path());
    config.test_command = "exit 1".to_string();
    config.test_mode = TestMode::Full;

    let session = Session::new(config, marker_registry(), Arc::new(MockAssistant::strip_markers()));
    let state = session.run().await.unwrap();

    assert_eq!(state.status, SessionStatus::Failed);
    assert_eq!(state.failed_fixes, vec![PathBuf::from("a.py")]);

    // No commit, nothing staged, sandbox destroyed
    assert_eq!(commit_count(repo.path()).await, 1);
    let staged = git(repo.path(), &["diff", "--cached", "--name-only"]).await;
    assert!(staged.trim().is_empty());
    assert_eq!(sandboxes_on_disk(repo.path()), 0);

    // The main tree still carries the finding
    let content = std::fs::read_to_string(repo.path().join("a.py")).unwrap();
    assert!(content.contains("LINT:X"));

    // The mapper recorded a failure with the strategy that produced the change
    let data = LearningStore::open(repo.path()).unwrap().snapshot();
    assert_eq!(data.patterns["L:X"].failures, 1);
    assert_eq!(data.patterns["L:X"].successes, 0);
}

// =============================================================================
// Scenario 5: patch fails to apply
// =============================================================================

/// Strips markers in the sandbox, then silently rewrites the main-tree copy
/// so the extracted patch no longer applies.
struct ConflictingAssistant {
    main_root: PathBuf,
}

#[async_trait]
impl Assistant for ConflictingAssistant {
    fn name(&self) -> &str {
        "conflicting-mock"
    }

    async fn available(&self) -> bool {
        true
    }

    async fn rewrite(&self, workdir: &Path, file: &Path, prompt: &str) -> Result<(), AssistantError> {
        MockAssistant::strip_markers().rewrite(workdir, file, prompt).await?;
        std::fs::write(self.main_root.join(file), "completely = 'diverged'\n").unwrap();
        Ok(())
    }
}

#[tokio::test]
async fn test_patch_apply_conflict() {
    let repo = setup_repo(&[("a.py", "import os  # LINT:X\n")]).await;
    let main_root = repo.path().canonicalize().unwrap();

    let session = Session::new(
        test_config(repo.path()),
        marker_registry(),
        Arc::new(ConflictingAssistant { main_root: main_root.clone() }),
    );
    let state = session.run().await.unwrap();

    assert_eq!(state.status, SessionStatus::Failed);
    assert_eq!(state.failed_fixes, vec![PathBuf::from("a.py")]);

    let failed = state.files.iter().find(|w| w.path == Path::new("a.py")).unwrap();
    assert!(failed.last_error.as_deref().unwrap().contains("does not apply"));

    // Main tree exactly as the conflict left it, nothing committed
    assert_eq!(commit_count(repo.path()).await, 1);
    let content = std::fs::read_to_string(main_root.join("a.py")).unwrap();
    assert_eq!(content, "completely = 'diverged'\n");
    assert_eq!(sandboxes_on_disk(repo.path()), 0);
}

// =============================================================================
// Scenario 6: cancellation mid-session
// =============================================================================

/// Reports each completed file into a channel so the test can react
struct CompletionProbe {
    tx: tokio::sync::mpsc::UnboundedSender<PathBuf>,
}

impl Reporter for CompletionProbe {
    fn file_completed(&self, path: &Path, _errors_fixed: usize) {
        let _ = self.tx.send(path.to_path_buf());
    }
}

#[tokio::test]
async fn test_cancellation_keeps_committed_files() {
    let repo = setup_repo(&[
        ("a.py", "import os  # LINT:X\n"),
        ("b.py", "import sys  # LINT:Y\n"),
    ])
    .await;

    // a.py fixes instantly; b.py is still inside its assistant call when
    // a.py's commit lands and the cancel fires
    let assistant = Arc::new(PerFileAssistant {
        behaviors: vec![
            ("a.py", MockBehavior::StripMarkers),
            ("b.py", MockBehavior::DelayThenStrip(Duration::from_secs(3))),
        ],
    });

    let mut config = test_config(repo.path());
    config.max_parallel_files = 2;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let session = Arc::new(
        Session::new(config, marker_registry(), assistant).with_reporter(Arc::new(CompletionProbe { tx })),
    );

    let runner = {
        let session = session.clone();
        tokio::spawn(async move { session.run().await })
    };

    let first = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("a file should complete")
        .expect("channel open");
    assert_eq!(first, PathBuf::from("a.py"));
    session.cancel();

    let state = runner.await.unwrap().unwrap();

    assert_eq!(state.status, SessionStatus::Failed);
    assert_eq!(state.successful_fixes, vec![PathBuf::from("a.py")]);

    // First commit present, second never landed
    assert_eq!(commit_count(repo.path()).await, 2);
    let content = std::fs::read_to_string(repo.path().join("b.py")).unwrap();
    assert!(content.contains("LINT:Y"));
    assert_eq!(sandboxes_on_disk(repo.path()), 0);
}

// =============================================================================
// Boundary behaviors
// =============================================================================

#[tokio::test]
async fn test_clean_tree_completes_with_zero_files() {
    let repo = setup_repo(&[("a.py", "x = 1\n")]).await;

    let session = Session::new(
        test_config(repo.path()),
        marker_registry(),
        Arc::new(MockAssistant::strip_markers()),
    );
    let state = session.run().await.unwrap();

    assert_eq!(state.status, SessionStatus::Completed);
    assert!(state.files.is_empty());
    assert!(state.successful_fixes.is_empty());
    assert_eq!(state.total_errors_fixed, 0);
    assert_eq!(commit_count(repo.path()).await, 1);
}

#[tokio::test]
async fn test_sequential_commits_follow_sorted_path_order() {
    let repo = setup_repo(&[
        ("c.py", "a = 1  # LINT:X\n"),
        ("a.py", "b = 2  # LINT:X\n"),
        ("b.py", "c = 3  # LINT:X\n"),
    ])
    .await;

    let session = Session::new(
        test_config(repo.path()),
        marker_registry(),
        Arc::new(MockAssistant::strip_markers()),
    );
    let state = session.run().await.unwrap();

    assert_eq!(state.status, SessionStatus::Completed);
    assert_eq!(
        state.successful_fixes,
        vec![PathBuf::from("a.py"), PathBuf::from("b.py"), PathBuf::from("c.py")]
    );

    // Newest first in the log, so sorted order reads back reversed
    let log = git(repo.path(), &["log", "--format=%s"]).await;
    let subjects: Vec<&str> = log.lines().filter(|l| l.contains("fix(quality)")).collect();
    assert_eq!(subjects.len(), 3);
    assert!(subjects[0].contains("c.py"));
    assert!(subjects[1].contains("b.py"));
    assert!(subjects[2].contains("a.py"));
}

#[tokio::test]
async fn test_continue_on_error_processes_remaining_files() {
    let repo = setup_repo(&[
        ("a.py", "import os  # LINT:X\n"),
        ("b.py", "import sys  # LINT:Y\n"),
    ])
    .await;

    // a.py never changes, b.py fixes fine
    let assistant = Arc::new(PerFileAssistant {
        behaviors: vec![
            ("a.py", MockBehavior::NoChange),
            ("b.py", MockBehavior::StripMarkers),
        ],
    });

    let session = Session::new(test_config(repo.path()), marker_registry(), assistant);
    let state = session.run().await.unwrap();

    assert_eq!(state.status, SessionStatus::Failed);
    assert_eq!(state.successful_fixes, vec![PathBuf::from("b.py")]);
    assert_eq!(state.failed_fixes, vec![PathBuf::from("a.py")]);
    assert_eq!(commit_count(repo.path()).await, 2);
}

#[tokio::test]
async fn test_fail_fast_cancels_remaining_files() {
    let repo = setup_repo(&[
        ("a.py", "import os  # LINT:X\n"),
        ("b.py", "import sys  # LINT:Y\n"),
    ])
    .await;

    let assistant = Arc::new(PerFileAssistant {
        behaviors: vec![
            ("a.py", MockBehavior::NoChange),
            ("b.py", MockBehavior::StripMarkers),
        ],
    });

    let mut config = test_config(repo.path());
    config.continue_on_error = false;

    let session = Session::new(config, marker_registry(), assistant);
    let state = session.run().await.unwrap();

    assert_eq!(state.status, SessionStatus::Failed);
    assert!(state.failed_fixes.contains(&PathBuf::from("a.py")));
    // b.py was never committed: the session stopped after a.py failed
    assert_eq!(commit_count(repo.path()).await, 1);
    assert_eq!(sandboxes_on_disk(repo.path()), 0);
}

#[tokio::test]
async fn test_file_filters_restrict_collection() {
    let repo = setup_repo(&[
        ("a.py", "import os  # LINT:X\n"),
        ("b.py", "import sys  # LINT:Y\n"),
    ])
    .await;

    let mut config = test_config(repo.path());
    config.file_filters = vec!["a.py".to_string()];

    let session = Session::new(config, marker_registry(), Arc::new(MockAssistant::strip_markers()));
    let state = session.run().await.unwrap();

    assert_eq!(state.status, SessionStatus::Completed);
    assert_eq!(state.successful_fixes, vec![PathBuf::from("a.py")]);
    assert!(std::fs::read_to_string(repo.path().join("b.py")).unwrap().contains("LINT:Y"));
}

#[tokio::test]
async fn test_final_mode_defers_tests_to_teardown() {
    let repo = setup_repo(&[("a.py", "import os  # LINT:X\n")]).await;

    let mut config = test_config(repo.path());
    config.test_mode = TestMode::Final;
    config.test_command = "exit 1".to_string();

    let session = Session::new(config, marker_registry(), Arc::new(MockAssistant::strip_markers()));
    let state = session.run().await.unwrap();

    // The per-file workflow skipped tests, so the commit landed; the
    // deferred run then failed the session as a whole.
    assert_eq!(commit_count(repo.path()).await, 2);
    assert_eq!(state.successful_fixes, vec![PathBuf::from("a.py")]);
    assert_eq!(state.status, SessionStatus::Failed);
    assert_eq!(state.error.as_deref(), Some("final test validation failed"));
}

#[tokio::test]
async fn test_retry_after_partial_fix_succeeds() {
    // Two findings; the first attempt fixes only one of them
    let repo = setup_repo(&[("a.py", "import os  # LINT:X\nlong = 1  # LINT:Y\n")]).await;

    // First call strips only the X marker, later calls strip everything
    struct PartialThenFull {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Assistant for PartialThenFull {
        fn name(&self) -> &str {
            "partial-mock"
        }
        async fn available(&self) -> bool {
            true
        }
        async fn rewrite(&self, workdir: &Path, file: &Path, prompt: &str) -> Result<(), AssistantError> {
            let first = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0;
            if first {
                let abs = workdir.join(file);
                let content = std::fs::read_to_string(&abs).unwrap();
                std::fs::write(&abs, content.replace("  # LINT:X", "")).unwrap();
                Ok(())
            } else {
                MockAssistant::strip_markers().rewrite(workdir, file, prompt).await
            }
        }
    }

    let session = Session::new(
        test_config(repo.path()),
        marker_registry(),
        Arc::new(PartialThenFull {
            calls: std::sync::atomic::AtomicU32::new(0),
        }),
    );
    let state = session.run().await.unwrap();

    assert_eq!(state.status, SessionStatus::Completed);
    assert_eq!(state.total_errors_fixed, 2);
    assert_eq!(commit_count(repo.path()).await, 2);

    let content = std::fs::read_to_string(repo.path().join("a.py")).unwrap();
    assert!(!content.contains("LINT"));

    // Both codes learned as successes
    let data = LearningStore::open(repo.path()).unwrap().snapshot();
    assert_eq!(data.patterns["L:X"].successes, 1);
    assert_eq!(data.patterns["L:Y"].successes, 1);
}
