//! Patch broker
//!
//! Sole gateway for VCS mutations of the main working tree during a
//! session. Extracts working-tree changes from a sandbox as a textual
//! patch, applies them to the main tree atomically, and records commits.
//! Never pushes to any remote.
//!
//! Callers must hold the session's apply lock across an `apply` and the
//! commit that follows it; the broker relies on that serialization rather
//! than taking its own lock.

use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info};

/// Error types for patch operations
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("Failed to extract patch: {0}")]
    ExtractFailed(String),

    #[error("Patch does not apply cleanly: {0}")]
    ApplyFailed(String),

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    #[error("Git command failed: {0}")]
    GitError(String),
}

/// Broker for patch extraction, application, and commits
pub struct PatchBroker {
    repo_root: PathBuf,
}

impl PatchBroker {
    /// Create a broker for the given main repository
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    /// Resolve the current HEAD commit of the main tree
    pub async fn head(&self) -> Result<String, PatchError> {
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| PatchError::GitError(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PatchError::GitError(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Extract the sandbox's working-tree changes as a patch
    ///
    /// Returns the empty string iff the sandbox is unchanged. Untracked
    /// files are included via intent-to-add so the diff covers them.
    pub async fn extract(&self, sandbox_path: &Path) -> Result<String, PatchError> {
        debug!(sandbox = %sandbox_path.display(), "PatchBroker::extract: called");

        let intent = Command::new("git")
            .args(["add", "-N", "."])
            .current_dir(sandbox_path)
            .output()
            .await
            .map_err(|e| PatchError::GitError(e.to_string()))?;
        if !intent.status.success() {
            let stderr = String::from_utf8_lossy(&intent.stderr);
            return Err(PatchError::ExtractFailed(stderr.trim().to_string()));
        }

        let output = Command::new("git")
            .args(["diff", "HEAD"])
            .current_dir(sandbox_path)
            .output()
            .await
            .map_err(|e| PatchError::GitError(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PatchError::ExtractFailed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Apply a patch to the main working tree
    ///
    /// The patch is checked first, so a patch that does not apply cleanly
    /// leaves the main tree untouched.
    pub async fn apply(&self, patch: &str) -> Result<(), PatchError> {
        debug!(patch_len = patch.len(), "PatchBroker::apply: called");

        let mut patch_file =
            tempfile::NamedTempFile::new().map_err(|e| PatchError::ApplyFailed(e.to_string()))?;
        patch_file
            .write_all(patch.as_bytes())
            .map_err(|e| PatchError::ApplyFailed(e.to_string()))?;
        patch_file.flush().map_err(|e| PatchError::ApplyFailed(e.to_string()))?;

        let patch_path = patch_file.path().to_str().unwrap_or_default().to_string();

        let check = Command::new("git")
            .args(["apply", "--check", &patch_path])
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| PatchError::GitError(e.to_string()))?;

        if !check.status.success() {
            let stderr = String::from_utf8_lossy(&check.stderr);
            return Err(PatchError::ApplyFailed(stderr.trim().to_string()));
        }

        let apply = Command::new("git")
            .args(["apply", &patch_path])
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| PatchError::GitError(e.to_string()))?;

        if !apply.status.success() {
            let stderr = String::from_utf8_lossy(&apply.stderr);
            return Err(PatchError::ApplyFailed(stderr.trim().to_string()));
        }

        debug!("PatchBroker::apply: patch applied");
        Ok(())
    }

    /// Stage the given paths and record one commit
    pub async fn commit(&self, paths: &[PathBuf], message: &str) -> Result<(), PatchError> {
        debug!(?paths, "PatchBroker::commit: called");

        let mut add = Command::new("git");
        add.args(["add", "--"]).args(paths).current_dir(&self.repo_root);
        let add_output = add.output().await.map_err(|e| PatchError::GitError(e.to_string()))?;

        if !add_output.status.success() {
            let stderr = String::from_utf8_lossy(&add_output.stderr);
            return Err(PatchError::CommitFailed(stderr.trim().to_string()));
        }

        let commit = Command::new("git")
            .args(["commit", "-m", message])
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| PatchError::GitError(e.to_string()))?;

        if !commit.status.success() {
            let stderr = String::from_utf8_lossy(&commit.stderr);
            let stdout = String::from_utf8_lossy(&commit.stdout);
            return Err(PatchError::CommitFailed(format!(
                "{}{}",
                stderr.trim(),
                stdout.trim()
            )));
        }

        info!("Committed {} path(s)", paths.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn git(dir: &Path, args: &[&str]) {
        let output = Command::new("git").args(args).current_dir(dir).output().await.unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    async fn setup_repo_with_file(dir: &Path, name: &str, content: &str) {
        git(dir, &["init"]).await;
        git(dir, &["config", "user.email", "test@test.com"]).await;
        git(dir, &["config", "user.name", "Test"]).await;
        std::fs::write(dir.join(name), content).unwrap();
        git(dir, &["add", "."]).await;
        git(dir, &["commit", "-m", "initial"]).await;
    }

    async fn add_worktree(repo: &Path, dest: &Path) {
        git(
            repo,
            &[
                "worktree",
                "add",
                dest.to_str().unwrap(),
                "-b",
                "sbx/test",
                "HEAD",
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn test_extract_empty_when_unchanged() {
        let repo = tempdir().unwrap();
        setup_repo_with_file(repo.path(), "a.py", "x = 1\n").await;

        let sandbox = repo.path().join("sandbox");
        add_worktree(repo.path(), &sandbox).await;

        let broker = PatchBroker::new(repo.path());
        let patch = broker.extract(&sandbox).await.unwrap();
        assert!(patch.is_empty());
    }

    #[tokio::test]
    async fn test_extract_apply_roundtrip() {
        let repo = tempdir().unwrap();
        setup_repo_with_file(repo.path(), "a.py", "x = 1\n").await;

        let sandbox = repo.path().join("sandbox");
        add_worktree(repo.path(), &sandbox).await;

        // Rewrite the file inside the sandbox only
        std::fs::write(sandbox.join("a.py"), "x = 2\n").unwrap();

        let broker = PatchBroker::new(repo.path());
        let patch = broker.extract(&sandbox).await.unwrap();
        assert!(patch.contains("-x = 1"));
        assert!(patch.contains("+x = 2"));

        broker.apply(&patch).await.unwrap();
        let main_content = std::fs::read_to_string(repo.path().join("a.py")).unwrap();
        assert_eq!(main_content, "x = 2\n");
    }

    #[tokio::test]
    async fn test_apply_conflict_leaves_tree_untouched() {
        let repo = tempdir().unwrap();
        setup_repo_with_file(repo.path(), "a.py", "x = 1\n").await;

        let sandbox = repo.path().join("sandbox");
        add_worktree(repo.path(), &sandbox).await;
        std::fs::write(sandbox.join("a.py"), "x = 2\n").unwrap();

        let broker = PatchBroker::new(repo.path());
        let patch = broker.extract(&sandbox).await.unwrap();

        // Diverge the main tree so the patch no longer applies
        std::fs::write(repo.path().join("a.py"), "y = 9\n").unwrap();

        let result = broker.apply(&patch).await;
        assert!(matches!(result, Err(PatchError::ApplyFailed(_))));

        let main_content = std::fs::read_to_string(repo.path().join("a.py")).unwrap();
        assert_eq!(main_content, "y = 9\n");
    }

    #[tokio::test]
    async fn test_commit_stages_given_paths() {
        let repo = tempdir().unwrap();
        setup_repo_with_file(repo.path(), "a.py", "x = 1\n").await;

        std::fs::write(repo.path().join("a.py"), "x = 2\n").unwrap();

        let broker = PatchBroker::new(repo.path());
        let head_before = broker.head().await.unwrap();

        broker
            .commit(&[PathBuf::from("a.py")], "fix(quality): resolve 1 issues in a.py")
            .await
            .unwrap();

        let head_after = broker.head().await.unwrap();
        assert_ne!(head_before, head_after);

        let log = Command::new("git")
            .args(["log", "-1", "--format=%s"])
            .current_dir(repo.path())
            .output()
            .await
            .unwrap();
        let subject = String::from_utf8_lossy(&log.stdout);
        assert!(subject.contains("fix(quality)"));
    }

    #[tokio::test]
    async fn test_commit_nothing_staged_fails() {
        let repo = tempdir().unwrap();
        setup_repo_with_file(repo.path(), "a.py", "x = 1\n").await;

        let broker = PatchBroker::new(repo.path());
        let result = broker.commit(&[PathBuf::from("a.py")], "empty").await;
        assert!(matches!(result, Err(PatchError::CommitFailed(_))));
    }

    #[tokio::test]
    async fn test_head_resolves() {
        let repo = tempdir().unwrap();
        setup_repo_with_file(repo.path(), "a.py", "x = 1\n").await;

        let broker = PatchBroker::new(repo.path());
        let head = broker.head().await.unwrap();
        assert_eq!(head.len(), 40);
    }
}
