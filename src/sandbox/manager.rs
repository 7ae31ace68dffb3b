//! Sandbox manager for creating, listing, and destroying isolated worktrees

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Mutex;

use tokio::process::Command;
use tracing::{debug, info, warn};

/// Error types for sandbox operations
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Failed to create sandbox: {0}")]
    CreateFailed(String),

    #[error("Failed to destroy sandbox: {0}")]
    DestroyFailed(String),

    #[error("Git command failed: {0}")]
    GitError(String),
}

/// Configuration for the sandbox manager
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Path to the main repository
    pub repo_root: PathBuf,

    /// Branch prefix for sandbox branches
    pub branch_prefix: String,
}

impl SandboxConfig {
    /// Create config rooted at the given repository
    pub fn with_repo(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        debug!(?repo_root, "SandboxConfig::with_repo: called");
        Self {
            repo_root,
            branch_prefix: "sbx".to_string(),
        }
    }

    /// Parent directory of all sandbox working copies
    pub fn sandboxes_dir(&self) -> PathBuf {
        self.repo_root.join(".stomper").join("sandboxes")
    }
}

/// Identifies one isolated checkout
///
/// Owned by exactly one sub-workflow; the manager does not retain handles
/// after destruction.
#[derive(Debug, Clone)]
pub struct SandboxHandle {
    /// Sandbox id (session id plus file-derived stem)
    pub id: String,

    /// Path to the working copy
    pub path: PathBuf,

    /// Branch name
    pub branch: String,
}

/// Manager for sandbox worktrees
pub struct SandboxManager {
    config: SandboxConfig,
    active: Mutex<BTreeSet<String>>,
}

impl SandboxManager {
    /// Create a new sandbox manager
    pub fn new(config: SandboxConfig) -> Self {
        debug!(?config, "SandboxManager::new: called");
        Self {
            config,
            active: Mutex::new(BTreeSet::new()),
        }
    }

    /// Create a sandbox rooted at `base_ref`
    ///
    /// The ref is resolved now, so concurrent sandboxes created from the
    /// same ref share one commit base regardless of later commits on the
    /// main branch.
    pub async fn create(&self, sandbox_id: &str, base_ref: &str) -> Result<SandboxHandle, SandboxError> {
        debug!(%sandbox_id, %base_ref, "SandboxManager::create: called");

        {
            let active = self.active.lock().expect("sandbox registry poisoned");
            if active.contains(sandbox_id) {
                debug!("SandboxManager::create: duplicate id");
                return Err(SandboxError::CreateFailed(format!(
                    "sandbox id already active: {}",
                    sandbox_id
                )));
            }
        }

        let sandboxes_dir = self.config.sandboxes_dir();
        if let Err(e) = tokio::fs::create_dir_all(&sandboxes_dir).await {
            return Err(SandboxError::CreateFailed(format!(
                "Failed to create sandboxes dir: {}",
                e
            )));
        }

        let sandbox_path = sandboxes_dir.join(sandbox_id);
        let branch_name = format!("{}/{}", self.config.branch_prefix, sandbox_id);

        let output = Command::new("git")
            .args([
                "worktree",
                "add",
                sandbox_path.to_str().unwrap_or_default(),
                "-b",
                &branch_name,
                base_ref,
            ])
            .current_dir(&self.config.repo_root)
            .output()
            .await
            .map_err(|e| SandboxError::GitError(e.to_string()))?;

        if !output.status.success() {
            debug!("SandboxManager::create: git worktree add failed");
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SandboxError::CreateFailed(stderr.trim().to_string()));
        }

        self.active
            .lock()
            .expect("sandbox registry poisoned")
            .insert(sandbox_id.to_string());

        info!("Created sandbox at {:?} on branch {}", sandbox_path, branch_name);

        Ok(SandboxHandle {
            id: sandbox_id.to_string(),
            path: sandbox_path,
            branch: branch_name,
        })
    }

    /// Destroy a sandbox: remove the working copy and delete its branch
    ///
    /// Idempotent, and never fails the caller's workflow: every error is
    /// logged at warn level and swallowed. Safe to call after a partially
    /// successful `create`.
    pub async fn destroy(&self, sandbox_id: &str) {
        debug!(%sandbox_id, "SandboxManager::destroy: called");
        let sandbox_path = self.config.sandboxes_dir().join(sandbox_id);

        if sandbox_path.exists() {
            let output = Command::new("git")
                .args([
                    "worktree",
                    "remove",
                    sandbox_path.to_str().unwrap_or_default(),
                    "--force",
                ])
                .current_dir(&self.config.repo_root)
                .output()
                .await;

            match output {
                Ok(out) if !out.status.success() => {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    if !stderr.contains("is not a working tree") {
                        warn!(%sandbox_id, "Failed to remove sandbox worktree: {}", stderr.trim());
                    }
                }
                Err(e) => warn!(%sandbox_id, "git worktree remove failed to spawn: {}", e),
                _ => debug!("SandboxManager::destroy: worktree removed"),
            }

            // Stale entries may not be registered worktrees at all; the
            // directory itself is garbage either way.
            if sandbox_path.exists() {
                if let Err(e) = tokio::fs::remove_dir_all(&sandbox_path).await {
                    warn!(%sandbox_id, "Failed to remove sandbox directory: {}", e);
                }
            }
        } else {
            debug!("SandboxManager::destroy: working copy already gone");
        }

        // Branch deletion is best-effort; the branch may never have been born
        let branch_name = format!("{}/{}", self.config.branch_prefix, sandbox_id);
        let _ = Command::new("git")
            .args(["branch", "-D", &branch_name])
            .current_dir(&self.config.repo_root)
            .output()
            .await;

        self.active
            .lock()
            .expect("sandbox registry poisoned")
            .remove(sandbox_id);

        info!("Destroyed sandbox {}", sandbox_id);
    }

    /// Ids of sandboxes created and not yet destroyed
    pub fn list_active(&self) -> BTreeSet<String> {
        self.active.lock().expect("sandbox registry poisoned").clone()
    }

    /// Path a sandbox id maps to
    pub fn sandbox_path(&self, sandbox_id: &str) -> PathBuf {
        self.config.sandboxes_dir().join(sandbox_id)
    }

    /// Check if a sandbox working copy exists on disk
    pub fn exists(&self, sandbox_id: &str) -> bool {
        self.sandbox_path(sandbox_id).exists()
    }

    /// Remove stale sandbox entries left behind by a crashed session
    ///
    /// Anything under the sandboxes dir that this manager did not create is
    /// garbage. Returns the number of entries removed.
    pub async fn sweep_stale(&self) -> usize {
        debug!("SandboxManager::sweep_stale: called");
        let sandboxes_dir = self.config.sandboxes_dir();
        if !sandboxes_dir.exists() {
            return 0;
        }

        let active = self.list_active();
        let mut swept = 0;

        let entries = match std::fs::read_dir(&sandboxes_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read sandboxes dir: {}", e);
                return 0;
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            if !active.contains(&name) {
                info!("Sweeping stale sandbox: {}", name);
                self.destroy(&name).await;
                swept += 1;
            }
        }

        // Drop worktree records whose directories are already gone
        let _ = Command::new("git")
            .args(["worktree", "prune"])
            .current_dir(&self.config.repo_root)
            .output()
            .await;

        debug!(swept, "SandboxManager::sweep_stale: completed");
        swept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    async fn setup_git_repo(dir: &Path) {
        Command::new("git").args(["init"]).current_dir(dir).output().await.unwrap();
        Command::new("git")
            .args(["config", "user.email", "test@test.com"])
            .current_dir(dir)
            .output()
            .await
            .unwrap();
        Command::new("git")
            .args(["config", "user.name", "Test"])
            .current_dir(dir)
            .output()
            .await
            .unwrap();
        Command::new("git")
            .args(["commit", "--allow-empty", "-m", "initial"])
            .current_dir(dir)
            .output()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sandbox_create_and_destroy() {
        let repo_dir = tempdir().unwrap();
        setup_git_repo(repo_dir.path()).await;

        let manager = SandboxManager::new(SandboxConfig::with_repo(repo_dir.path()));

        let handle = manager.create("sess-1_app", "HEAD").await.unwrap();
        assert!(handle.path.exists());
        assert_eq!(handle.branch, "sbx/sess-1_app");
        assert!(manager.list_active().contains("sess-1_app"));

        manager.destroy("sess-1_app").await;
        assert!(!handle.path.exists());
        assert!(manager.list_active().is_empty());
    }

    #[tokio::test]
    async fn test_sandbox_isolation() {
        let repo_dir = tempdir().unwrap();
        setup_git_repo(repo_dir.path()).await;
        std::fs::write(repo_dir.path().join("a.py"), "x = 1\n").unwrap();
        Command::new("git")
            .args(["add", "a.py"])
            .current_dir(repo_dir.path())
            .output()
            .await
            .unwrap();
        Command::new("git")
            .args(["commit", "-m", "add a.py"])
            .current_dir(repo_dir.path())
            .output()
            .await
            .unwrap();

        let manager = SandboxManager::new(SandboxConfig::with_repo(repo_dir.path()));
        let h1 = manager.create("s_one", "HEAD").await.unwrap();
        let h2 = manager.create("s_two", "HEAD").await.unwrap();

        // A write inside one sandbox is invisible to the other and to main
        std::fs::write(h1.path.join("a.py"), "x = 2\n").unwrap();

        let main_content = std::fs::read_to_string(repo_dir.path().join("a.py")).unwrap();
        let other_content = std::fs::read_to_string(h2.path.join("a.py")).unwrap();
        assert_eq!(main_content, "x = 1\n");
        assert_eq!(other_content, "x = 1\n");

        manager.destroy("s_one").await;
        manager.destroy("s_two").await;
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let repo_dir = tempdir().unwrap();
        setup_git_repo(repo_dir.path()).await;

        let manager = SandboxManager::new(SandboxConfig::with_repo(repo_dir.path()));
        manager.create("dup", "HEAD").await.unwrap();

        let result = manager.create("dup", "HEAD").await;
        assert!(matches!(result, Err(SandboxError::CreateFailed(_))));

        manager.destroy("dup").await;
    }

    #[tokio::test]
    async fn test_create_missing_base_ref() {
        let repo_dir = tempdir().unwrap();
        setup_git_repo(repo_dir.path()).await;

        let manager = SandboxManager::new(SandboxConfig::with_repo(repo_dir.path()));
        let result = manager.create("sbx-x", "no-such-ref").await;
        assert!(matches!(result, Err(SandboxError::CreateFailed(_))));
        assert!(manager.list_active().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_idempotent() {
        let repo_dir = tempdir().unwrap();
        setup_git_repo(repo_dir.path()).await;

        let manager = SandboxManager::new(SandboxConfig::with_repo(repo_dir.path()));
        manager.create("gone", "HEAD").await.unwrap();

        manager.destroy("gone").await;
        // Second call is a no-op
        manager.destroy("gone").await;
        assert!(manager.list_active().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_stale() {
        let repo_dir = tempdir().unwrap();
        setup_git_repo(repo_dir.path()).await;

        let manager = SandboxManager::new(SandboxConfig::with_repo(repo_dir.path()));
        manager.create("kept", "HEAD").await.unwrap();

        // Simulate a crashed session's leftovers with a bare directory
        let stale = manager.sandbox_path("stale-leftover");
        std::fs::create_dir_all(&stale).unwrap();

        let swept = manager.sweep_stale().await;
        assert_eq!(swept, 1);
        assert!(!stale.exists());
        assert!(manager.exists("kept"));

        manager.destroy("kept").await;
    }
}
