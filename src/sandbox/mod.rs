//! Sandbox manager
//!
//! Provides isolated, writable checkouts of the repository rooted at a
//! named commit, each on a throwaway branch under `.stomper/sandboxes/`.
//! Checkouts are git worktrees: they share repository metadata with the
//! main repo, so creation is cheap and changes inside one sandbox are
//! invisible to every other sandbox and to the main tree.

mod manager;

pub use manager::{SandboxConfig, SandboxError, SandboxHandle, SandboxManager};
