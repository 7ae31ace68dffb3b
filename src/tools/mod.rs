//! Tool-invocation adapter
//!
//! Runs analysis tools against a working directory and normalizes their
//! structured reports into [`Finding`]s. Tools discover their own
//! configuration from the working directory; the adapter only adds the
//! flags needed for machine-readable output.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::Finding;

mod mypy;
mod ruff;
pub mod script;

pub use mypy::MypyTool;
pub use ruff::RuffTool;
pub use script::MarkerTool;

/// Error types for tool invocation
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not available: {0}")]
    NotAvailable(String),

    #[error("Tool '{tool}' invocation failed: {message}")]
    InvocationFailed { tool: String, message: String },

    #[error("Tool '{tool}' produced unparseable output: {message}")]
    ParseFailed { tool: String, message: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

/// A runnable analysis tool
///
/// Implementations must not modify project files; a non-zero exit that still
/// yields a parseable report is success-with-findings, not an error.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Tool name as used in configuration and finding attribution
    fn name(&self) -> &'static str;

    /// Whether the tool binary can be executed
    async fn available(&self) -> bool;

    /// Run the tool and return normalized findings
    ///
    /// `files` restricts the run to an explicit subset when given.
    async fn run(&self, dir: &Path, files: Option<&[PathBuf]>) -> Result<Vec<Finding>, ToolError>;
}

/// Registry of tool runners, keyed by name
///
/// Built once at session start from the enabled-tool set.
#[derive(Clone)]
pub struct ToolRegistry {
    runners: HashMap<&'static str, Arc<dyn ToolRunner>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            runners: HashMap::new(),
        }
    }

    /// Registry with the standard runners (ruff, mypy)
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RuffTool::new()));
        registry.register(Arc::new(MypyTool::new()));
        registry
    }

    /// Register a runner under its own name
    pub fn register(&mut self, runner: Arc<dyn ToolRunner>) {
        debug!(tool = runner.name(), "ToolRegistry::register: called");
        self.runners.insert(runner.name(), runner);
    }

    /// Look up a runner by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolRunner>> {
        self.runners.get(name).cloned()
    }

    /// Resolve an enabled-tool set, failing on unknown names
    pub fn select(&self, enabled: &[String]) -> Result<Vec<Arc<dyn ToolRunner>>, ToolError> {
        enabled
            .iter()
            .map(|name| {
                self.get(name)
                    .ok_or_else(|| ToolError::UnknownTool(name.clone()))
            })
            .collect()
    }

    /// Names of all registered runners
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.runners.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Probe a binary by running it with `--version`
pub(crate) async fn probe_binary(binary: &str) -> bool {
    match tokio::process::Command::new(binary).arg("--version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

/// Make a tool-reported path relative to the working directory
pub(crate) fn relativize(path: &Path, dir: &Path) -> PathBuf {
    path.strip_prefix(dir).unwrap_or(path).to_path_buf()
}
