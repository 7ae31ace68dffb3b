//! Assistant invoker
//!
//! The assistant is a black-box subprocess that, given a prompt and a
//! working directory, rewrites a target file in place. The invoker wraps
//! it with a pre-invocation snapshot (so failed attempts never poison the
//! next one), a changed-file success criterion, and a mapper-driven
//! adapt/fallback retry loop.

mod command;
mod invoker;
pub mod mock;

pub use command::CommandAssistant;
pub use invoker::{AssistantInvoker, FallbackOutcome};
pub use mock::{MockAssistant, MockBehavior};

use std::path::Path;

use async_trait::async_trait;

/// Error types for assistant invocation
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("Assistant unavailable: {0}")]
    Unavailable(String),

    #[error("Assistant timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Assistant exited with code {exit_code}: {stderr}")]
    Failed { exit_code: i32, stderr: String },

    #[error("Assistant exited cleanly but produced no change")]
    ProducedNoChange,
}

/// A code-fixing assistant executable as a subprocess
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Assistant name for logs and attribution
    fn name(&self) -> &str;

    /// Whether the assistant can be spawned at all
    async fn available(&self) -> bool;

    /// Rewrite `file` (workdir-relative) in place, driven by `prompt`
    ///
    /// Implementations enforce their own timeout and terminate the
    /// subprocess when it elapses.
    async fn rewrite(&self, workdir: &Path, file: &Path, prompt: &str) -> Result<(), AssistantError>;
}
