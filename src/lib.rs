//! Stomper - automated static-analysis fixing with AI assistance
//!
//! Stomper drives an external AI code-fixing assistant through a safe,
//! learning, concurrent workflow: for each file with findings it provisions
//! an isolated git worktree rooted on the current commit, asks the
//! assistant to rewrite the file, re-runs the tools to confirm the findings
//! were resolved and the tests still pass, then transplants the change into
//! the main working tree as an atomic commit.
//!
//! # Core Concepts
//!
//! - **Isolation**: every fix is attempted in a throwaway worktree; the
//!   main tree only ever changes by one serialized apply+commit at a time
//! - **Verification over trust**: a fix counts when the tools stop
//!   reporting it and the test suite agrees, not when the assistant says so
//! - **Durable learning**: per-rule-code outcomes persist across sessions
//!   and drive prompt verbosity and fallback strategies
//!
//! # Modules
//!
//! - [`tools`] - analysis tool adapters producing normalized findings
//! - [`sandbox`] - isolated worktree lifecycle
//! - [`patch`] - patch extraction, atomic apply, commits
//! - [`learning`] - the adaptive learning store
//! - [`assistant`] - assistant subprocess invocation with fallback
//! - [`workflow`] - the per-file state machine
//! - [`session`] - the session orchestrator
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod assistant;
pub mod cli;
pub mod config;
pub mod domain;
pub mod learning;
pub mod patch;
pub mod prompt;
pub mod sandbox;
pub mod session;
pub mod tools;
pub mod workflow;

// Re-export commonly used types
pub use assistant::{Assistant, AssistantError, AssistantInvoker, CommandAssistant, MockAssistant};
pub use config::{AssistantConfig, Config, LearningConfig, SessionSettings, ToolsConfig};
pub use domain::{
    FileStatus, FileWork, Finding, ProcessingStrategy, SessionState, SessionStatus, Severity, TestMode,
};
pub use learning::{
    AdaptiveStrategy, ErrorPattern, LearningData, LearningError, LearningOptions, LearningStatistics, LearningStore,
    Outcome, Strategy,
};
pub use patch::{PatchBroker, PatchError};
pub use sandbox::{SandboxConfig, SandboxError, SandboxHandle, SandboxManager};
pub use session::{Reporter, Session, SessionConfig, TracingReporter};
pub use tools::{MarkerTool, MypyTool, RuffTool, ToolError, ToolRegistry, ToolRunner};
pub use workflow::{FileOutcome, FileWorkflow, WorkflowConfig, WorkflowError};
