//! AssistantInvoker - snapshot/restore wrapper with adaptive retries

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::Finding;
use crate::learning::{AdaptiveStrategy, LearningStore, Outcome, Strategy};

use super::{Assistant, AssistantError};

/// Result of a successful fallback loop
#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    /// Strategy that produced the change
    pub strategy: Strategy,

    /// Assistant invocations consumed, including the successful one
    pub attempts_used: u32,
}

/// Wraps an [`Assistant`] with the guarantees the workflow relies on:
/// failed attempts restore the target file, success means the file changed,
/// and every mechanically-failed attempt is recorded through the mapper.
pub struct AssistantInvoker {
    assistant: Arc<dyn Assistant>,
    mapper: Arc<LearningStore>,
}

impl AssistantInvoker {
    pub fn new(assistant: Arc<dyn Assistant>, mapper: Arc<LearningStore>) -> Self {
        Self { assistant, mapper }
    }

    /// One invocation against a target file
    ///
    /// On `Failed`/`Timeout` the file is restored from its pre-invocation
    /// snapshot so the next retry starts from a clean baseline. Exit 0 with
    /// an unchanged file is `ProducedNoChange`.
    pub async fn invoke(&self, workdir: &Path, file: &Path, prompt: &str) -> Result<(), AssistantError> {
        let abs = workdir.join(file);
        let snapshot = tokio::fs::read(&abs).await.map_err(|e| AssistantError::Failed {
            exit_code: -1,
            stderr: format!("cannot snapshot {}: {}", abs.display(), e),
        })?;

        match self.assistant.rewrite(workdir, file, prompt).await {
            Ok(()) => {
                let after = tokio::fs::read(&abs).await.unwrap_or_default();
                if after == snapshot {
                    debug!(file = %file.display(), "AssistantInvoker::invoke: no change produced");
                    Err(AssistantError::ProducedNoChange)
                } else {
                    Ok(())
                }
            }
            Err(e @ (AssistantError::Failed { .. } | AssistantError::Timeout { .. })) => {
                if let Err(restore_err) = tokio::fs::write(&abs, &snapshot).await {
                    warn!(
                        file = %abs.display(),
                        "Failed to restore snapshot after assistant error: {}",
                        restore_err
                    );
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Invoke repeatedly with mapper-selected strategies
    ///
    /// The first attempt uses `adapt(tool, code, retry_count)`; each
    /// subsequent attempt asks `fallback` for a strategy not yet tried.
    /// Mechanical failures (error, timeout, unchanged file) are recorded as
    /// failures per attempt. The attempt that changes the file is not
    /// recorded here; its semantic outcome belongs to the workflow once
    /// verification and tests have run.
    pub async fn invoke_with_fallback<F>(
        &self,
        workdir: &Path,
        file: &Path,
        finding: &Finding,
        prompt_factory: F,
        max_retries: u32,
        retry_count: u32,
    ) -> Result<FallbackOutcome, AssistantError>
    where
        F: Fn(&AdaptiveStrategy) -> String,
    {
        let mut failed_strategies: BTreeSet<Strategy> = BTreeSet::new();
        let mut last_error = AssistantError::ProducedNoChange;

        for attempt in 0..max_retries {
            let adaptive = if attempt == 0 {
                self.mapper.adapt(&finding.tool, &finding.code, retry_count)
            } else {
                match self.mapper.fallback(&finding.tool, &finding.code, &failed_strategies) {
                    Some(strategy) => AdaptiveStrategy::for_fallback(strategy),
                    None => {
                        debug!("AssistantInvoker::invoke_with_fallback: strategies exhausted");
                        break;
                    }
                }
            };

            debug!(
                attempt,
                strategy = %adaptive.verbosity,
                code = %finding.code,
                "AssistantInvoker::invoke_with_fallback: attempt"
            );

            let prompt = prompt_factory(&adaptive);
            match self.invoke(workdir, file, &prompt).await {
                Ok(()) => {
                    return Ok(FallbackOutcome {
                        strategy: adaptive.verbosity,
                        attempts_used: attempt + 1,
                    });
                }
                Err(AssistantError::Unavailable(message)) => {
                    // Nothing ran and nothing will; retrying cannot help
                    self.mapper.record(
                        &finding.tool,
                        &finding.code,
                        Outcome::Skipped,
                        adaptive.verbosity,
                        Some(file),
                    );
                    return Err(AssistantError::Unavailable(message));
                }
                Err(e) => {
                    warn!(
                        attempt,
                        code = %finding.code,
                        "Assistant attempt failed: {}",
                        e
                    );
                    self.mapper.record(
                        &finding.tool,
                        &finding.code,
                        Outcome::Failure,
                        adaptive.verbosity,
                        Some(file),
                    );
                    failed_strategies.insert(adaptive.verbosity);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
