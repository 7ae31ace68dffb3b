//! Scripted assistant for tests
//!
//! Pairs with the marker tool double: fixtures plant `LINT:<code>` markers
//! and the mock "fixes" a file by stripping them.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use super::{Assistant, AssistantError};

/// What the mock does to the target file
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Remove every `LINT:<code>` marker comment (a successful fix)
    StripMarkers,
    /// Exit cleanly without touching the file
    NoChange,
    /// Replace the file with fixed content
    WriteContent(String),
    /// Simulate a crash with the given exit code
    Fail { exit_code: i32 },
    /// Block before stripping markers (cancellation and overlap tests)
    DelayThenStrip(Duration),
}

/// Scripted in-process assistant
pub struct MockAssistant {
    behavior: MockBehavior,
    calls: AtomicU32,
}

impl MockAssistant {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicU32::new(0),
        }
    }

    /// Assistant that always fixes by stripping markers
    pub fn strip_markers() -> Self {
        Self::new(MockBehavior::StripMarkers)
    }

    /// Assistant that always produces an identical file
    pub fn no_change() -> Self {
        Self::new(MockBehavior::NoChange)
    }

    /// How many times `rewrite` ran
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn strip(content: &str) -> String {
        let marker = Regex::new(r"[ \t]*#\s*LINT:[A-Za-z0-9_-]+").unwrap();
        marker.replace_all(content, "").to_string()
    }
}

#[async_trait]
impl Assistant for MockAssistant {
    fn name(&self) -> &str {
        "mock-assistant"
    }

    async fn available(&self) -> bool {
        true
    }

    async fn rewrite(&self, workdir: &Path, file: &Path, _prompt: &str) -> Result<(), AssistantError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let abs = workdir.join(file);

        match &self.behavior {
            MockBehavior::StripMarkers => {
                let content = std::fs::read_to_string(&abs).map_err(|e| AssistantError::Failed {
                    exit_code: 1,
                    stderr: e.to_string(),
                })?;
                std::fs::write(&abs, Self::strip(&content)).map_err(|e| AssistantError::Failed {
                    exit_code: 1,
                    stderr: e.to_string(),
                })?;
                Ok(())
            }
            MockBehavior::NoChange => Ok(()),
            MockBehavior::WriteContent(content) => {
                std::fs::write(&abs, content).map_err(|e| AssistantError::Failed {
                    exit_code: 1,
                    stderr: e.to_string(),
                })?;
                Ok(())
            }
            MockBehavior::Fail { exit_code } => Err(AssistantError::Failed {
                exit_code: *exit_code,
                stderr: "scripted failure".to_string(),
            }),
            MockBehavior::DelayThenStrip(delay) => {
                tokio::time::sleep(*delay).await;
                let content = std::fs::read_to_string(&abs).map_err(|e| AssistantError::Failed {
                    exit_code: 1,
                    stderr: e.to_string(),
                })?;
                std::fs::write(&abs, Self::strip(&content)).map_err(|e| AssistantError::Failed {
                    exit_code: 1,
                    stderr: e.to_string(),
                })?;
                Ok(())
            }
        }
    }
}
