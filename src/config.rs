//! Stomper configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{ProcessingStrategy, TestMode};

/// Main stomper configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Analysis tool configuration
    pub tools: ToolsConfig,

    /// Assistant subprocess configuration
    pub assistant: AssistantConfig,

    /// Session behavior
    pub session: SessionSettings,

    /// Learning store tuning
    pub learning: LearningConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .stomper.yml
        let local_config = PathBuf::from(".stomper.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/stomper/stomper.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("stomper").join("stomper.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Analysis tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Enabled tools, in collection order
    pub enabled: Vec<String>,

    /// Command for sandbox test runs
    #[serde(rename = "test-command")]
    pub test_command: String,

    /// Test run timeout in milliseconds (0 = none)
    #[serde(rename = "test-timeout-ms")]
    pub test_timeout_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["ruff".to_string(), "mypy".to_string()],
            test_command: "pytest".to_string(),
            test_timeout_ms: 0,
        }
    }
}

/// Assistant subprocess configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Argv of the assistant; the prompt arrives on stdin
    pub command: Vec<String>,

    /// Per-invocation timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string(), "-p".to_string()],
            timeout_ms: 300_000,
        }
    }
}

/// Session behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Bounded concurrency for sub-workflows (1..=16)
    #[serde(rename = "max-parallel-files")]
    pub max_parallel_files: usize,

    /// Assistant attempts per file
    #[serde(rename = "max-attempts-per-file")]
    pub max_attempts_per_file: u32,

    /// Cap on findings included in one prompt (0 = unbounded)
    #[serde(rename = "max-errors-per-prompt")]
    pub max_errors_per_prompt: usize,

    /// How findings are grouped into prompts
    #[serde(rename = "processing-strategy")]
    pub processing_strategy: ProcessingStrategy,

    /// Whether sandbox test runs are enabled
    #[serde(rename = "run-tests")]
    pub run_tests: bool,

    /// When and how tests run
    #[serde(rename = "test-mode")]
    pub test_mode: TestMode,

    /// Whether per-file sandboxes are used
    #[serde(rename = "use-isolation")]
    pub use_isolation: bool,

    /// Keep processing other files after one fails
    #[serde(rename = "continue-on-error")]
    pub continue_on_error: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_parallel_files: 1,
            max_attempts_per_file: 3,
            max_errors_per_prompt: 0,
            processing_strategy: ProcessingStrategy::BatchErrors,
            run_tests: true,
            test_mode: TestMode::Full,
            use_isolation: true,
            continue_on_error: true,
        }
    }
}

/// Learning store tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Save durably after every recorded attempt
    #[serde(rename = "auto-save")]
    pub auto_save: bool,

    /// Bound on per-pattern history
    #[serde(rename = "history-limit")]
    pub history_limit: usize,

    /// Size of top-N statistics lists
    #[serde(rename = "top-n")]
    pub top_n: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            auto_save: true,
            history_limit: 20,
            top_n: 5,
        }
    }
}
