//! LearningStore - persistent mapper from rule codes to strategy advice

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::pattern::{ErrorPattern, LearningData, Outcome};
use super::strategy::{AdaptiveStrategy, Strategy};

/// Schema version written by this build
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Error types for the learning store
#[derive(Debug, thiserror::Error)]
pub enum LearningError {
    #[error("Learning store path resolves inside a sandbox: {0}")]
    PathInsideSandbox(PathBuf),

    #[error("Failed to write learning data: {0}")]
    WriteFailed(String),
}

/// Tunables for the store
#[derive(Debug, Clone)]
pub struct LearningOptions {
    /// Save durably after every record
    pub auto_save: bool,

    /// Bound on per-pattern history
    pub history_limit: usize,

    /// Size of the top-N statistics lists
    pub top_n: usize,
}

impl Default for LearningOptions {
    fn default() -> Self {
        Self {
            auto_save: true,
            history_limit: 20,
            top_n: 5,
        }
    }
}

/// Summary row in [`LearningStatistics`]
#[derive(Debug, Clone, serde::Serialize)]
pub struct PatternSummary {
    pub key: String,
    pub attempts: u64,
    pub success_rate: f64,
}

/// Aggregate view over all patterns
#[derive(Debug, Clone, serde::Serialize)]
pub struct LearningStatistics {
    pub total_attempts: u64,
    pub total_successes: u64,
    pub overall_success_rate: f64,
    pub pattern_count: usize,
    pub most_difficult: Vec<PatternSummary>,
    pub most_successful: Vec<PatternSummary>,
}

/// Persistent per-project learning store
///
/// Sole writer of the learning document. All access goes through an
/// internal lock; the on-disk file always reflects a consistent prefix of
/// the update sequence because every write is temp-file-plus-rename.
pub struct LearningStore {
    storage_path: PathBuf,
    options: LearningOptions,
    /// False when the on-disk document has a newer major version
    writable: bool,
    data: Mutex<LearningData>,
}

impl LearningStore {
    /// Open the store for a repository, with default options
    pub fn open(repo_root: &Path) -> Result<Self, LearningError> {
        Self::open_with(repo_root, LearningOptions::default())
    }

    /// Open the store for a repository
    ///
    /// The document lives at `{repo_root}/.stomper/learning_data.json` and
    /// must be rooted at the main repository, never inside a sandbox.
    pub fn open_with(repo_root: &Path, options: LearningOptions) -> Result<Self, LearningError> {
        let resolved = repo_root.canonicalize().unwrap_or_else(|_| repo_root.to_path_buf());
        if path_inside_sandbox(&resolved) {
            return Err(LearningError::PathInsideSandbox(resolved));
        }

        let storage_path = resolved.join(".stomper").join("learning_data.json");
        let (data, writable) = load_tolerant(&storage_path);

        debug!(path = %storage_path.display(), writable, "LearningStore::open: loaded");
        Ok(Self {
            storage_path,
            options,
            writable,
            data: Mutex::new(data),
        })
    }

    /// Where the document is stored
    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Record one attempt outcome for a (tool, code) pattern
    ///
    /// Saves durably afterwards when auto-save is on; a failed save is
    /// logged and swallowed.
    pub fn record(&self, tool: &str, code: &str, outcome: Outcome, strategy: Strategy, file: Option<&Path>) {
        let key = LearningData::key(tool, code);
        debug!(%key, %outcome, %strategy, "LearningStore::record: called");

        {
            let mut data = self.data.lock().expect("learning data poisoned");
            let pattern = data.patterns.entry(key).or_default();
            pattern.record(
                outcome,
                strategy,
                file.map(|p| p.display().to_string()),
                self.options.history_limit,
            );

            data.total_attempts += 1;
            if outcome == Outcome::Success {
                data.total_successes += 1;
            }
            data.last_updated = Utc::now();
        }

        if self.options.auto_save {
            if let Err(e) = self.save() {
                warn!("Learning store save failed: {}", e);
            }
        }
    }

    /// Recommend a strategy for the next prompt
    ///
    /// `retry_count` escalates verbosity for difficult patterns.
    pub fn adapt(&self, tool: &str, code: &str, retry_count: u32) -> AdaptiveStrategy {
        let data = self.data.lock().expect("learning data poisoned");
        let pattern = data.patterns.get(&LearningData::key(tool, code));

        let pattern = match pattern {
            Some(p) if p.total_attempts > 0 => p,
            _ => return AdaptiveStrategy::normal(),
        };

        if pattern.is_difficult() {
            let suggested = pattern.best_strategy().map(|s| {
                format!(
                    "Past fixes for {} most often succeeded with the {} approach",
                    code, s
                )
            });
            return AdaptiveStrategy {
                verbosity: Strategy::Detailed.escalate(retry_count),
                include_examples: true,
                include_history: true,
                suggested_approach: suggested,
            };
        }

        let rate = pattern.success_rate();
        if rate >= 0.8 {
            return AdaptiveStrategy {
                verbosity: Strategy::Minimal,
                include_examples: false,
                include_history: false,
                suggested_approach: None,
            };
        }

        AdaptiveStrategy {
            verbosity: Strategy::Normal,
            include_examples: rate < 0.6,
            include_history: false,
            suggested_approach: None,
        }
    }

    /// Next strategy to try after a failure, or None when exhausted
    ///
    /// Prefers a historically-successful strategy that has not been tried;
    /// otherwise walks the ladder from Minimal upward, skipping entries in
    /// `already_failed`.
    pub fn fallback(&self, tool: &str, code: &str, already_failed: &BTreeSet<Strategy>) -> Option<Strategy> {
        let data = self.data.lock().expect("learning data poisoned");
        let pattern = data.patterns.get(&LearningData::key(tool, code));

        if let Some(pattern) = pattern {
            for strategy in Strategy::LADDER {
                if pattern.successful_strategies.contains(&strategy) && !already_failed.contains(&strategy) {
                    return Some(strategy);
                }
            }
        }

        Strategy::LADDER.into_iter().find(|s| !already_failed.contains(s))
    }

    /// Success rate for a pattern; zero when unknown
    pub fn success_rate(&self, tool: &str, code: &str) -> f64 {
        let data = self.data.lock().expect("learning data poisoned");
        data.patterns
            .get(&LearningData::key(tool, code))
            .map(ErrorPattern::success_rate)
            .unwrap_or(0.0)
    }

    /// Aggregate statistics with top-N extremes
    pub fn statistics(&self) -> LearningStatistics {
        let data = self.data.lock().expect("learning data poisoned");

        let mut rows: Vec<PatternSummary> = data
            .patterns
            .iter()
            .map(|(key, pattern)| PatternSummary {
                key: key.clone(),
                attempts: pattern.total_attempts,
                success_rate: pattern.success_rate(),
            })
            .collect();

        rows.sort_by(|a, b| {
            a.success_rate
                .partial_cmp(&b.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.attempts.cmp(&a.attempts))
        });

        let most_difficult: Vec<_> = rows.iter().take(self.options.top_n).cloned().collect();
        let most_successful: Vec<_> = rows.iter().rev().take(self.options.top_n).cloned().collect();

        LearningStatistics {
            total_attempts: data.total_attempts,
            total_successes: data.total_successes,
            overall_success_rate: if data.total_attempts == 0 {
                0.0
            } else {
                data.total_successes as f64 / data.total_attempts as f64
            },
            pattern_count: data.patterns.len(),
            most_difficult,
            most_successful,
        }
    }

    /// Write the document durably: temp file in the same directory, then rename
    pub fn save(&self) -> Result<(), LearningError> {
        if !self.writable {
            debug!("LearningStore::save: store is read-only, skipping");
            return Ok(());
        }

        let json = {
            let data = self.data.lock().expect("learning data poisoned");
            serde_json::to_string_pretty(&*data).map_err(|e| LearningError::WriteFailed(e.to_string()))?
        };

        let dir = self
            .storage_path
            .parent()
            .ok_or_else(|| LearningError::WriteFailed("storage path has no parent".to_string()))?;
        std::fs::create_dir_all(dir).map_err(|e| LearningError::WriteFailed(e.to_string()))?;

        let mut temp =
            tempfile::NamedTempFile::new_in(dir).map_err(|e| LearningError::WriteFailed(e.to_string()))?;
        temp.write_all(json.as_bytes())
            .map_err(|e| LearningError::WriteFailed(e.to_string()))?;
        temp.persist(&self.storage_path)
            .map_err(|e| LearningError::WriteFailed(e.to_string()))?;

        debug!(path = %self.storage_path.display(), "LearningStore::save: written");
        Ok(())
    }

    /// Clone of the in-memory document (round-trip tests, reporting)
    pub fn snapshot(&self) -> LearningData {
        self.data.lock().expect("learning data poisoned").clone()
    }
}

/// Reject store roots that resolve under `.stomper/sandboxes`
fn path_inside_sandbox(path: &Path) -> bool {
    let components: Vec<_> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    components
        .windows(2)
        .any(|w| w[0] == ".stomper" && w[1] == "sandboxes")
}

/// Load the document, tolerating absence and corruption
///
/// Returns the data plus whether the store may be written back. A document
/// with a newer major version is left untouched on disk: the in-memory view
/// starts empty and saving is disabled.
fn load_tolerant(path: &Path) -> (LearningData, bool) {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => {
            debug!(path = %path.display(), "load_tolerant: no existing document");
            return (LearningData::default(), true);
        }
    };

    let data: LearningData = match serde_json::from_str(&content) {
        Ok(data) => data,
        Err(e) => {
            warn!("Learning data at {} is malformed ({}), starting empty", path.display(), e);
            return (LearningData::default(), true);
        }
    };

    let file_major = data.version.split('.').next().unwrap_or("");
    let own_major = SCHEMA_VERSION.split('.').next().unwrap_or("");
    if file_major != own_major {
        warn!(
            "Learning data at {} has schema version {} (supported major: {}); refusing to downgrade",
            path.display(),
            data.version,
            own_major
        );
        return (LearningData::default(), false);
    }

    info!(
        patterns = data.patterns.len(),
        attempts = data.total_attempts,
        "Loaded learning data"
    );
    (data, true)
}
