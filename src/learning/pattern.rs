//! Per-(tool, rule-code) outcome records and the persisted document

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::strategy::Strategy;

/// Outcome of one assistant attempt against a rule code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    /// Some findings fixed, some not; counts toward attempts only
    Partial,
    /// Attempt never ran; counts toward attempts only
    Skipped,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Partial => write!(f, "partial"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One entry in a pattern's bounded history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub outcome: Outcome,
    pub strategy: Strategy,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Persistent statistics for one `"{tool}:{code}"` pattern
///
/// Invariant: `successes + failures <= total_attempts` (partial and skipped
/// outcomes count toward the total only).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPattern {
    pub total_attempts: u64,
    pub successes: u64,
    pub failures: u64,

    /// Recent attempts, oldest evicted beyond the configured bound
    pub history: Vec<AttemptRecord>,

    /// Strategies that have ever succeeded for this pattern
    pub successful_strategies: BTreeSet<Strategy>,

    /// Strategies that have ever failed for this pattern
    pub failed_strategies: BTreeSet<Strategy>,
}

impl ErrorPattern {
    /// Success rate in [0, 1]; zero when nothing was attempted
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.total_attempts as f64
        }
    }

    /// A pattern that keeps resisting fixes
    pub fn is_difficult(&self) -> bool {
        self.total_attempts >= 3 && self.success_rate() < 0.5
    }

    /// The strategy that has most frequently produced a success
    pub fn best_strategy(&self) -> Option<Strategy> {
        let mut counts: BTreeMap<Strategy, usize> = BTreeMap::new();
        for record in &self.history {
            if record.outcome == Outcome::Success {
                *counts.entry(record.strategy).or_default() += 1;
            }
        }

        counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(strategy, _)| strategy)
            // History may have been evicted; the strategy sets persist
            .or_else(|| self.successful_strategies.iter().next().copied())
    }

    /// Fold one attempt into the pattern
    pub fn record(&mut self, outcome: Outcome, strategy: Strategy, file: Option<String>, history_limit: usize) {
        self.total_attempts += 1;

        match outcome {
            Outcome::Success => {
                self.successes += 1;
                self.successful_strategies.insert(strategy);
            }
            Outcome::Failure => {
                self.failures += 1;
                self.failed_strategies.insert(strategy);
            }
            Outcome::Partial | Outcome::Skipped => {}
        }

        self.history.push(AttemptRecord {
            outcome,
            strategy,
            timestamp: Utc::now(),
            file,
        });
        if self.history.len() > history_limit {
            let excess = self.history.len() - history_limit;
            self.history.drain(..excess);
        }
    }
}

/// The persisted learning document
///
/// Invariant: aggregate totals equal the sums across patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningData {
    /// Schema version, semver
    pub version: String,

    /// Pattern key `"{tool}:{code}"` to statistics
    pub patterns: BTreeMap<String, ErrorPattern>,

    pub total_attempts: u64,
    pub total_successes: u64,

    /// ISO-8601 timestamp of the last write
    pub last_updated: DateTime<Utc>,
}

impl Default for LearningData {
    fn default() -> Self {
        Self {
            version: super::store::SCHEMA_VERSION.to_string(),
            patterns: BTreeMap::new(),
            total_attempts: 0,
            total_successes: 0,
            last_updated: Utc::now(),
        }
    }
}

impl LearningData {
    /// Pattern key for a (tool, code) pair
    pub fn key(tool: &str, code: &str) -> String {
        format!("{}:{}", tool, code)
    }
}
