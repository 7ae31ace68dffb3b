//! Learning store (mapper)
//!
//! Accumulates per-(tool, rule-code) outcomes across sessions and turns
//! that history into prompting-strategy recommendations: how verbose the
//! next prompt should be, and which strategy to fall back to after a
//! failure. The store is a single versioned JSON document under the main
//! repository root, written durably after every recorded attempt.

mod pattern;
mod store;
mod strategy;

pub use pattern::{AttemptRecord, ErrorPattern, LearningData, Outcome};
pub use store::{
    LearningError, LearningOptions, LearningStatistics, LearningStore, PatternSummary, SCHEMA_VERSION,
};
pub use strategy::{AdaptiveStrategy, Strategy};
