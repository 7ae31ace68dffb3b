//! Prompting strategy ladder and adaptive recommendations

use serde::{Deserialize, Serialize};

/// Prompting verbosity ladder, in increasing context budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Findings list only
    Minimal,
    /// Findings plus file content
    #[default]
    Normal,
    /// Adds per-code advice and worked examples
    Detailed,
    /// Adds prior-attempt history and a suggested approach
    Verbose,
}

impl Strategy {
    /// The full ladder, lowest first
    pub const LADDER: [Strategy; 4] = [Self::Minimal, Self::Normal, Self::Detailed, Self::Verbose];

    /// Position in the ladder
    pub fn rank(self) -> usize {
        match self {
            Self::Minimal => 0,
            Self::Normal => 1,
            Self::Detailed => 2,
            Self::Verbose => 3,
        }
    }

    /// Climb `steps` rungs, saturating at `Verbose`
    pub fn escalate(self, steps: u32) -> Self {
        let rank = (self.rank() + steps as usize).min(Self::LADDER.len() - 1);
        Self::LADDER[rank]
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minimal => write!(f, "minimal"),
            Self::Normal => write!(f, "normal"),
            Self::Detailed => write!(f, "detailed"),
            Self::Verbose => write!(f, "verbose"),
        }
    }
}

/// Recommendation for the next prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptiveStrategy {
    /// Verbosity on the ladder
    pub verbosity: Strategy,

    /// Include worked examples for the rule codes
    pub include_examples: bool,

    /// Include prior-attempt history in the prompt
    pub include_history: bool,

    /// One-line approach hint from historical successes
    pub suggested_approach: Option<String>,
}

impl AdaptiveStrategy {
    /// The default recommendation when nothing is known
    pub fn normal() -> Self {
        Self {
            verbosity: Strategy::Normal,
            include_examples: false,
            include_history: false,
            suggested_approach: None,
        }
    }

    /// Recommendation wrapping a fallback strategy after a failed attempt
    ///
    /// Fallback attempts carry full context: the cheap prompt already lost.
    pub fn for_fallback(strategy: Strategy) -> Self {
        Self {
            verbosity: strategy,
            include_examples: true,
            include_history: true,
            suggested_approach: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder_order() {
        assert!(Strategy::Minimal < Strategy::Normal);
        assert!(Strategy::Normal < Strategy::Detailed);
        assert!(Strategy::Detailed < Strategy::Verbose);
    }

    #[test]
    fn test_escalate_saturates() {
        assert_eq!(Strategy::Detailed.escalate(0), Strategy::Detailed);
        assert_eq!(Strategy::Detailed.escalate(1), Strategy::Verbose);
        assert_eq!(Strategy::Detailed.escalate(10), Strategy::Verbose);
        assert_eq!(Strategy::Minimal.escalate(2), Strategy::Detailed);
    }

    #[test]
    fn test_strategy_serde() {
        let json = serde_json::to_string(&Strategy::Detailed).unwrap();
        assert_eq!(json, "\"detailed\"");
        let back: Strategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Strategy::Detailed);
    }

    #[test]
    fn test_adaptive_normal() {
        let rec = AdaptiveStrategy::normal();
        assert_eq!(rec.verbosity, Strategy::Normal);
        assert!(!rec.include_examples);
        assert!(rec.suggested_approach.is_none());
    }
}
