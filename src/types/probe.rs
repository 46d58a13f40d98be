//! Probe outcome classification

use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};

/// Tri-state classification of one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeOutcome {
    /// Every attempt answered
    Good,
    /// Some but not all attempts answered
    Warn,
    /// No attempt answered
    Fail,
}

impl ProbeOutcome {
    /// Label used on the console and in the datalog
    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Good => "Good",
            ProbeOutcome::Warn => "Warn",
            ProbeOutcome::Fail => "Fail",
        }
    }

    /// Label painted for the terminal
    pub fn painted(&self) -> ColoredString {
        match self {
            ProbeOutcome::Good => self.label().green(),
            ProbeOutcome::Warn => self.label().yellow(),
            ProbeOutcome::Fail => self.label().red().bold(),
        }
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Aggregate of `attempted` echo requests against one address.
///
/// Only constructible through [`ProbeResult::from_counts`], which keeps
/// `succeeded <= attempted` and derives the outcome from the ratio.
/// Deserialization rejects input breaking either rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredProbeResult")]
pub struct ProbeResult {
    outcome: ProbeOutcome,
    attempted: u32,
    succeeded: u32,
}

impl ProbeResult {
    /// Build from raw counts. `succeeded` is clamped to `attempted`.
    pub fn from_counts(attempted: u32, succeeded: u32) -> Self {
        let succeeded = succeeded.min(attempted);
        let outcome = if succeeded == 0 {
            ProbeOutcome::Fail
        } else if succeeded == attempted {
            ProbeOutcome::Good
        } else {
            ProbeOutcome::Warn
        };
        Self {
            outcome,
            attempted,
            succeeded,
        }
    }

    pub fn outcome(&self) -> ProbeOutcome {
        self.outcome
    }

    pub fn attempted(&self) -> u32 {
        self.attempted
    }

    pub fn succeeded(&self) -> u32 {
        self.succeeded
    }

    pub fn is_good(&self) -> bool {
        self.outcome == ProbeOutcome::Good
    }

    pub fn is_fail(&self) -> bool {
        self.outcome == ProbeOutcome::Fail
    }
}

#[derive(Deserialize)]
struct StoredProbeResult {
    outcome: ProbeOutcome,
    attempted: u32,
    succeeded: u32,
}

impl TryFrom<StoredProbeResult> for ProbeResult {
    type Error = String;

    fn try_from(stored: StoredProbeResult) -> Result<Self, Self::Error> {
        if stored.succeeded > stored.attempted {
            return Err(format!(
                "succeeded {} exceeds attempted {}",
                stored.succeeded, stored.attempted
            ));
        }
        let result = ProbeResult::from_counts(stored.attempted, stored.succeeded);
        if result.outcome != stored.outcome {
            return Err(format!(
                "outcome {} does not match {}/{}",
                stored.outcome, stored.succeeded, stored.attempted
            ));
        }
        Ok(result)
    }
}

impl std::fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}/{})", self.outcome, self.succeeded, self.attempted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_answered_is_good() {
        let result = ProbeResult::from_counts(4, 4);
        assert_eq!(result.outcome(), ProbeOutcome::Good);
        assert!(result.is_good());
    }

    #[test]
    fn test_none_answered_is_fail() {
        let result = ProbeResult::from_counts(4, 0);
        assert_eq!(result.outcome(), ProbeOutcome::Fail);
        assert!(result.is_fail());
    }

    #[test]
    fn test_partial_is_warn() {
        for succeeded in 1..4 {
            assert_eq!(
                ProbeResult::from_counts(4, succeeded).outcome(),
                ProbeOutcome::Warn
            );
        }
    }

    #[test]
    fn test_succeeded_never_exceeds_attempted() {
        let result = ProbeResult::from_counts(2, 7);
        assert_eq!(result.succeeded(), 2);
        assert_eq!(result.outcome(), ProbeOutcome::Good);
    }

    #[test]
    fn test_zero_attempts_is_fail() {
        // Never produced by a prober, but must not classify as Good
        assert_eq!(ProbeResult::from_counts(0, 0).outcome(), ProbeOutcome::Fail);
    }

    #[test]
    fn test_classification_matches_ratio_rules() {
        for attempted in 1..=6u32 {
            for succeeded in 0..=attempted {
                let result = ProbeResult::from_counts(attempted, succeeded);
                assert!(result.succeeded() <= result.attempted());
                assert_eq!(result.is_good(), succeeded == attempted);
                assert_eq!(result.is_fail(), succeeded == 0);
            }
        }
    }

    #[test]
    fn test_deserialize_keeps_invariants() {
        let stored = serde_json::to_string(&ProbeResult::from_counts(4, 3)).unwrap();
        let loaded: ProbeResult = serde_json::from_str(&stored).unwrap();
        assert_eq!(loaded, ProbeResult::from_counts(4, 3));

        let too_many = r#"{"outcome":"Good","attempted":2,"succeeded":7}"#;
        assert!(serde_json::from_str::<ProbeResult>(too_many).is_err());

        let wrong_outcome = r#"{"outcome":"Good","attempted":4,"succeeded":0}"#;
        assert!(serde_json::from_str::<ProbeResult>(wrong_outcome).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ProbeResult::from_counts(4, 3).to_string(), "Warn (3/4)");
    }
}
