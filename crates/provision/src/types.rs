//! Execution types: options, per-change outcomes and the run report

use crate::diff::Action;
use crate::error::{Error, ProviderError};
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Why a change was never attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "id")]
pub enum BlockReason {
    /// An upstream change failed
    UpstreamFailed(String),
    /// The run was cancelled before this change started
    Cancelled,
    /// The run halted after an unrelated failure
    Halted,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpstreamFailed(id) => write!(f, "upstream {id} failed"),
            Self::Cancelled => f.write_str("run cancelled"),
            Self::Halted => f.write_str("run halted after a failure"),
        }
    }
}

/// Terminal state of one change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum Outcome {
    /// Provider work completed and the snapshot was updated
    Succeeded { attempts: u32 },
    /// Provider work failed terminally
    Failed { error: ProviderError, attempts: u32 },
    /// Never attempted
    Blocked { reason: BlockReason },
    /// Nothing to do
    Noop,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Noop)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Blocked { .. } => "blocked",
            Self::Noop => "no-op",
        }
    }
}

/// What to do with independent work after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep running branches that do not depend on the failure
    #[default]
    ContinueIndependent,
    /// Start nothing new after the first failure
    Halt,
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Maximum number of provider operations in flight
    pub jobs: usize,
    /// Retry policy for transient provider errors
    pub retry: RetryConfig,
    /// Deadline for a single provider operation
    pub timeout: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(300),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Counts of outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub blocked: usize,
    pub noop: usize,
}

impl ExecuteSummary {
    /// No change failed or was blocked
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.blocked == 0
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.blocked + self.noop
    }

    pub fn add_outcome(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Succeeded { .. } => self.succeeded += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Blocked { .. } => self.blocked += 1,
            Outcome::Noop => self.noop += 1,
        }
    }
}

/// Result of one change in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeReport {
    pub id: String,
    pub action: Action,
    pub outcome: Outcome,
}

/// Report of a whole run, in change-set order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub changes: Vec<ChangeReport>,
    /// The run was cancelled before every change started
    pub cancelled: bool,
}

impl RunReport {
    pub fn outcome(&self, id: &str) -> Option<&Outcome> {
        self.changes.iter().find(|c| c.id == id).map(|c| &c.outcome)
    }

    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for change in &self.changes {
            summary.add_outcome(&change.outcome);
        }
        summary
    }

    pub fn is_success(&self) -> bool {
        self.summary().is_success()
    }

    /// Failed changes with their captured errors
    pub fn failures(&self) -> BTreeMap<&str, &ProviderError> {
        self.changes
            .iter()
            .filter_map(|c| match &c.outcome {
                Outcome::Failed { error, .. } => Some((c.id.as_str(), error)),
                _ => None,
            })
            .collect()
    }

    /// First failure as an engine error, for callers that want a `Result`
    pub fn first_error(&self) -> Option<Error> {
        self.changes.iter().find_map(|c| match &c.outcome {
            Outcome::Failed { error, attempts } => Some(Error::ChangeFailed {
                id: c.id.clone(),
                attempts: *attempts,
                source: error.clone(),
            }),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boom() -> ProviderError {
        ProviderError::Permanent("boom".into())
    }

    fn report(outcomes: &[(&str, Outcome)]) -> RunReport {
        RunReport {
            changes: outcomes
                .iter()
                .map(|(id, outcome)| ChangeReport {
                    id: (*id).to_string(),
                    action: Action::Create,
                    outcome: outcome.clone(),
                })
                .collect(),
            cancelled: false,
        }
    }

    #[test]
    fn test_summary_counts_every_state() {
        let report = report(&[
            ("A", Outcome::Failed { error: boom(), attempts: 1 }),
            ("B", Outcome::Blocked { reason: BlockReason::UpstreamFailed("A".into()) }),
            ("C", Outcome::Succeeded { attempts: 1 }),
            ("D", Outcome::Noop),
        ]);
        let summary = report.summary();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.noop, 1);
        assert_eq!(summary.total(), 4);
        assert!(!summary.is_success());
        assert_eq!(report.failures().get("A"), Some(&&boom()));
    }

    #[test]
    fn test_first_error_names_change() {
        let report = report(&[("A", Outcome::Failed { error: boom(), attempts: 3 })]);
        let err = report.first_error().unwrap();
        assert!(matches!(err, Error::ChangeFailed { ref id, attempts: 3, .. } if id == "A"));
    }

    #[test]
    fn test_outcome_serializes_with_state_tag() {
        let json = serde_json::to_string(&Outcome::Blocked { reason: BlockReason::Cancelled }).unwrap();
        assert!(json.contains("\"state\":\"blocked\""));
        assert!(json.contains("cancelled"));
    }
}
