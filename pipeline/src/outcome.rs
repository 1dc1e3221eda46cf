//! What a handler returns from running one node, spec §3 `Outcome`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    PartialSuccess,
    Retry,
    Fail,
    Skipped,
}

impl OutcomeStatus {
    /// Rank used by the FanIn handler to pick the best of several branch outcomes: lower is
    /// better, spec §4.10.
    pub fn rank(self) -> u8 {
        match self {
            OutcomeStatus::Success => 0,
            OutcomeStatus::PartialSuccess => 1,
            OutcomeStatus::Retry => 2,
            OutcomeStatus::Fail | OutcomeStatus::Skipped => 3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub preferred_label: Option<String>,
    #[serde(default)]
    pub suggested_next_ids: Vec<String>,
    #[serde(default)]
    pub context_updates: HashMap<String, Value>,
    pub notes: Option<String>,
    pub failure_reason: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            status: OutcomeStatus::Success,
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            context_updates: HashMap::new(),
            notes: None,
            failure_reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self { failure_reason: Some(reason.into()), ..Self::with_status(OutcomeStatus::Fail) }
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Self { failure_reason: Some(reason.into()), ..Self::with_status(OutcomeStatus::Retry) }
    }

    fn with_status(status: OutcomeStatus) -> Self {
        Self {
            status,
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            context_updates: HashMap::new(),
            notes: None,
            failure_reason: None,
        }
    }

    pub fn with_context_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_updates.insert(key.into(), value);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_orders_success_before_fail() {
        assert!(OutcomeStatus::Success.rank() < OutcomeStatus::PartialSuccess.rank());
        assert!(OutcomeStatus::PartialSuccess.rank() < OutcomeStatus::Retry.rank());
        assert!(OutcomeStatus::Retry.rank() < OutcomeStatus::Fail.rank());
        assert_eq!(OutcomeStatus::Fail.rank(), OutcomeStatus::Skipped.rank());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_value(OutcomeStatus::PartialSuccess).unwrap(), "partial_success");
    }
}
