//! Typed status conditions with stable transition timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionType {
    Available,
    Reconciled,
    Accepted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Degraded,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn new(
        type_: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        observed_generation: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            type_,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: now,
            observed_generation,
        }
    }

    /// Keep the previous `lastTransitionTime` when a condition of the same
    /// type already had the same status.
    pub fn carry_transition_time(mut self, previous: &[Condition]) -> Self {
        if let Some(prev) = find(previous, self.type_) {
            if prev.status == self.status {
                self.last_transition_time = prev.last_transition_time;
            }
        }
        self
    }

    /// Everything except the timestamp.
    pub fn same_state(&self, other: &Condition) -> bool {
        self.state_key() == other.state_key()
    }

    fn state_key(&self) -> (ConditionType, ConditionStatus, &str, &str, Option<i64>) {
        (self.type_, self.status, &self.reason, &self.message, self.observed_generation)
    }
}

pub fn find(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Order-independent comparison ignoring `lastTransitionTime`.
pub fn same_condition_set(a: &[Condition], b: &[Condition]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut ka: Vec<_> = a.iter().map(Condition::state_key).collect();
    let mut kb: Vec<_> = b.iter().map(Condition::state_key).collect();
    ka.sort();
    kb.sort();
    ka == kb
}
