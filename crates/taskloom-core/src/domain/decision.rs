//! Decision log: why the broker did what it did to a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;

/// One decision taken about a task.
///
/// Records what triggered it, which policy applied and what was done, so
/// "why is this task in the DLQ" can be answered from the store alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub task_id: TaskId,

    /// What was observed, e.g. the error and retry counters.
    pub trigger: serde_json::Value,

    /// Examples: "retry_policy", "lease", "dlq", "cancel".
    pub policy: String,

    /// Examples: "schedule_retry", "dead_letter", "reclaim", "replay".
    pub decision: String,

    pub context: Option<serde_json::Value>,

    pub decided_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(
        task_id: TaskId,
        trigger: serde_json::Value,
        policy: impl Into<String>,
        decision: impl Into<String>,
        context: Option<serde_json::Value>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            trigger,
            policy: policy.into(),
            decision: decision.into(),
            context,
            decided_at,
        }
    }
}
