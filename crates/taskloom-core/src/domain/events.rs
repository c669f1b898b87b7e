//! Domain events, emitted after a transition has been committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    TaskCreated {
        task_id: TaskId,
        task_code: String,
        owner_role: String,
        worker_type: String,
    },
    TaskClaimed {
        task_id: TaskId,
        agent_id: String,
        lease_expiry_ts: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: TaskId,
        agent_id: Option<String>,
    },
    TaskRetryScheduled {
        task_id: TaskId,
        retry_count: u32,
        next_retry_ts: DateTime<Utc>,
    },
    TaskDeadLettered {
        task_id: TaskId,
        retry_count: u32,
    },
    TaskFailed {
        task_id: TaskId,
    },
    TaskReclaimed {
        task_id: TaskId,
        agent_id: Option<String>,
    },
    TaskReplayed {
        task_id: TaskId,
    },
    TaskCancelled {
        task_id: TaskId,
    },
}

impl DomainEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            DomainEvent::TaskCreated { task_id, .. }
            | DomainEvent::TaskClaimed { task_id, .. }
            | DomainEvent::TaskCompleted { task_id, .. }
            | DomainEvent::TaskRetryScheduled { task_id, .. }
            | DomainEvent::TaskDeadLettered { task_id, .. }
            | DomainEvent::TaskFailed { task_id }
            | DomainEvent::TaskReclaimed { task_id, .. }
            | DomainEvent::TaskReplayed { task_id }
            | DomainEvent::TaskCancelled { task_id } => *task_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::TaskCreated { .. } => "task_created",
            DomainEvent::TaskClaimed { .. } => "task_claimed",
            DomainEvent::TaskCompleted { .. } => "task_completed",
            DomainEvent::TaskRetryScheduled { .. } => "task_retry_scheduled",
            DomainEvent::TaskDeadLettered { .. } => "task_dead_lettered",
            DomainEvent::TaskFailed { .. } => "task_failed",
            DomainEvent::TaskReclaimed { .. } => "task_reclaimed",
            DomainEvent::TaskReplayed { .. } => "task_replayed",
            DomainEvent::TaskCancelled { .. } => "task_cancelled",
        }
    }
}
