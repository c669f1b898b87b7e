//! TaskStore: CRUD over task rows, with compare-and-swap status updates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{MemoryStore, Tables};
use crate::domain::{
    BrokerError, DecisionRecord, NewTask, ReasonCode, Routing, Task, TaskId, TaskStatus,
};
use crate::ports::{Clock, IdGenerator};

/// Extra fields written alongside a status change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusFields {
    pub result: Option<serde_json::Value>,
    pub last_error: Option<String>,
    pub reason_code: Option<ReasonCode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub owner_role: Option<String>,
    pub agent_id: Option<String>,
}

impl TaskFilter {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|s| s == task.status)
            && self
                .owner_role
                .as_deref()
                .is_none_or(|role| role == task.owner_role)
            && self
                .agent_id
                .as_deref()
                .is_none_or(|agent| task.agent_id.as_deref() == Some(agent))
    }
}

impl Tables {
    /// Tasks matching `filter`, in insertion order.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.seq);
        tasks
    }

    /// Compare-and-swap status change for every transition except entering
    /// `Running`, which only the scheduler performs. Leaving `Running`
    /// releases the assigned agent's slot in the same step.
    pub(crate) fn transition(
        &mut self,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        fields: StatusFields,
        now: DateTime<Utc>,
    ) -> Result<Task, BrokerError> {
        let allowed = match (from, to) {
            (_, TaskStatus::Running) => false,
            (TaskStatus::Dlq, TaskStatus::Pending) => true,
            (from, _) if from.is_terminal() => {
                return Err(BrokerError::AlreadyTerminal {
                    task_id: id,
                    status: from,
                });
            }
            (from, to) => from != to,
        };
        if !allowed {
            return Err(BrokerError::InvalidTransition { task_id: id, from, to });
        }

        let task = self.task_in(id, from)?;
        let released_agent = if from == TaskStatus::Running {
            task.agent_id.clone()
        } else {
            None
        };

        let error = fields.last_error.clone();
        match to {
            TaskStatus::Done => task.complete(fields.result, now),
            TaskStatus::Failed => task.fail_permanently(error.unwrap_or_default(), now),
            TaskStatus::Dlq => {
                let retry_count = task.retry_count;
                task.dead_letter(retry_count, error.unwrap_or_default(), now);
            }
            TaskStatus::Cancelled => task.cancel(now),
            TaskStatus::Pending if from == TaskStatus::Dlq => task.replay(now),
            TaskStatus::Pending => task.reclaim(now),
            TaskStatus::Running => {
                return Err(BrokerError::InvalidTransition { task_id: id, from, to });
            }
        }
        if let Some(reason) = fields.reason_code {
            task.reason_code = Some(reason);
        }
        let task = task.clone();

        if let Some(agent_id) = released_agent {
            self.release_capacity(&agent_id);
        }
        Ok(task)
    }
}

/// Durable CRUD over task records.
pub struct TaskStore {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl TaskStore {
    pub fn new(store: Arc<MemoryStore>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { store, clock, ids }
    }

    /// Insert a validated, routed task as PENDING.
    pub async fn create(&self, new: NewTask, routing: Routing) -> Result<Task, BrokerError> {
        let now = self.clock.now();
        let task = Task {
            id: self.ids.task_id(),
            task_code: new.task_code,
            owner_role: new.owner_role,
            instructions: new.instructions,
            area: new.area,
            how_to_repro: new.how_to_repro,
            expected: new.expected,
            evidence_requirements: new.evidence_requirements,
            priority: new.priority,
            status: TaskStatus::Pending,
            agent_id: new.pinned_agent.clone(),
            pinned_agent: new.pinned_agent,
            required_tools: new.required_tools,
            dependencies: new.dependencies,
            routing,
            created_at: now,
            updated_at: now,
            lease_seconds: new.lease_seconds,
            lease_expiry_ts: None,
            retry_count: 0,
            max_retries: new.max_retries,
            retry_backoff_sec: new.retry_backoff_sec,
            next_retry_ts: None,
            reason_code: None,
            last_error: None,
            result: None,
            seq: 0,
        };

        let task = self.store.transact(|tables| tables.insert_task(task)).await?;
        info!(
            task_id = %task.id,
            task_code = %task.task_code,
            owner_role = %task.owner_role,
            worker_type = %task.routing.worker_type,
            "task stored"
        );
        Ok(task)
    }

    pub async fn get(&self, id_or_code: &str) -> Result<Task, BrokerError> {
        self.store
            .read(|tables| {
                let id = tables.resolve(id_or_code)?;
                tables.task(id).cloned()
            })
            .await
    }

    pub async fn update_status(
        &self,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        fields: StatusFields,
    ) -> Result<Task, BrokerError> {
        let now = self.clock.now();
        let task = self
            .store
            .transact(|tables| {
                let task = tables.transition(id, from, to, fields, now)?;
                tables.record_decision(DecisionRecord::new(
                    id,
                    serde_json::json!({ "from": from, "to": to }),
                    "task_store",
                    "update_status",
                    None,
                    now,
                ));
                Ok::<_, BrokerError>(task)
            })
            .await?;
        info!(task_id = %id, %from, %to, "task status updated");
        Ok(task)
    }

    pub async fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        self.store.read(|tables| tables.list_tasks(filter)).await
    }

    pub async fn decisions(&self, id_or_code: &str) -> Result<Vec<DecisionRecord>, BrokerError> {
        self.store
            .read(|tables| {
                let id = tables.resolve(id_or_code)?;
                Ok(tables.decisions_for(id))
            })
            .await
    }
}
