//! LeaseManager: heartbeats extend a running task's lease, the sweep takes
//! back tasks whose lease ran out.
//!
//! Each reclaim is its own transaction that re-checks the expiry, so a
//! heartbeat racing the sweep either lands first (the lease is extended and
//! the task skipped) or finds the task already back in PENDING.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{
    BrokerError, DecisionRecord, DomainEvent, ReasonCode, TaskId, TaskStatus,
};
use crate::ports::{Clock, EventSink};
use crate::store::{MemoryStore, StatusFields};

/// One status change made by a background or recovery pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDelta {
    pub task_id: TaskId,
    pub task_code: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub agent_id: Option<String>,
    pub reason_code: ReasonCode,
}

pub struct LeaseManager {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl LeaseManager {
    pub fn new(store: Arc<MemoryStore>, clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            clock,
            events,
        }
    }

    /// Push the lease out to `now + lease_seconds`. Only a RUNNING task has a
    /// lease to extend.
    pub async fn heartbeat(&self, id_or_code: &str) -> Result<DateTime<Utc>, BrokerError> {
        let now = self.clock.now();
        let (task_id, expiry) = self
            .store
            .transact(|tables| {
                let id = tables.resolve(id_or_code)?;
                let status = tables.task(id)?.status;
                if status.is_terminal() {
                    return Err(BrokerError::AlreadyTerminal {
                        task_id: id,
                        status,
                    });
                }
                let task = tables
                    .task_in(id, TaskStatus::Running)
                    .map_err(|_| BrokerError::NotRunning(id))?;
                let expiry = task.extend_lease(now);
                let agent_id = task.agent_id.clone();
                if let Some(agent_id) = agent_id {
                    tables.touch_agent(&agent_id, now);
                }
                Ok((id, expiry))
            })
            .await?;
        debug!(%task_id, lease_expiry_ts = %expiry, "lease extended");
        Ok(expiry)
    }

    /// Return every RUNNING task whose lease expired before now to PENDING
    /// and give its slot back.
    pub async fn sweep(&self) -> Result<Vec<TaskDelta>, BrokerError> {
        let now = self.clock.now();
        let expired: Vec<TaskId> = self
            .store
            .read(|tables| {
                tables
                    .tasks()
                    .filter(|task| task.lease_expired_at(now))
                    .map(|task| task.id)
                    .collect()
            })
            .await;

        let mut reclaimed = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(delta) = self.reclaim(id, now).await? {
                reclaimed.push(delta);
            }
        }
        Ok(reclaimed)
    }

    async fn reclaim(
        &self,
        id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskDelta>, BrokerError> {
        let delta = self
            .store
            .transact(|tables| {
                let task = tables.task(id)?;
                if !task.lease_expired_at(now) {
                    return Ok(None);
                }
                let agent_id = task.agent_id.clone();
                let expired_at = task.lease_expiry_ts;

                let task = tables.transition(
                    id,
                    TaskStatus::Running,
                    TaskStatus::Pending,
                    StatusFields {
                        reason_code: Some(ReasonCode::LeaseExpired),
                        ..StatusFields::default()
                    },
                    now,
                )?;
                tables.record_decision(DecisionRecord::new(
                    id,
                    serde_json::json!({
                        "agent_id": agent_id,
                        "lease_expiry_ts": expired_at,
                    }),
                    "lease",
                    "reclaim",
                    None,
                    now,
                ));
                Ok::<_, BrokerError>(Some(TaskDelta {
                    task_id: id,
                    task_code: task.task_code,
                    from: TaskStatus::Running,
                    to: TaskStatus::Pending,
                    agent_id,
                    reason_code: ReasonCode::LeaseExpired,
                }))
            })
            .await?;

        if let Some(delta) = &delta {
            warn!(
                task_id = %delta.task_id,
                task_code = %delta.task_code,
                agent_id = delta.agent_id.as_deref().unwrap_or("-"),
                reason_code = %ReasonCode::LeaseExpired,
                "lease expired, task reclaimed"
            );
            self.events
                .emit(DomainEvent::TaskReclaimed {
                    task_id: delta.task_id,
                    agent_id: delta.agent_id.clone(),
                })
                .await;
        }
        Ok(delta)
    }
}
