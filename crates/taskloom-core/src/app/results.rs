//! Result handling: completion, failure with retry or dead-lettering, and
//! cancellation.
//!
//! Every path that takes a task out of RUNNING gives the agent's slot back in
//! the same transaction as the status change.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{
    BrokerError, DecisionRecord, DomainEvent, ReasonCode, Task, TaskId, TaskStatus,
};
use crate::policy::{Decider, Decision};
use crate::ports::{Clock, EventSink};
use crate::store::{MemoryStore, StatusFields, Tables};

const DEFAULT_ERROR: &str = "task reported failure";

/// Outcome an agent reports for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Done,
    Failed,
}

/// Input of `task.result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub status: ResultStatus,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// A failure that is not retryable ends in FAILED without touching the
    /// retry budget.
    #[serde(default = "default_retryable")]
    pub retryable: bool,
}

fn default_retryable() -> bool {
    true
}

impl TaskReport {
    pub fn done(result: serde_json::Value) -> Self {
        Self {
            status: ResultStatus::Done,
            result: Some(result),
            error: None,
            retryable: true,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Failed,
            result: None,
            error: Some(error.into()),
            retryable: true,
        }
    }

    pub fn permanent(mut self) -> Self {
        self.retryable = false;
        self
    }
}

pub struct ResultHandler {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    decider: Arc<dyn Decider>,
    events: Arc<dyn EventSink>,
}

impl ResultHandler {
    pub fn new(
        store: Arc<MemoryStore>,
        clock: Arc<dyn Clock>,
        decider: Arc<dyn Decider>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            clock,
            decider,
            events,
        }
    }

    pub async fn submit(&self, task_code: &str, report: TaskReport) -> Result<Task, BrokerError> {
        let now = self.clock.now();
        let decider = self.decider.as_ref();
        let (task, agent_id) = self
            .store
            .transact(|tables| {
                let id = tables.resolve(task_code)?;
                let current = tables.task(id)?;
                match current.status {
                    TaskStatus::Running => {}
                    status if status.is_terminal() => {
                        return Err(BrokerError::AlreadyTerminal {
                            task_id: id,
                            status,
                        });
                    }
                    _ => return Err(BrokerError::NotRunning(id)),
                }
                let agent_id = current.agent_id.clone();

                let task = match report.status {
                    ResultStatus::Done => tables.transition(
                        id,
                        TaskStatus::Running,
                        TaskStatus::Done,
                        StatusFields {
                            result: report.result,
                            ..StatusFields::default()
                        },
                        now,
                    )?,
                    ResultStatus::Failed => {
                        let error = report.error.unwrap_or_else(|| DEFAULT_ERROR.to_string());
                        if report.retryable {
                            apply_retry_decision(tables, decider, id, error, now)?
                        } else {
                            fail_permanently(tables, id, error, now)?
                        }
                    }
                };
                Ok::<_, BrokerError>((task, agent_id))
            })
            .await?;

        self.announce(&task, agent_id).await;
        Ok(task)
    }

    /// Negative acknowledgement: a retryable failure with an explicit error.
    pub async fn nack(&self, task_code: &str, error: impl Into<String>) -> Result<Task, BrokerError> {
        self.submit(task_code, TaskReport::failed(error)).await
    }

    /// PENDING or RUNNING to CANCELLED. A running task's slot is released.
    pub async fn cancel(&self, id_or_code: &str) -> Result<Task, BrokerError> {
        let now = self.clock.now();
        let task = self
            .store
            .transact(|tables| {
                let id = tables.resolve(id_or_code)?;
                let from = tables.task(id)?.status;
                let task = tables.transition(
                    id,
                    from,
                    TaskStatus::Cancelled,
                    StatusFields {
                        reason_code: Some(ReasonCode::Cancelled),
                        ..StatusFields::default()
                    },
                    now,
                )?;
                tables.record_decision(DecisionRecord::new(
                    id,
                    serde_json::json!({ "from": from }),
                    "cancel",
                    "cancel",
                    None,
                    now,
                ));
                Ok::<_, BrokerError>(task)
            })
            .await?;

        info!(task_id = %task.id, task_code = %task.task_code, "task cancelled");
        self.events
            .emit(DomainEvent::TaskCancelled { task_id: task.id })
            .await;
        Ok(task)
    }

    async fn announce(&self, task: &Task, agent_id: Option<String>) {
        let event = match task.status {
            TaskStatus::Done => {
                info!(
                    task_id = %task.id,
                    task_code = %task.task_code,
                    agent_id = agent_id.as_deref().unwrap_or("-"),
                    "task completed"
                );
                DomainEvent::TaskCompleted {
                    task_id: task.id,
                    agent_id,
                }
            }
            TaskStatus::Dlq => {
                info!(
                    task_id = %task.id,
                    task_code = %task.task_code,
                    retry_count = task.retry_count,
                    reason_code = %ReasonCode::ExecutionFailed,
                    "task dead-lettered"
                );
                DomainEvent::TaskDeadLettered {
                    task_id: task.id,
                    retry_count: task.retry_count,
                }
            }
            TaskStatus::Failed => {
                info!(
                    task_id = %task.id,
                    task_code = %task.task_code,
                    reason_code = %ReasonCode::ExecutionFailed,
                    "task failed permanently"
                );
                DomainEvent::TaskFailed { task_id: task.id }
            }
            _ => {
                let next_retry_ts = task.next_retry_ts.unwrap_or(task.updated_at);
                info!(
                    task_id = %task.id,
                    task_code = %task.task_code,
                    retry_count = task.retry_count,
                    %next_retry_ts,
                    "task retry scheduled"
                );
                DomainEvent::TaskRetryScheduled {
                    task_id: task.id,
                    retry_count: task.retry_count,
                    next_retry_ts,
                }
            }
        };
        self.events.emit(event).await;
    }
}

fn apply_retry_decision(
    tables: &mut Tables,
    decider: &dyn Decider,
    id: TaskId,
    error: String,
    now: DateTime<Utc>,
) -> Result<Task, BrokerError> {
    let task = tables.task_in(id, TaskStatus::Running)?;
    let agent_id = task.agent_id.clone();
    let trigger = serde_json::json!({
        "error": error,
        "retry_count": task.retry_count,
        "max_retries": task.max_retries,
    });

    let (decision, context) = match decider.decide(task) {
        Decision::Retry {
            retry_count,
            delay,
            reason,
        } => {
            let next_retry_ts = now
                .checked_add_signed(delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            task.schedule_retry(retry_count, next_retry_ts, error, now);
            let context = serde_json::json!({
                "delay_secs": delay.num_seconds(),
                "next_retry_ts": next_retry_ts,
                "reason": reason,
            });
            ("schedule_retry", context)
        }
        Decision::DeadLetter {
            retry_count,
            reason,
        } => {
            task.dead_letter(retry_count, error, now);
            ("dead_letter", serde_json::json!({ "reason": reason }))
        }
    };
    let task = task.clone();

    if let Some(agent_id) = agent_id {
        tables.release_capacity(&agent_id);
    }
    tables.record_decision(DecisionRecord::new(
        id,
        trigger,
        "retry_policy",
        decision,
        Some(context),
        now,
    ));
    Ok(task)
}

fn fail_permanently(
    tables: &mut Tables,
    id: TaskId,
    error: String,
    now: DateTime<Utc>,
) -> Result<Task, BrokerError> {
    let trigger = serde_json::json!({ "error": error, "retryable": false });
    let task = tables.transition(
        id,
        TaskStatus::Running,
        TaskStatus::Failed,
        StatusFields {
            last_error: Some(error),
            ..StatusFields::default()
        },
        now,
    )?;
    tables.record_decision(DecisionRecord::new(
        id,
        trigger,
        "result",
        "fail_permanently",
        None,
        now,
    ));
    Ok(task)
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::domain::Agent;
    use crate::domain::task::fixtures::{t0, task};
    use crate::policy::{Backoff, RetryDecider, RetryPolicy};
    use crate::ports::{FixedClock, MemoryEventSink};

    struct Harness {
        store: Arc<MemoryStore>,
        clock: Arc<FixedClock>,
        events: Arc<MemoryEventSink>,
        results: ResultHandler,
    }

    async fn harness(backoff: Backoff) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(t0()));
        let events = Arc::new(MemoryEventSink::new());
        let decider = Arc::new(RetryDecider::new(RetryPolicy::new(backoff)));
        let results = ResultHandler::new(store.clone(), clock.clone(), decider, events.clone());
        store
            .transact(|tables| {
                tables.put_agent(Agent {
                    agent_id: "agent-a".into(),
                    name: None,
                    owner_role: "qa".into(),
                    capabilities: Default::default(),
                    allowed_tools: Default::default(),
                    capacity: 1,
                    leased: 0,
                    online: true,
                    last_seen: t0(),
                })
            })
            .await;
        Harness {
            store,
            clock,
            events,
            results,
        }
    }

    /// Insert `code` if needed and put it in RUNNING on `agent-a` at the
    /// current clock time.
    async fn start(h: &Harness, code: &str) -> Task {
        let now = h.clock.now();
        h.store
            .transact(|tables| {
                let id = match tables.task_by_code(code) {
                    Some(t) => t.id,
                    None => tables.insert_task(task(code, "qa")).unwrap().id,
                };
                tables.lease_capacity("agent-a").unwrap();
                let t = tables.task_mut(id).unwrap();
                t.assign("agent-a", now);
                t.clone()
            })
            .await
    }

    async fn leased(h: &Harness) -> u32 {
        h.store
            .read(|tables| tables.agent("agent-a").map(|a| a.leased))
            .await
            .unwrap()
    }

    #[test]
    fn report_decodes_with_defaults() {
        let report: TaskReport = serde_json::from_str(r#"{"status": "FAILED"}"#).unwrap();
        assert_eq!(report.status, ResultStatus::Failed);
        assert!(report.retryable);
        assert_eq!(report.result, None);
    }

    #[tokio::test]
    async fn success_completes_and_releases_capacity() {
        let h = harness(Backoff::Fixed).await;
        start(&h, "BUG-1").await;

        let done = h
            .results
            .submit("BUG-1", TaskReport::done(serde_json::json!({"fixed": true})))
            .await
            .unwrap();

        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(done.result, Some(serde_json::json!({"fixed": true})));
        assert_eq!(done.agent_id, None);
        assert_eq!(leased(&h).await, 0);
        assert!(matches!(
            h.events.events().as_slice(),
            [DomainEvent::TaskCompleted { agent_id: Some(_), .. }]
        ));
    }

    #[tokio::test]
    async fn third_failure_dead_letters() {
        let h = harness(Backoff::Fixed).await;

        for attempt in 1..=2u32 {
            start(&h, "BUG-1").await;
            let retried = h.results.nack("BUG-1", format!("boom {attempt}")).await.unwrap();
            assert_eq!(retried.status, TaskStatus::Pending);
            assert_eq!(retried.retry_count, attempt);
            assert_eq!(
                retried.next_retry_ts,
                Some(h.clock.now() + TimeDelta::seconds(30))
            );
            assert_eq!(leased(&h).await, 0);
            h.clock.advance(TimeDelta::seconds(30));
        }

        start(&h, "BUG-1").await;
        let dead = h.results.nack("BUG-1", "boom 3").await.unwrap();
        assert_eq!(dead.status, TaskStatus::Dlq);
        assert_eq!(dead.retry_count, 3);
        assert_eq!(dead.next_retry_ts, None);
        assert_eq!(dead.last_error.as_deref(), Some("boom 3"));
        assert_eq!(dead.reason_code, Some(ReasonCode::ExecutionFailed));
        assert_eq!(leased(&h).await, 0);

        let decisions = h.store.read(|tables| tables.decisions_for(dead.id)).await;
        let kinds: Vec<_> = decisions.iter().map(|d| d.decision.as_str()).collect();
        assert_eq!(kinds, ["schedule_retry", "schedule_retry", "dead_letter"]);
    }

    #[tokio::test]
    async fn exponential_backoff_is_applied() {
        let h = harness(Backoff::Exponential {
            multiplier: 2.0,
            max_delay_sec: None,
        })
        .await;
        start(&h, "BUG-1").await;
        h.results.nack("BUG-1", "boom").await.unwrap();
        h.clock.advance(TimeDelta::seconds(30));
        start(&h, "BUG-1").await;

        let second = h.results.nack("BUG-1", "boom").await.unwrap();
        assert_eq!(
            second.next_retry_ts,
            Some(h.clock.now() + TimeDelta::seconds(60))
        );
    }

    #[tokio::test]
    async fn permanent_failure_skips_the_retry_budget() {
        let h = harness(Backoff::Fixed).await;
        start(&h, "BUG-1").await;

        let failed = h
            .results
            .submit("BUG-1", TaskReport::failed("bad input").permanent())
            .await
            .unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.retry_count, 0);
        assert_eq!(failed.last_error.as_deref(), Some("bad input"));
        assert_eq!(leased(&h).await, 0);

        let err = h
            .results
            .submit("BUG-1", TaskReport::done(serde_json::json!(null)))
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::AlreadyTerminal);
    }

    #[tokio::test]
    async fn result_for_pending_task_is_not_running() {
        let h = harness(Backoff::Fixed).await;
        let id = h
            .store
            .transact(|tables| tables.insert_task(task("BUG-1", "qa")).unwrap().id)
            .await;

        let err = h.results.nack("BUG-1", "boom").await.unwrap_err();
        assert_eq!(err, BrokerError::NotRunning(id));
    }

    #[tokio::test]
    async fn cancel_running_task_releases_capacity() {
        let h = harness(Backoff::Fixed).await;
        start(&h, "BUG-1").await;

        let cancelled = h.results.cancel("BUG-1").await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(cancelled.reason_code, Some(ReasonCode::Cancelled));
        assert_eq!(leased(&h).await, 0);

        let err = h.results.cancel("BUG-1").await.unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::AlreadyTerminal);
    }
}
