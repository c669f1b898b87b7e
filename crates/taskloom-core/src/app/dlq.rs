//! Dead-letter queue: tasks that used up their retry budget wait here until an
//! operator replays them.

use std::sync::Arc;

use tracing::info;

use crate::domain::{BrokerError, DecisionRecord, DomainEvent, Task, TaskStatus};
use crate::ports::{Clock, EventSink};
use crate::store::{MemoryStore, StatusFields, TaskFilter};

pub struct DeadLetterQueue {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl DeadLetterQueue {
    pub fn new(store: Arc<MemoryStore>, clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            clock,
            events,
        }
    }

    pub async fn list(&self) -> Vec<Task> {
        self.store
            .read(|tables| tables.list_tasks(&TaskFilter::status(TaskStatus::Dlq)))
            .await
    }

    /// DLQ -> PENDING with a fresh retry budget. Any other status is
    /// `dlq_replay_invalid`.
    pub async fn replay(&self, id_or_code: &str) -> Result<Task, BrokerError> {
        let now = self.clock.now();
        let task = self
            .store
            .transact(|tables| {
                let id = tables.resolve(id_or_code)?;
                let current = tables.task(id)?;
                if current.status != TaskStatus::Dlq {
                    return Err(BrokerError::DlqReplayInvalid {
                        task_id: id,
                        status: current.status,
                    });
                }
                let trigger = serde_json::json!({
                    "retry_count": current.retry_count,
                    "last_error": current.last_error,
                });

                let task = tables.transition(
                    id,
                    TaskStatus::Dlq,
                    TaskStatus::Pending,
                    StatusFields::default(),
                    now,
                )?;
                tables.record_decision(DecisionRecord::new(id, trigger, "dlq", "replay", None, now));
                Ok(task)
            })
            .await?;

        info!(task_id = %task.id, task_code = %task.task_code, "task replayed from dlq");
        self.events
            .emit(DomainEvent::TaskReplayed { task_id: task.id })
            .await;
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ReasonCode;
    use crate::domain::task::fixtures::{t0, task};
    use crate::ports::{FixedClock, MemoryEventSink};

    fn dlq() -> (Arc<MemoryStore>, DeadLetterQueue) {
        let store = Arc::new(MemoryStore::new());
        let queue = DeadLetterQueue::new(
            store.clone(),
            Arc::new(FixedClock::new(t0())),
            Arc::new(MemoryEventSink::new()),
        );
        (store, queue)
    }

    #[tokio::test]
    async fn replay_resets_the_retry_budget() {
        let (store, dlq) = dlq();
        store
            .transact(|tables| {
                let mut dead = task("BUG-1", "qa");
                dead.dead_letter(3, "boom".into(), t0());
                tables.insert_task(dead).unwrap();
                tables.insert_task(task("BUG-2", "qa")).unwrap();
            })
            .await;

        let listed = dlq.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].task_code, "BUG-1");

        let replayed = dlq.replay("BUG-1").await.unwrap();
        assert_eq!(replayed.status, TaskStatus::Pending);
        assert_eq!(replayed.retry_count, 0);
        assert_eq!(replayed.next_retry_ts, None);
        assert_eq!(replayed.last_error.as_deref(), Some("boom"));
        assert!(dlq.list().await.is_empty());

        let history = store.read(|tables| tables.decisions_for(replayed.id)).await;
        assert_eq!(history[0].decision, "replay");
        assert_eq!(history[0].trigger["retry_count"], 3);
    }

    #[tokio::test]
    async fn replay_of_a_live_task_is_invalid() {
        let (store, dlq) = dlq();
        store
            .transact(|tables| tables.insert_task(task("BUG-2", "qa")).unwrap())
            .await;

        let err = dlq.replay("BUG-2").await.unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::DlqReplayInvalid);
        assert!(matches!(
            err,
            BrokerError::DlqReplayInvalid {
                status: TaskStatus::Pending,
                ..
            }
        ));
    }
}
