//! Scheduler: hands the next eligible task to an agent.
//!
//! Selection, the capacity lease and the RUNNING transition happen inside one
//! store transaction, so two agents polling at the same moment can never both
//! receive the same task.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{BrokerError, DomainEvent, Task, TaskId, TaskStatus};
use crate::ports::{Clock, EventSink};
use crate::store::{MemoryStore, Tables};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    Assigned { task: Box<Task> },
    NoTask,
}

impl ClaimOutcome {
    pub fn task(&self) -> Option<&Task> {
        match self {
            ClaimOutcome::Assigned { task } => Some(task),
            ClaimOutcome::NoTask => None,
        }
    }

    pub fn into_task(self) -> Option<Task> {
        match self {
            ClaimOutcome::Assigned { task } => Some(*task),
            ClaimOutcome::NoTask => None,
        }
    }
}

pub struct Scheduler {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    gate_on_dependencies: bool,
}

impl Scheduler {
    pub fn new(store: Arc<MemoryStore>, clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            clock,
            events,
            gate_on_dependencies: false,
        }
    }

    /// Hold back tasks until every dependency is DONE.
    pub fn with_dependency_gate(mut self, enabled: bool) -> Self {
        self.gate_on_dependencies = enabled;
        self
    }

    pub async fn claim_next(&self, agent_id: &str) -> Result<ClaimOutcome, BrokerError> {
        let now = self.clock.now();
        let gate = self.gate_on_dependencies;

        let claimed = self
            .store
            .transact(|tables| {
                let view: &Tables = tables;
                let agent = view.agent(agent_id)?;
                if !agent.has_capacity() {
                    return Err(BrokerError::CapacityExhausted(agent_id.to_string()));
                }

                let candidate: Option<TaskId> = if agent.online {
                    view.tasks()
                        .filter(|task| task.is_claimable_at(now) && agent.may_claim(task))
                        .filter(|task| !gate || dependencies_done(view, task))
                        .min_by_key(|task| task.claim_key())
                        .map(|task| task.id)
                } else {
                    None
                };

                let Some(id) = candidate else {
                    tables.touch_agent(agent_id, now);
                    return Ok(None);
                };

                tables.lease_capacity(agent_id)?;
                let task = tables.task_in(id, TaskStatus::Pending)?;
                task.assign(agent_id, now);
                let task = task.clone();
                tables.touch_agent(agent_id, now);
                Ok(Some(task))
            })
            .await?;

        let Some(task) = claimed else {
            debug!(agent_id, "no task");
            return Ok(ClaimOutcome::NoTask);
        };

        let lease_expiry_ts = task.lease_expiry_ts.unwrap_or(now);
        info!(
            task_id = %task.id,
            task_code = %task.task_code,
            agent_id,
            priority = task.priority,
            %lease_expiry_ts,
            "task claimed"
        );
        self.events
            .emit(DomainEvent::TaskClaimed {
                task_id: task.id,
                agent_id: agent_id.to_string(),
                lease_expiry_ts,
            })
            .await;
        Ok(ClaimOutcome::Assigned {
            task: Box::new(task),
        })
    }
}

fn dependencies_done(tables: &Tables, task: &Task) -> bool {
    task.dependencies.iter().all(|code| {
        tables
            .task_by_code(code)
            .is_some_and(|dep| dep.status == TaskStatus::Done)
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::domain::task::fixtures::{t0, task};
    use crate::domain::{Agent, AgentRegistration};
    use crate::ports::{FixedClock, MemoryEventSink};

    struct Harness {
        store: Arc<MemoryStore>,
        clock: Arc<FixedClock>,
        events: Arc<MemoryEventSink>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                clock: Arc::new(FixedClock::new(t0())),
                events: Arc::new(MemoryEventSink::new()),
            }
        }

        fn scheduler(&self) -> Scheduler {
            Scheduler::new(self.store.clone(), self.clock.clone(), self.events.clone())
        }

        async fn agent(&self, spec: AgentRegistration) {
            self.store
                .transact(|tables| {
                    tables.put_agent(Agent {
                        agent_id: spec.agent_id,
                        name: None,
                        owner_role: spec.owner_role,
                        capabilities: spec.capabilities,
                        allowed_tools: spec.allowed_tools,
                        capacity: spec.capacity,
                        leased: 0,
                        online: true,
                        last_seen: t0(),
                    })
                })
                .await;
        }

        async fn insert(&self, task: Task) -> Task {
            self.store
                .transact(|tables| tables.insert_task(task))
                .await
                .unwrap()
        }

        async fn leased(&self, agent_id: &str) -> u32 {
            self.store
                .read(|tables| tables.agent(agent_id).map(|a| a.leased))
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn claim_assigns_lease_and_takes_capacity() {
        let h = Harness::new();
        h.agent(AgentRegistration::new("agent-a", "qa", 2)).await;
        h.insert(task("BUG-1", "qa")).await;

        let task = h
            .scheduler()
            .claim_next("agent-a")
            .await
            .unwrap()
            .into_task()
            .unwrap();

        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.agent_id.as_deref(), Some("agent-a"));
        assert_eq!(task.lease_expiry_ts, Some(t0() + TimeDelta::seconds(10)));
        assert_eq!(h.leased("agent-a").await, 1);
        assert!(matches!(
            h.events.events().as_slice(),
            [DomainEvent::TaskClaimed { .. }]
        ));
    }

    #[tokio::test]
    async fn exhausted_agent_is_refused_before_the_queue_is_read() {
        let h = Harness::new();
        h.agent(AgentRegistration::new("agent-a", "qa", 0)).await;
        h.insert(task("BUG-1", "qa")).await;

        let err = h.scheduler().claim_next("agent-a").await.unwrap_err();
        assert_eq!(err, BrokerError::CapacityExhausted("agent-a".into()));
    }

    #[tokio::test]
    async fn unknown_agent_is_rejected() {
        let h = Harness::new();
        let err = h.scheduler().claim_next("ghost").await.unwrap_err();
        assert_eq!(err, BrokerError::AgentNotFound("ghost".into()));
    }

    #[tokio::test]
    async fn backoff_and_foreign_roles_are_skipped() {
        let h = Harness::new();
        h.agent(AgentRegistration::new("agent-a", "qa", 5)).await;

        let mut waiting = task("RETRY-1", "qa");
        waiting.next_retry_ts = Some(t0() + TimeDelta::seconds(30));
        h.insert(waiting).await;
        h.insert(task("OPS-1", "ops")).await;

        let scheduler = h.scheduler();
        assert!(matches!(
            scheduler.claim_next("agent-a").await.unwrap(),
            ClaimOutcome::NoTask
        ));

        h.clock.advance(TimeDelta::seconds(30));
        let task = scheduler.claim_next("agent-a").await.unwrap().into_task().unwrap();
        assert_eq!(task.task_code, "RETRY-1");
        assert_eq!(task.next_retry_ts, None);
    }

    #[tokio::test]
    async fn required_tools_must_be_covered() {
        let h = Harness::new();
        h.agent(AgentRegistration::new("plain", "qa", 1)).await;
        h.agent(AgentRegistration::new("tooled", "qa", 1).with_tools(["docker"]))
            .await;
        let mut t = task("BUILD-1", "qa");
        t.required_tools = ["docker".to_string()].into();
        h.insert(t).await;

        let scheduler = h.scheduler();
        assert!(scheduler.claim_next("plain").await.unwrap().task().is_none());
        assert!(scheduler.claim_next("tooled").await.unwrap().task().is_some());
    }

    #[tokio::test]
    async fn pinned_task_waits_for_its_agent() {
        let h = Harness::new();
        h.agent(AgentRegistration::new("agent-a", "qa", 1)).await;
        h.agent(AgentRegistration::new("agent-b", "qa", 1)).await;
        let mut t = task("PIN-1", "qa");
        t.pinned_agent = Some("agent-b".into());
        t.agent_id = Some("agent-b".into());
        h.insert(t).await;

        let scheduler = h.scheduler();
        assert!(scheduler.claim_next("agent-a").await.unwrap().task().is_none());
        let claimed = scheduler.claim_next("agent-b").await.unwrap().into_task().unwrap();
        assert_eq!(claimed.task_code, "PIN-1");
    }

    #[tokio::test]
    async fn offline_agent_gets_nothing() {
        let h = Harness::new();
        h.agent(AgentRegistration::new("agent-a", "qa", 1)).await;
        h.store
            .transact(|tables| tables.agent_mut("agent-a").unwrap().online = false)
            .await;
        h.insert(task("BUG-1", "qa")).await;

        assert!(h.scheduler().claim_next("agent-a").await.unwrap().task().is_none());
        assert_eq!(h.leased("agent-a").await, 0);
    }

    #[tokio::test]
    async fn dependency_gate_holds_tasks_until_dependencies_are_done() {
        let h = Harness::new();
        h.agent(AgentRegistration::new("agent-a", "qa", 2)).await;
        let build = h.insert(task("BUILD-1", "qa")).await;
        let mut deploy = task("DEPLOY-1", "qa");
        deploy.priority = 10;
        deploy.dependencies = vec!["BUILD-1".into()];
        h.insert(deploy).await;

        let scheduler = h.scheduler().with_dependency_gate(true);
        let first = scheduler.claim_next("agent-a").await.unwrap().into_task().unwrap();
        assert_eq!(first.task_code, "BUILD-1");
        assert!(scheduler.claim_next("agent-a").await.unwrap().task().is_none());

        let now = h.clock.now();
        h.store
            .transact(|tables| {
                tables
                    .transition(
                        build.id,
                        TaskStatus::Running,
                        TaskStatus::Done,
                        Default::default(),
                        now,
                    )
                    .unwrap()
            })
            .await;
        let second = scheduler.claim_next("agent-a").await.unwrap().into_task().unwrap();
        assert_eq!(second.task_code, "DEPLOY-1");
    }
}
