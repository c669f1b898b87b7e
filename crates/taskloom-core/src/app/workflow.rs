//! Workflow consistency: aggregate status counts, and a recovery pass that
//! repairs only what is provably safe to repair.
//!
//! Expired leases are reclaimed exactly like the periodic sweep does. Other
//! findings (a DONE task whose dependency is not DONE, a RUNNING task held by
//! an agent that no longer exists, a PENDING task pinned to such an agent)
//! are reported and left as they are.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::lease::{LeaseManager, TaskDelta};
use crate::domain::{BrokerError, TaskId, TaskStatus};
use crate::store::{MemoryStore, Tables};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    pub dlq: usize,
    pub cancelled: usize,
}

impl TaskCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.done + self.failed + self.dlq + self.cancelled
    }

    fn count(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Done => self.done += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Dlq => self.dlq += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// A detection-only finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFlag {
    pub task_id: TaskId,
    pub task_code: String,
    pub status: TaskStatus,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub recovered_tasks: Vec<TaskDelta>,
    pub inconsistent_tasks: Vec<TaskFlag>,
}

pub struct WorkflowChecker {
    store: Arc<MemoryStore>,
    leases: Arc<LeaseManager>,
}

impl WorkflowChecker {
    pub fn new(store: Arc<MemoryStore>, leases: Arc<LeaseManager>) -> Self {
        Self { store, leases }
    }

    pub async fn status(&self) -> TaskCounts {
        self.store
            .read(|tables| {
                let mut counts = TaskCounts::default();
                for task in tables.tasks() {
                    counts.count(task.status);
                }
                counts
            })
            .await
    }

    pub async fn recover(&self) -> Result<RecoveryReport, BrokerError> {
        let recovered_tasks = self.leases.sweep().await?;
        let inconsistent_tasks = self.store.read(find_inconsistencies).await;

        for flag in &inconsistent_tasks {
            warn!(
                task_id = %flag.task_id,
                task_code = %flag.task_code,
                reason = %flag.reason,
                "inconsistent task"
            );
        }
        info!(
            recovered = recovered_tasks.len(),
            inconsistent = inconsistent_tasks.len(),
            "workflow recovery finished"
        );
        Ok(RecoveryReport {
            recovered_tasks,
            inconsistent_tasks,
        })
    }
}

fn find_inconsistencies(tables: &Tables) -> Vec<TaskFlag> {
    let mut tasks: Vec<_> = tables.tasks().collect();
    tasks.sort_by_key(|task| task.seq);

    let mut flags = Vec::new();
    for task in tasks {
        let mut flag = |reason: String| {
            flags.push(TaskFlag {
                task_id: task.id,
                task_code: task.task_code.clone(),
                status: task.status,
                reason,
            })
        };
        match task.status {
            TaskStatus::Done => {
                for code in &task.dependencies {
                    match tables.task_by_code(code) {
                        None => flag(format!("dependency {code} does not exist")),
                        Some(dep) if dep.status != TaskStatus::Done => {
                            flag(format!("dependency {code} is {}", dep.status))
                        }
                        Some(_) => {}
                    }
                }
            }
            TaskStatus::Running => {
                if let Some(agent_id) = task.agent_id.as_deref() {
                    if tables.agent(agent_id).is_err() {
                        flag(format!("assigned agent {agent_id} is not registered"));
                    }
                }
            }
            TaskStatus::Pending => {
                if let Some(agent_id) = task.pinned_agent.as_deref() {
                    if tables.agent(agent_id).is_err() {
                        flag(format!("pinned agent {agent_id} is not registered"));
                    }
                }
            }
            _ => {}
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::domain::task::fixtures::{t0, task};
    use crate::domain::{Agent, ReasonCode};
    use crate::ports::{FixedClock, MemoryEventSink};

    fn checker() -> (Arc<MemoryStore>, Arc<FixedClock>, WorkflowChecker) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(t0()));
        let leases = Arc::new(LeaseManager::new(
            store.clone(),
            clock.clone(),
            Arc::new(MemoryEventSink::new()),
        ));
        let checker = WorkflowChecker::new(store.clone(), leases);
        (store, clock, checker)
    }

    fn agent(agent_id: &str) -> Agent {
        Agent {
            agent_id: agent_id.into(),
            name: None,
            owner_role: "qa".into(),
            capabilities: Default::default(),
            allowed_tools: Default::default(),
            capacity: 2,
            leased: 0,
            online: true,
            last_seen: t0(),
        }
    }

    #[tokio::test]
    async fn recover_reclaims_expired_leases_once() {
        let (store, clock, checker) = checker();
        store
            .transact(|tables| {
                tables.put_agent(agent("agent-a"));
                let id = tables.insert_task(task("BUG-1", "qa")).unwrap().id;
                tables.lease_capacity("agent-a").unwrap();
                tables.task_mut(id).unwrap().assign("agent-a", t0());
            })
            .await;
        clock.advance(TimeDelta::seconds(60));

        let first = checker.recover().await.unwrap();
        assert_eq!(first.recovered_tasks.len(), 1);
        assert_eq!(first.recovered_tasks[0].reason_code, ReasonCode::LeaseExpired);

        let second = checker.recover().await.unwrap();
        assert!(second.recovered_tasks.is_empty());
        assert_eq!(checker.status().await.pending, 1);
    }

    #[tokio::test]
    async fn done_task_with_unfinished_dependency_is_flagged_not_fixed() {
        let (store, _, checker) = checker();
        store
            .transact(|tables| {
                tables.insert_task(task("BUILD-1", "qa")).unwrap();
                let mut deploy = task("DEPLOY-1", "qa");
                deploy.dependencies = vec!["BUILD-1".into(), "GONE-1".into()];
                deploy.complete(None, t0());
                tables.insert_task(deploy).unwrap();
            })
            .await;

        let report = checker.recover().await.unwrap();
        let reasons: Vec<_> = report
            .inconsistent_tasks
            .iter()
            .map(|f| f.reason.as_str())
            .collect();
        assert_eq!(
            reasons,
            ["dependency BUILD-1 is PENDING", "dependency GONE-1 does not exist"]
        );
        assert!(report.inconsistent_tasks.iter().all(|f| f.task_code == "DEPLOY-1"));

        let counts = checker.status().await;
        assert_eq!(counts.done, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.total(), 2);
    }

    #[tokio::test]
    async fn running_task_of_a_removed_agent_is_flagged() {
        let (store, _, checker) = checker();
        store
            .transact(|tables| {
                tables.put_agent(agent("agent-a"));
                let id = tables.insert_task(task("BUG-1", "qa")).unwrap().id;
                tables.lease_capacity("agent-a").unwrap();
                tables.task_mut(id).unwrap().assign("agent-a", t0());
                tables.remove_agent("agent-a");
            })
            .await;

        let report = checker.recover().await.unwrap();
        assert!(report.recovered_tasks.is_empty());
        assert_eq!(report.inconsistent_tasks.len(), 1);
        assert_eq!(report.inconsistent_tasks[0].status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn pending_task_pinned_to_a_removed_agent_is_flagged() {
        let (store, _, checker) = checker();
        store
            .transact(|tables| {
                tables.put_agent(agent("agent-a"));
                let mut pinned = task("BUG-1", "qa");
                pinned.pinned_agent = Some("agent-a".into());
                pinned.agent_id = Some("agent-a".into());
                tables.insert_task(pinned).unwrap();
                tables.insert_task(task("BUG-2", "qa")).unwrap();
            })
            .await;
        assert!(checker.recover().await.unwrap().inconsistent_tasks.is_empty());

        store
            .transact(|tables| tables.remove_agent("agent-a"))
            .await;
        let report = checker.recover().await.unwrap();
        assert_eq!(report.inconsistent_tasks.len(), 1);
        let flag = &report.inconsistent_tasks[0];
        assert_eq!(flag.task_code, "BUG-1");
        assert_eq!(flag.status, TaskStatus::Pending);
        assert_eq!(flag.reason, "pinned agent agent-a is not registered");

        let counts = checker.status().await;
        assert_eq!(counts.pending, 2);
    }
}
