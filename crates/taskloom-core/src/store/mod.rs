//! Transactional storage for task and agent rows.
//!
//! All rows live in one [`Tables`] value owned by a [`MemoryStore`]. The
//! store hands out exclusive access to the tables for the duration of one
//! synchronous closure (`transact`), which is the broker's only atomicity
//! primitive: a read-predicate-then-mutate sequence inside one closure can
//! never interleave with another.
//!
//! Closures must check every precondition before their first mutation, so
//! an `Err` return leaves the tables untouched.

mod agents;
mod memory;
mod tasks;

pub use agents::AgentRegistry;
pub use memory::MemoryStore;
pub use tasks::{StatusFields, TaskFilter, TaskStore};

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::domain::{Agent, BrokerError, DecisionRecord, Task, TaskId, TaskStatus};

/// Every row the broker owns.
#[derive(Debug, Default)]
pub struct Tables {
    tasks: HashMap<TaskId, Task>,
    /// Unique index on `task_code`.
    codes: HashMap<String, TaskId>,
    agents: BTreeMap<String, Agent>,
    decisions: Vec<DecisionRecord>,
    next_seq: u64,
}

impl Tables {
    /// Resolve a rendered task id or a task code.
    pub fn resolve(&self, id_or_code: &str) -> Result<TaskId, BrokerError> {
        if let Ok(id) = id_or_code.parse::<TaskId>() {
            if self.tasks.contains_key(&id) {
                return Ok(id);
            }
        }
        self.codes
            .get(id_or_code)
            .copied()
            .ok_or_else(|| BrokerError::TaskNotFound(id_or_code.to_string()))
    }

    pub fn task(&self, id: TaskId) -> Result<&Task, BrokerError> {
        self.tasks
            .get(&id)
            .ok_or_else(|| BrokerError::TaskNotFound(id.to_string()))
    }

    pub fn task_by_code(&self, task_code: &str) -> Option<&Task> {
        self.codes.get(task_code).and_then(|id| self.tasks.get(id))
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> Result<&mut Task, BrokerError> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| BrokerError::TaskNotFound(id.to_string()))
    }

    /// Compare-and-swap guard: the task, only if it is still in `expected`.
    pub(crate) fn task_in(
        &mut self,
        id: TaskId,
        expected: TaskStatus,
    ) -> Result<&mut Task, BrokerError> {
        let task = self.task_mut(id)?;
        if task.status != expected {
            return Err(BrokerError::Conflict {
                task_id: id,
                expected,
                actual: task.status,
            });
        }
        Ok(task)
    }

    pub(crate) fn insert_task(&mut self, mut task: Task) -> Result<Task, BrokerError> {
        if self.codes.contains_key(&task.task_code) {
            return Err(BrokerError::DuplicateTaskCode(task.task_code));
        }
        task.seq = self.next_seq;
        self.next_seq += 1;
        self.codes.insert(task.task_code.clone(), task.id);
        self.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    pub fn agent(&self, agent_id: &str) -> Result<&Agent, BrokerError> {
        self.agents
            .get(agent_id)
            .ok_or_else(|| BrokerError::AgentNotFound(agent_id.to_string()))
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub(crate) fn agent_mut(&mut self, agent_id: &str) -> Result<&mut Agent, BrokerError> {
        self.agents
            .get_mut(agent_id)
            .ok_or_else(|| BrokerError::AgentNotFound(agent_id.to_string()))
    }

    pub(crate) fn put_agent(&mut self, agent: Agent) {
        self.agents.insert(agent.agent_id.clone(), agent);
    }

    /// RUNNING tasks currently assigned to `agent_id`.
    pub(crate) fn running_on(&self, agent_id: &str) -> u32 {
        let count = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running && t.agent_id.as_deref() == Some(agent_id))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    pub(crate) fn remove_agent(&mut self, agent_id: &str) -> Option<Agent> {
        self.agents.remove(agent_id)
    }

    /// `leased += 1` iff `leased < capacity`.
    pub(crate) fn lease_capacity(&mut self, agent_id: &str) -> Result<u32, BrokerError> {
        let agent = self.agent_mut(agent_id)?;
        if !agent.has_capacity() {
            return Err(BrokerError::CapacityExhausted(agent_id.to_string()));
        }
        agent.leased += 1;
        Ok(agent.available_capacity())
    }

    /// `leased = max(0, leased - 1)`. A deregistered agent has nothing to
    /// release; returns whether a slot was actually freed.
    pub(crate) fn release_capacity(&mut self, agent_id: &str) -> bool {
        match self.agents.get_mut(agent_id) {
            Some(agent) if agent.leased > 0 => {
                agent.leased -= 1;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn touch_agent(&mut self, agent_id: &str, now: DateTime<Utc>) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.last_seen = now;
        }
    }

    pub(crate) fn record_decision(&mut self, record: DecisionRecord) {
        self.decisions.push(record);
    }

    pub fn decisions_for(&self, id: TaskId) -> Vec<DecisionRecord> {
        self.decisions
            .iter()
            .filter(|d| d.task_id == id)
            .cloned()
            .collect()
    }
}
