//! Agent directory entries and the capacity ledger.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::BrokerError;
use super::task::Task;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub name: Option<String>,
    pub owner_role: String,
    pub capabilities: BTreeSet<String>,
    pub allowed_tools: BTreeSet<String>,
    /// Total concurrent task slots.
    pub capacity: u32,
    /// Slots currently held by RUNNING tasks. Never exceeds `capacity`.
    pub leased: u32,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

impl Agent {
    pub fn available_capacity(&self) -> u32 {
        self.capacity.saturating_sub(self.leased)
    }

    pub fn has_capacity(&self) -> bool {
        self.leased < self.capacity
    }

    /// Same role, online, and every tool the task needs is covered by the
    /// agent's tools or capabilities.
    pub fn can_serve(&self, task: &Task) -> bool {
        self.covers(&task.owner_role, &task.required_tools)
    }

    /// Eligibility for a role and tool set, before a task record exists.
    pub fn covers(&self, owner_role: &str, required_tools: &BTreeSet<String>) -> bool {
        self.online
            && self.owner_role == owner_role
            && required_tools
                .iter()
                .all(|tool| self.allowed_tools.contains(tool) || self.capabilities.contains(tool))
    }

    /// Pinned tasks go only to their agent; unpinned ones to any eligible agent.
    pub fn may_claim(&self, task: &Task) -> bool {
        match task.pinned_agent.as_deref() {
            Some(pinned) => pinned == self.agent_id,
            None => self.can_serve(task),
        }
    }
}

/// Input of `agent.register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub owner_role: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub allowed_tools: BTreeSet<String>,
    pub capacity: u32,
    #[serde(default)]
    pub name: Option<String>,
}

impl AgentRegistration {
    pub fn new(agent_id: impl Into<String>, owner_role: impl Into<String>, capacity: u32) -> Self {
        Self {
            agent_id: agent_id.into(),
            owner_role: owner_role.into(),
            capabilities: BTreeSet::new(),
            allowed_tools: BTreeSet::new(),
            capacity,
            name: None,
        }
    }

    pub fn with_tools<I, T>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn validate(&self) -> Result<(), BrokerError> {
        if self.agent_id.trim().is_empty() {
            return Err(BrokerError::InvalidAgentSpec("agent_id is empty".into()));
        }
        if self.owner_role.trim().is_empty() {
            return Err(BrokerError::InvalidAgentSpec(format!(
                "agent {} has an empty owner_role",
                self.agent_id
            )));
        }
        Ok(())
    }
}

/// Partial update for `agent.update`. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub owner_role: Option<String>,
    pub capabilities: Option<BTreeSet<String>>,
    pub allowed_tools: Option<BTreeSet<String>>,
    pub capacity: Option<u32>,
    pub online: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFilter {
    pub owner_role: Option<String>,
    pub online: Option<bool>,
}

impl AgentFilter {
    pub fn matches(&self, agent: &Agent) -> bool {
        self.owner_role
            .as_deref()
            .is_none_or(|role| role == agent.owner_role)
            && self.online.is_none_or(|online| online == agent.online)
    }
}
