//! AgentRegistry: the agent directory plus the capacity ledger.
//!
//! `leased` is never written by clients. Registration and updates preserve
//! it, and only the scheduler (increment) and the completion, expiry and
//! dead-letter paths (decrement) move it.

use std::sync::Arc;

use tracing::{info, warn};

use super::MemoryStore;
use crate::domain::{Agent, AgentFilter, AgentRegistration, AgentUpdate, BrokerError};
use crate::ports::Clock;

pub struct AgentRegistry {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
}

impl AgentRegistry {
    pub fn new(store: Arc<MemoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Idempotent upsert by `agent_id`. A re-registration keeps the current
    /// lease count and brings the agent back online. A fresh row counts the
    /// RUNNING tasks still assigned to that id, so an agent that was
    /// deregistered mid-lease comes back holding those slots.
    pub async fn register(&self, spec: AgentRegistration) -> Result<Agent, BrokerError> {
        spec.validate()?;
        let now = self.clock.now();
        let agent = self
            .store
            .transact(|tables| {
                let leased = match tables.agent(&spec.agent_id) {
                    Ok(existing) => existing.leased,
                    Err(_) => tables.running_on(&spec.agent_id),
                };
                if spec.capacity < leased {
                    return Err(BrokerError::InvalidAgentSpec(format!(
                        "capacity {} is below the {leased} slots agent {} holds",
                        spec.capacity, spec.agent_id
                    )));
                }
                let agent = Agent {
                    agent_id: spec.agent_id,
                    name: spec.name,
                    owner_role: spec.owner_role,
                    capabilities: spec.capabilities,
                    allowed_tools: spec.allowed_tools,
                    capacity: spec.capacity,
                    leased,
                    online: true,
                    last_seen: now,
                };
                tables.put_agent(agent.clone());
                Ok(agent)
            })
            .await?;
        info!(
            agent_id = %agent.agent_id,
            owner_role = %agent.owner_role,
            capacity = agent.capacity,
            "agent registered"
        );
        Ok(agent)
    }

    pub async fn update(&self, agent_id: &str, update: AgentUpdate) -> Result<Agent, BrokerError> {
        let now = self.clock.now();
        self.store
            .transact(|tables| {
                let agent = tables.agent_mut(agent_id)?;
                if let Some(capacity) = update.capacity {
                    if capacity < agent.leased {
                        return Err(BrokerError::InvalidAgentSpec(format!(
                            "capacity {capacity} is below the {} slots agent {agent_id} holds",
                            agent.leased
                        )));
                    }
                }
                if let Some(role) = &update.owner_role {
                    if role.trim().is_empty() {
                        return Err(BrokerError::InvalidAgentSpec(format!(
                            "agent {agent_id} has an empty owner_role"
                        )));
                    }
                }

                if let Some(name) = update.name {
                    agent.name = Some(name);
                }
                if let Some(role) = update.owner_role {
                    agent.owner_role = role;
                }
                if let Some(capabilities) = update.capabilities {
                    agent.capabilities = capabilities;
                }
                if let Some(tools) = update.allowed_tools {
                    agent.allowed_tools = tools;
                }
                if let Some(capacity) = update.capacity {
                    agent.capacity = capacity;
                }
                if let Some(online) = update.online {
                    agent.online = online;
                }
                agent.last_seen = now;
                Ok(agent.clone())
            })
            .await
    }

    /// Remove the agent. Tasks it is still running are not touched here;
    /// their leases lapse and the sweep returns them to the queue.
    pub async fn deregister(&self, agent_id: &str) -> Result<(), BrokerError> {
        let removed = self
            .store
            .transact(|tables| tables.remove_agent(agent_id))
            .await
            .ok_or_else(|| BrokerError::AgentNotFound(agent_id.to_string()))?;
        if removed.leased > 0 {
            warn!(
                agent_id,
                leased = removed.leased,
                "agent deregistered while holding leases"
            );
        } else {
            info!(agent_id, "agent deregistered");
        }
        Ok(())
    }

    pub async fn get(&self, agent_id: &str) -> Result<Agent, BrokerError> {
        self.store
            .read(|tables| tables.agent(agent_id).cloned())
            .await
    }

    pub async fn list(&self, filter: &AgentFilter) -> Vec<Agent> {
        self.store
            .read(|tables| {
                tables
                    .agents()
                    .filter(|agent| filter.matches(agent))
                    .cloned()
                    .collect()
            })
            .await
    }

    /// Atomically take one slot; returns the capacity left.
    pub async fn lease_capacity(&self, agent_id: &str) -> Result<u32, BrokerError> {
        self.store
            .transact(|tables| tables.lease_capacity(agent_id))
            .await
    }

    /// Atomically give one slot back. Releasing an idle agent is a no-op.
    pub async fn release_capacity(&self, agent_id: &str) -> Result<(), BrokerError> {
        self.store
            .transact(|tables| {
                tables.agent(agent_id)?;
                tables.release_capacity(agent_id);
                Ok(())
            })
            .await
    }
}
