//! Broker: the operation surface.
//!
//! Every operation checks the caller's role first, so a denied call never
//! reaches validation or the store. Everything after that is delegated to the
//! component that owns the behaviour.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::dlq::DeadLetterQueue;
use super::lease::LeaseManager;
use super::reaper_loop::ReaperLoop;
use super::results::{ResultHandler, TaskReport};
use super::scheduler::{ClaimOutcome, Scheduler};
use super::workflow::{RecoveryReport, TaskCounts, WorkflowChecker};
use crate::config::BrokerConfig;
use crate::domain::{
    Agent, AgentFilter, AgentRegistration, AgentUpdate, BrokerError, DecisionRecord, DomainEvent,
    NewTask, Operation, Role, Routing, Task, TaskId, TaskSubmission,
};
use crate::policy::{RetryDecider, RetryPolicy, RoutingEngine, authorize};
use crate::ports::{Clock, EventSink, IdGenerator, SystemClock, TracingEventSink, UlidGenerator};
use crate::store::{AgentRegistry, MemoryStore, TaskFilter, TaskStore};

/// Response of `task.create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedTask {
    pub success: bool,
    pub task_id: TaskId,
    pub task_code: String,
    pub routing: Routing,
}

/// Wires the broker's components around one store.
pub struct BrokerBuilder {
    config: BrokerConfig,
    store: Option<Arc<MemoryStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    events: Option<Arc<dyn EventSink>>,
}

impl BrokerBuilder {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            ids: None,
            events: None,
        }
    }

    pub fn store(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Broker {
        let store = self.store.unwrap_or_default();
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let events = self.events.unwrap_or_else(|| Arc::new(TracingEventSink));
        let config = self.config;

        let decider = Arc::new(RetryDecider::new(RetryPolicy::new(
            config.retry.backoff.clone(),
        )));
        let leases = Arc::new(LeaseManager::new(
            store.clone(),
            clock.clone(),
            events.clone(),
        ));

        Broker {
            routing: RoutingEngine::new(config.routing.clone()),
            tasks: TaskStore::new(store.clone(), clock.clone(), ids.clone()),
            agents: AgentRegistry::new(store.clone(), clock.clone()),
            scheduler: Scheduler::new(store.clone(), clock.clone(), events.clone())
                .with_dependency_gate(config.scheduler.gate_on_dependencies),
            results: ResultHandler::new(store.clone(), clock.clone(), decider, events.clone()),
            dlq: DeadLetterQueue::new(store.clone(), clock, events.clone()),
            workflow: WorkflowChecker::new(store, leases.clone()),
            leases,
            ids,
            events,
            config,
        }
    }
}

pub struct Broker {
    config: BrokerConfig,
    ids: Arc<dyn IdGenerator>,
    events: Arc<dyn EventSink>,
    routing: RoutingEngine,
    tasks: TaskStore,
    agents: AgentRegistry,
    scheduler: Scheduler,
    leases: Arc<LeaseManager>,
    results: ResultHandler,
    dlq: DeadLetterQueue,
    workflow: WorkflowChecker,
}

impl Broker {
    /// Production wiring: system clock, ULID ids, events to the log.
    pub fn new(config: BrokerConfig) -> Self {
        BrokerBuilder::new(config).build()
    }

    pub fn builder(config: BrokerConfig) -> BrokerBuilder {
        BrokerBuilder::new(config)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Register the agents listed in the configuration. Called by the process
    /// entrypoint, not by a client, so no role check applies.
    pub async fn register_configured_agents(&self) -> Result<Vec<Agent>, BrokerError> {
        let mut registered = Vec::with_capacity(self.config.agents.len());
        for spec in self.config.agents.clone() {
            registered.push(self.agents.register(spec).await?);
        }
        Ok(registered)
    }

    /// Start the periodic lease sweep.
    pub fn spawn_reaper(&self) -> ReaperLoop {
        ReaperLoop::spawn(self.leases.clone(), self.config.sweep_interval())
    }

    // agent.*

    pub async fn register_agent(
        &self,
        role: Role,
        spec: AgentRegistration,
    ) -> Result<Agent, BrokerError> {
        authorize(role, Operation::AgentRegister)?;
        self.agents.register(spec).await
    }

    pub async fn list_agents(
        &self,
        role: Role,
        filter: &AgentFilter,
    ) -> Result<Vec<Agent>, BrokerError> {
        authorize(role, Operation::AgentList)?;
        Ok(self.agents.list(filter).await)
    }

    pub async fn get_agent(&self, role: Role, agent_id: &str) -> Result<Agent, BrokerError> {
        authorize(role, Operation::AgentGet)?;
        self.agents.get(agent_id).await
    }

    pub async fn update_agent(
        &self,
        role: Role,
        agent_id: &str,
        update: AgentUpdate,
    ) -> Result<Agent, BrokerError> {
        authorize(role, Operation::AgentUpdate)?;
        self.agents.update(agent_id, update).await
    }

    pub async fn deregister_agent(&self, role: Role, agent_id: &str) -> Result<(), BrokerError> {
        authorize(role, Operation::AgentDeregister)?;
        self.agents.deregister(agent_id).await
    }

    // task.*

    /// Validate, route and store a new task as PENDING.
    pub async fn create_task(
        &self,
        role: Role,
        submission: TaskSubmission,
    ) -> Result<CreatedTask, BrokerError> {
        authorize(role, Operation::TaskCreate)?;
        let new = submission.validate(&self.config.template, self.config.task_defaults())?;
        self.check_agent_match(&new).await?;

        let routing = self.routing.route(&new, self.ids.trace_id());
        info!(
            task_code = %new.task_code,
            worker_type = %routing.worker_type,
            rule = ?routing.rule,
            trace_id = %routing.trace_id,
            decision = %routing.decision,
            "task routed"
        );
        let task = self.tasks.create(new, routing).await?;

        self.events
            .emit(DomainEvent::TaskCreated {
                task_id: task.id,
                task_code: task.task_code.clone(),
                owner_role: task.owner_role.clone(),
                worker_type: task.routing.worker_type.clone(),
            })
            .await;
        Ok(CreatedTask {
            success: true,
            task_id: task.id,
            task_code: task.task_code,
            routing: task.routing,
        })
    }

    /// A pinned agent must exist. With eager matching on, an unpinned task
    /// needs at least one online agent that could serve it.
    async fn check_agent_match(&self, new: &NewTask) -> Result<(), BrokerError> {
        if let Some(pinned) = new.pinned_agent.as_deref() {
            self.agents.get(pinned).await?;
            return Ok(());
        }
        if !self.config.scheduler.eager_agent_match {
            return Ok(());
        }
        let online = AgentFilter {
            online: Some(true),
            ..AgentFilter::default()
        };
        let matched = self
            .agents
            .list(&online)
            .await
            .iter()
            .any(|agent| agent.covers(&new.owner_role, &new.required_tools));
        if matched {
            Ok(())
        } else {
            Err(BrokerError::AgentMatchFailed(new.owner_role.clone()))
        }
    }

    pub async fn next_task(&self, role: Role, agent_id: &str) -> Result<ClaimOutcome, BrokerError> {
        authorize(role, Operation::TaskNext)?;
        self.scheduler.claim_next(agent_id).await
    }

    pub async fn heartbeat(
        &self,
        role: Role,
        id_or_code: &str,
    ) -> Result<DateTime<Utc>, BrokerError> {
        authorize(role, Operation::TaskHeartbeat)?;
        self.leases.heartbeat(id_or_code).await
    }

    pub async fn submit_result(
        &self,
        role: Role,
        task_code: &str,
        report: TaskReport,
    ) -> Result<Task, BrokerError> {
        authorize(role, Operation::TaskResult)?;
        self.results.submit(task_code, report).await
    }

    pub async fn nack(&self, role: Role, task_code: &str, error: &str) -> Result<Task, BrokerError> {
        authorize(role, Operation::TaskResult)?;
        self.results.nack(task_code, error).await
    }

    pub async fn task_status(&self, role: Role, id_or_code: &str) -> Result<Task, BrokerError> {
        authorize(role, Operation::TaskStatus)?;
        self.tasks.get(id_or_code).await
    }

    pub async fn cancel_task(&self, role: Role, id_or_code: &str) -> Result<Task, BrokerError> {
        authorize(role, Operation::TaskCancel)?;
        self.results.cancel(id_or_code).await
    }

    pub async fn list_tasks(&self, role: Role, filter: &TaskFilter) -> Result<Vec<Task>, BrokerError> {
        authorize(role, Operation::TaskList)?;
        Ok(self.tasks.list(filter).await)
    }

    pub async fn task_history(
        &self,
        role: Role,
        id_or_code: &str,
    ) -> Result<Vec<DecisionRecord>, BrokerError> {
        authorize(role, Operation::TaskHistory)?;
        self.tasks.decisions(id_or_code).await
    }

    // workflow.*

    pub async fn workflow_status(&self, role: Role) -> Result<TaskCounts, BrokerError> {
        authorize(role, Operation::WorkflowStatus)?;
        Ok(self.workflow.status().await)
    }

    pub async fn workflow_recover(&self, role: Role) -> Result<RecoveryReport, BrokerError> {
        authorize(role, Operation::WorkflowRecover)?;
        self.workflow.recover().await
    }

    // dlq.*

    pub async fn dlq_list(&self, role: Role) -> Result<Vec<Task>, BrokerError> {
        authorize(role, Operation::DlqList)?;
        Ok(self.dlq.list().await)
    }

    pub async fn dlq_replay(&self, role: Role, id_or_code: &str) -> Result<Task, BrokerError> {
        authorize(role, Operation::DlqReplay)?;
        self.dlq.replay(id_or_code).await
    }
}
