//! Caller roles and the operations they may attempt.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role of the principal issuing a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Submitter,
    Worker,
    Auditor,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Submitter, Role::Worker, Role::Auditor, Role::Admin];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Submitter => "submitter",
            Role::Worker => "worker",
            Role::Auditor => "auditor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

/// Every externally reachable broker operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    AgentRegister,
    AgentList,
    AgentGet,
    AgentUpdate,
    AgentDeregister,
    TaskCreate,
    TaskNext,
    TaskHeartbeat,
    TaskResult,
    TaskStatus,
    TaskCancel,
    TaskList,
    TaskHistory,
    WorkflowStatus,
    WorkflowRecover,
    DlqList,
    DlqReplay,
}

impl Operation {
    pub const ALL: [Operation; 17] = [
        Operation::AgentRegister,
        Operation::AgentList,
        Operation::AgentGet,
        Operation::AgentUpdate,
        Operation::AgentDeregister,
        Operation::TaskCreate,
        Operation::TaskNext,
        Operation::TaskHeartbeat,
        Operation::TaskResult,
        Operation::TaskStatus,
        Operation::TaskCancel,
        Operation::TaskList,
        Operation::TaskHistory,
        Operation::WorkflowStatus,
        Operation::WorkflowRecover,
        Operation::DlqList,
        Operation::DlqReplay,
    ];

    /// Wire name, as used by the transport layer (`task.create`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::AgentRegister => "agent.register",
            Operation::AgentList => "agent.list",
            Operation::AgentGet => "agent.get",
            Operation::AgentUpdate => "agent.update",
            Operation::AgentDeregister => "agent.deregister",
            Operation::TaskCreate => "task.create",
            Operation::TaskNext => "task.next",
            Operation::TaskHeartbeat => "task.heartbeat",
            Operation::TaskResult => "task.result",
            Operation::TaskStatus => "task.status",
            Operation::TaskCancel => "task.cancel",
            Operation::TaskList => "task.list",
            Operation::TaskHistory => "task.history",
            Operation::WorkflowStatus => "workflow.status",
            Operation::WorkflowRecover => "workflow.recover",
            Operation::DlqList => "dlq.list",
            Operation::DlqReplay => "dlq.replay",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
