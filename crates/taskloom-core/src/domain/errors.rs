//! Error taxonomy.
//!
//! Every failure a caller can observe carries a stable [`ReasonCode`]. The
//! same codes label decisions recorded on tasks (a reclaimed lease, a failed
//! execution), so audit output and error responses share one vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::TaskId;
use super::role::{Operation, Role};
use super::task::TaskStatus;

/// Machine-readable label explaining a decision or a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    InvalidTaskTemplate,
    DuplicateTaskCode,
    TaskNotFound,
    AgentNotFound,
    AgentMatchFailed,
    CapacityExhausted,
    AclDenied,
    LeaseExpired,
    NotRunning,
    AlreadyTerminal,
    DlqReplayInvalid,
    Conflict,
    InvalidTransition,
    InvalidAgentSpec,
    ExecutionFailed,
    Cancelled,
    Config,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::InvalidTaskTemplate => "invalid_task_template",
            ReasonCode::DuplicateTaskCode => "duplicate_task_code",
            ReasonCode::TaskNotFound => "task_not_found",
            ReasonCode::AgentNotFound => "agent_not_found",
            ReasonCode::AgentMatchFailed => "agent_match_failed",
            ReasonCode::CapacityExhausted => "capacity_exhausted",
            ReasonCode::AclDenied => "acl_denied",
            ReasonCode::LeaseExpired => "lease_expired",
            ReasonCode::NotRunning => "not_running",
            ReasonCode::AlreadyTerminal => "already_terminal",
            ReasonCode::DlqReplayInvalid => "dlq_replay_invalid",
            ReasonCode::Conflict => "conflict",
            ReasonCode::InvalidTransition => "invalid_transition",
            ReasonCode::InvalidAgentSpec => "invalid_agent_spec",
            ReasonCode::ExecutionFailed => "execution_failed",
            ReasonCode::Cancelled => "cancelled",
            ReasonCode::Config => "config",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    #[error("invalid task template: {0}")]
    InvalidTaskTemplate(String),

    #[error("duplicate task_code={0}")]
    DuplicateTaskCode(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("agent not found: agent_id={0}")]
    AgentNotFound(String),

    #[error("no eligible online agent for owner_role={0}")]
    AgentMatchFailed(String),

    #[error("agent {0} has no available capacity")]
    CapacityExhausted(String),

    #[error("role {role} may not call {operation}")]
    AclDenied { role: Role, operation: Operation },

    #[error("task {0} is not running")]
    NotRunning(TaskId),

    #[error("task {task_id} is already terminal (status={status})")]
    AlreadyTerminal { task_id: TaskId, status: TaskStatus },

    #[error("task {task_id} is not dead-lettered (status={status})")]
    DlqReplayInvalid { task_id: TaskId, status: TaskStatus },

    #[error("task {task_id} changed concurrently: expected {expected}, found {actual}")]
    Conflict {
        task_id: TaskId,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("invalid agent spec: {0}")]
    InvalidAgentSpec(String),

    #[error("config error: {0}")]
    Config(String),
}

impl BrokerError {
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            BrokerError::InvalidTaskTemplate(_) => ReasonCode::InvalidTaskTemplate,
            BrokerError::DuplicateTaskCode(_) => ReasonCode::DuplicateTaskCode,
            BrokerError::TaskNotFound(_) => ReasonCode::TaskNotFound,
            BrokerError::AgentNotFound(_) => ReasonCode::AgentNotFound,
            BrokerError::AgentMatchFailed(_) => ReasonCode::AgentMatchFailed,
            BrokerError::CapacityExhausted(_) => ReasonCode::CapacityExhausted,
            BrokerError::AclDenied { .. } => ReasonCode::AclDenied,
            BrokerError::NotRunning(_) => ReasonCode::NotRunning,
            BrokerError::AlreadyTerminal { .. } => ReasonCode::AlreadyTerminal,
            BrokerError::DlqReplayInvalid { .. } => ReasonCode::DlqReplayInvalid,
            BrokerError::Conflict { .. } => ReasonCode::Conflict,
            BrokerError::InvalidTransition { .. } => ReasonCode::InvalidTransition,
            BrokerError::InvalidAgentSpec(_) => ReasonCode::InvalidAgentSpec,
            BrokerError::Config(_) => ReasonCode::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_serialize_snake_case() {
        let json = serde_json::to_string(&ReasonCode::DlqReplayInvalid).unwrap();
        assert_eq!(json, "\"dlq_replay_invalid\"");
        assert_eq!(ReasonCode::LeaseExpired.to_string(), "lease_expired");
    }

    #[test]
    fn errors_map_to_reason_codes() {
        let denied = BrokerError::AclDenied {
            role: Role::Worker,
            operation: Operation::TaskCreate,
        };
        assert_eq!(denied.reason_code(), ReasonCode::AclDenied);
        assert_eq!(denied.to_string(), "role worker may not call task.create");

        let missing = BrokerError::TaskNotFound("BUG-1".into());
        assert_eq!(missing.reason_code(), ReasonCode::TaskNotFound);
    }
}
