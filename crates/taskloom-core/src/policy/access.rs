//! Role-based access control.
//!
//! A static (role, operation) allow-list. Anything not listed is denied.
//! The check is a pure function evaluated before any other logic, so a
//! denied call has no side effects.

use tracing::warn;

use crate::domain::{BrokerError, Operation, Role};

const ALLOWED: &[(Role, Operation)] = &[
    (Role::Admin, Operation::AgentRegister),
    (Role::Admin, Operation::AgentList),
    (Role::Auditor, Operation::AgentList),
    (Role::Admin, Operation::AgentGet),
    (Role::Auditor, Operation::AgentGet),
    (Role::Admin, Operation::AgentUpdate),
    (Role::Admin, Operation::AgentDeregister),
    (Role::Submitter, Operation::TaskCreate),
    (Role::Admin, Operation::TaskCreate),
    (Role::Worker, Operation::TaskNext),
    (Role::Worker, Operation::TaskHeartbeat),
    (Role::Worker, Operation::TaskResult),
    (Role::Submitter, Operation::TaskStatus),
    (Role::Auditor, Operation::TaskStatus),
    (Role::Admin, Operation::TaskStatus),
    (Role::Submitter, Operation::TaskCancel),
    (Role::Admin, Operation::TaskCancel),
    (Role::Auditor, Operation::TaskList),
    (Role::Admin, Operation::TaskList),
    (Role::Auditor, Operation::TaskHistory),
    (Role::Admin, Operation::TaskHistory),
    (Role::Auditor, Operation::WorkflowStatus),
    (Role::Admin, Operation::WorkflowStatus),
    (Role::Auditor, Operation::WorkflowRecover),
    (Role::Admin, Operation::WorkflowRecover),
    (Role::Admin, Operation::DlqList),
    (Role::Admin, Operation::DlqReplay),
];

pub fn is_allowed(role: Role, operation: Operation) -> bool {
    ALLOWED.contains(&(role, operation))
}

pub fn authorize(role: Role, operation: Operation) -> Result<(), BrokerError> {
    if is_allowed(role, operation) {
        Ok(())
    } else {
        warn!(%role, %operation, reason_code = "acl_denied", "call denied");
        Err(BrokerError::AclDenied { role, operation })
    }
}
