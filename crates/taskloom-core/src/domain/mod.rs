//! Domain model: ids, task and agent records, submissions, roles, errors.

pub mod agent;
pub mod decision;
pub mod errors;
pub mod events;
pub mod ids;
pub mod role;
pub mod submission;
pub mod task;

pub use agent::{Agent, AgentFilter, AgentRegistration, AgentUpdate};
pub use decision::DecisionRecord;
pub use errors::{BrokerError, ReasonCode};
pub use events::DomainEvent;
pub use ids::{TaskId, TraceId};
pub use role::{Operation, Role};
pub use submission::{NewTask, TaskDefaults, TaskSubmission, TaskTemplate, TemplateField};
pub use task::{RouteRule, Routing, Task, TaskStatus};
