//! taskloom-core
//!
//! A task broker: submitters create tasks, agents claim them under a
//! time-bounded lease, report results, and failed work is retried or
//! dead-lettered.
//!
//! # Modules
//! - **domain**: tasks, agents, submissions, roles, errors, events
//! - **ports**: clock, id generation, event sink
//! - **store**: transactional in-memory rows, TaskStore, AgentRegistry
//! - **policy**: access control, routing, retry
//! - **app**: scheduler, leases, results, DLQ, workflow checks, the broker
//! - **config**: TOML configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod policy;
pub mod ports;
pub mod store;

pub use app::{Broker, BrokerBuilder, ClaimOutcome, ReaperLoop, TaskReport};
pub use config::BrokerConfig;
pub use domain::{BrokerError, ReasonCode, Role, Task, TaskStatus, TaskSubmission};
