//! Application layer: the broker's operations, built from the store, the
//! policies and the ports.
//!
//! - **Broker**: role-checked operation surface and wiring
//! - **Scheduler**: atomic claim of the next task
//! - **LeaseManager**: heartbeats and the expiry sweep
//! - **ResultHandler**: completion, retry, dead-lettering, cancellation
//! - **DeadLetterQueue**: listing and replay
//! - **WorkflowChecker**: status counts and recovery
//! - **ReaperLoop**: periodic sweep in the background

pub mod broker;
pub mod dlq;
pub mod lease;
pub mod reaper_loop;
pub mod results;
pub mod scheduler;
pub mod workflow;

pub use self::broker::{Broker, BrokerBuilder, CreatedTask};
pub use self::dlq::DeadLetterQueue;
pub use self::lease::{LeaseManager, TaskDelta};
pub use self::reaper_loop::ReaperLoop;
pub use self::results::{ResultHandler, ResultStatus, TaskReport};
pub use self::scheduler::{ClaimOutcome, Scheduler};
pub use self::workflow::{RecoveryReport, TaskCounts, TaskFlag, WorkflowChecker};
