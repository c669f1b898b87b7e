//! Pure decision functions: who may call what, where a task routes, and
//! what happens after a failure.

pub mod access;
pub mod retry;
pub mod routing;

pub use access::{authorize, is_allowed};
pub use retry::{Backoff, Decider, Decision, RetryDecider, RetryPolicy};
pub use routing::{AreaRoute, PrefixRoute, RoutingEngine, RoutingRules};
