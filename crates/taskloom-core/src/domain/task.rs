//! Task record and its status machine.
//!
//! The record is the single source of truth for a task. Every status change
//! goes through one of the transition methods below so the field invariants
//! hold after each step:
//! - `lease_expiry_ts` is set iff status is `Running`
//! - `agent_id` is set iff status is `Running` or the task is pinned
//! - `next_retry_ts` is only set on a `Pending` task waiting out a backoff
//!
//! Transitions:
//! - Pending -> Running (claim) -> Done
//! - Running -> Pending (retry with backoff, or lease reclaimed)
//! - Running -> Dlq (retry budget exhausted) -> Pending (replay)
//! - Running -> Failed (non-retryable failure)
//! - Pending | Running -> Cancelled

use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ReasonCode;
use super::ids::{TaskId, TraceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
    Dlq,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Done,
        TaskStatus::Failed,
        TaskStatus::Dlq,
        TaskStatus::Cancelled,
    ];

    /// No transition leaves a terminal status except an explicit DLQ replay.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Dlq | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Done => "DONE",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Dlq => "DLQ",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which routing rule produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteRule {
    Area,
    OwnerRole,
    Priority,
    TaskCodePrefix,
    Default,
}

/// Outcome of routing a task: target worker type plus an audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    pub worker_type: String,
    pub rule: RouteRule,
    /// Human-readable explanation, e.g. `area ci/exchange matched ci/*`.
    pub decision: String,
    pub trace_id: TraceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_code: String,
    pub owner_role: String,
    pub instructions: String,
    pub area: Option<String>,
    pub how_to_repro: Option<String>,
    pub expected: Option<String>,
    pub evidence_requirements: Option<String>,
    pub priority: i32,
    pub status: TaskStatus,
    pub agent_id: Option<String>,
    /// Agent this task was pinned to at creation, if any.
    pub pinned_agent: Option<String>,
    pub required_tools: BTreeSet<String>,
    /// Task codes this task depends on.
    pub dependencies: Vec<String>,
    pub routing: Routing,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lease_seconds: u32,
    pub lease_expiry_ts: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retry_backoff_sec: u64,
    pub next_retry_ts: Option<DateTime<Utc>>,
    pub reason_code: Option<ReasonCode>,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    /// Insertion order; final FIFO tie-break when `created_at` collides.
    #[serde(skip)]
    pub(crate) seq: u64,
}

/// Claim ordering: fresh before retry-scheduled, then priority descending,
/// then oldest first.
pub(crate) type ClaimKey = (bool, Reverse<i32>, DateTime<Utc>, u64);

impl Task {
    /// Pending and past any retry backoff.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.next_retry_ts.is_none_or(|at| at <= now)
    }

    pub fn lease_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Running && self.lease_expiry_ts.is_some_and(|at| at < now)
    }

    pub(crate) fn claim_key(&self) -> ClaimKey {
        (
            self.next_retry_ts.is_some(),
            Reverse(self.priority),
            self.created_at,
            self.seq,
        )
    }

    fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + TimeDelta::seconds(i64::from(self.lease_seconds))
    }

    /// Drop the running assignment. Pinned tasks keep their agent.
    fn clear_assignment(&mut self) {
        self.agent_id = self.pinned_agent.clone();
        self.lease_expiry_ts = None;
    }

    pub(crate) fn assign(&mut self, agent_id: &str, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.agent_id = Some(agent_id.to_string());
        self.lease_expiry_ts = Some(self.lease_until(now));
        self.next_retry_ts = None;
        self.updated_at = now;
    }

    pub(crate) fn extend_lease(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let expiry = self.lease_until(now);
        self.lease_expiry_ts = Some(expiry);
        self.updated_at = now;
        expiry
    }

    pub(crate) fn reclaim(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Pending;
        self.clear_assignment();
        self.reason_code = Some(ReasonCode::LeaseExpired);
        self.updated_at = now;
    }

    pub(crate) fn complete(&mut self, result: Option<serde_json::Value>, now: DateTime<Utc>) {
        self.status = TaskStatus::Done;
        self.clear_assignment();
        self.result = result;
        self.reason_code = None;
        self.updated_at = now;
    }

    pub(crate) fn schedule_retry(
        &mut self,
        retry_count: u32,
        next_retry_ts: DateTime<Utc>,
        error: String,
        now: DateTime<Utc>,
    ) {
        self.status = TaskStatus::Pending;
        self.clear_assignment();
        self.retry_count = retry_count;
        self.next_retry_ts = Some(next_retry_ts);
        self.reason_code = Some(ReasonCode::ExecutionFailed);
        self.last_error = Some(error);
        self.updated_at = now;
    }

    pub(crate) fn dead_letter(&mut self, retry_count: u32, error: String, now: DateTime<Utc>) {
        self.status = TaskStatus::Dlq;
        self.clear_assignment();
        self.retry_count = retry_count;
        self.next_retry_ts = None;
        self.reason_code = Some(ReasonCode::ExecutionFailed);
        self.last_error = Some(error);
        self.updated_at = now;
    }

    pub(crate) fn fail_permanently(&mut self, error: String, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.clear_assignment();
        self.next_retry_ts = None;
        self.reason_code = Some(ReasonCode::ExecutionFailed);
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// DLQ -> Pending. `last_error` is kept for audit.
    pub(crate) fn replay(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Pending;
        self.clear_assignment();
        self.retry_count = 0;
        self.next_retry_ts = None;
        self.reason_code = None;
        self.updated_at = now;
    }

    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.clear_assignment();
        self.next_retry_ts = None;
        self.reason_code = Some(ReasonCode::Cancelled);
        self.updated_at = now;
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::TimeZone;
    use ulid::Ulid;

    use super::*;

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    pub fn task(code: &str, role: &str) -> Task {
        Task {
            id: TaskId::from_ulid(Ulid::new()),
            task_code: code.to_string(),
            owner_role: role.to_string(),
            instructions: "do the thing".to_string(),
            area: Some("ci/exchange".to_string()),
            how_to_repro: None,
            expected: None,
            evidence_requirements: None,
            priority: 0,
            status: TaskStatus::Pending,
            agent_id: None,
            pinned_agent: None,
            required_tools: BTreeSet::new(),
            dependencies: Vec::new(),
            routing: Routing {
                worker_type: "general".to_string(),
                rule: RouteRule::Default,
                decision: "default".to_string(),
                trace_id: TraceId::from_ulid(Ulid::new()),
            },
            created_at: t0(),
            updated_at: t0(),
            lease_seconds: 10,
            lease_expiry_ts: None,
            retry_count: 0,
            max_retries: 3,
            retry_backoff_sec: 30,
            next_retry_ts: None,
            reason_code: None,
            last_error: None,
            result: None,
            seq: 0,
        }
    }
}
