//! Retry policy: whether a failed task goes back to the queue or to the DLQ,
//! and how long it waits first.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::domain::Task;

/// How the delay grows with each retry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Always `retry_backoff_sec`.
    #[default]
    Fixed,
    /// `retry_backoff_sec * multiplier^(retry_count - 1)`, optionally capped.
    Exponential {
        multiplier: f64,
        #[serde(default)]
        max_delay_sec: Option<u64>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryPolicy {
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(backoff: Backoff) -> Self {
        Self { backoff }
    }

    /// Delay before retry number `retry_count` (1-indexed).
    ///
    /// With base=2s and an exponential multiplier of 2.0:
    /// - retry 1: 2s
    /// - retry 2: 4s
    /// - retry 3: 8s
    ///
    /// A multiplier that yields a negative or NaN delay retries immediately;
    /// an overflowing one saturates at `TimeDelta::MAX`.
    pub fn next_delay(&self, base_sec: u64, retry_count: u32) -> TimeDelta {
        match &self.backoff {
            Backoff::Fixed => i64::try_from(base_sec)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(TimeDelta::MAX),
            Backoff::Exponential {
                multiplier,
                max_delay_sec,
            } => {
                let exponent = i32::try_from(retry_count.saturating_sub(1)).unwrap_or(i32::MAX);
                let mut delay_secs = base_sec as f64 * multiplier.powi(exponent);
                if let Some(max) = max_delay_sec {
                    delay_secs = delay_secs.min(*max as f64);
                }
                let millis = delay_secs * 1000.0;
                if millis.is_nan() || millis <= 0.0 {
                    return TimeDelta::zero();
                }
                // float -> int casts saturate
                TimeDelta::try_milliseconds(millis as i64).unwrap_or(TimeDelta::MAX)
            }
        }
    }
}

/// Next step for a task whose attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Retry {
        retry_count: u32,
        delay: TimeDelta,
        reason: String,
    },
    DeadLetter {
        retry_count: u32,
        reason: String,
    },
}

/// Decides what happens after a failure. Pure: no state is touched.
pub trait Decider: Send + Sync {
    fn decide(&self, task: &Task) -> Decision;
}

/// Counts the failure against `max_retries`. The failure that uses up the
/// budget sends the task to the DLQ, so `max_retries = 3` means the third
/// failure dead-letters.
#[derive(Debug, Clone, Default)]
pub struct RetryDecider {
    policy: RetryPolicy,
}

impl RetryDecider {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl Decider for RetryDecider {
    fn decide(&self, task: &Task) -> Decision {
        let retry_count = task.retry_count.saturating_add(1);
        if retry_count >= task.max_retries {
            Decision::DeadLetter {
                retry_count,
                reason: format!("retries exhausted: {retry_count}/{}", task.max_retries),
            }
        } else {
            let delay = self.policy.next_delay(task.retry_backoff_sec, retry_count);
            Decision::Retry {
                retry_count,
                delay,
                reason: format!(
                    "retry {retry_count}/{} after {}s",
                    task.max_retries,
                    delay.num_seconds()
                ),
            }
        }
    }
}
