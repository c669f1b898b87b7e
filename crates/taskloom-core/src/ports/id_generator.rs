//! IdGenerator port: ULID-based ids whose timestamp part comes from a Clock.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::ids::{TaskId, TraceId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn task_id(&self) -> TaskId;

    fn trace_id(&self) -> TraceId;
}

/// Generates ULIDs from the clock's timestamp plus 80 random bits, so a
/// FixedClock gives ids with a deterministic time prefix.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn task_id(&self) -> TaskId {
        TaskId::from(self.next())
    }

    fn trace_id(&self) -> TraceId {
        TraceId::from(self.next())
    }
}
