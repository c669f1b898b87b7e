//! Strongly-typed identifiers.
//!
//! Ids are ULIDs wrapped in `Id<T>`, where `T` is a zero-sized marker that
//! keeps a `TaskId` from being passed where a `TraceId` is expected. ULIDs
//! sort by creation time and can be generated on any replica without
//! coordination.
//!
//! The rendered form is `<prefix><ulid>` (for example `task-01J...`) and is
//! also the serialized form, so ids round-trip through JSON and user input.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

/// Marker trait for id kinds. Provides the display prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when a string is not a rendered id of the expected kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a valid {prefix} id: {input}")]
pub struct ParseIdError {
    prefix: &'static str,
    input: String,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError {
            prefix: T::prefix(),
            input: s.to_string(),
        };
        let raw = s.strip_prefix(T::prefix()).ok_or_else(err)?;
        Ulid::from_string(raw).map(Self::from_ulid).map_err(|_| err())
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Trace {}

impl IdMarker for Trace {
    fn prefix() -> &'static str {
        "trace-"
    }
}

/// Identifier of a task record (system generated, immutable).
pub type TaskId = Id<Task>;

/// Correlation id attached to a routing decision.
pub type TraceId = Id<Trace>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_kind_prefix() {
        let task = TaskId::from_ulid(Ulid::new());
        let trace = TraceId::from_ulid(Ulid::new());

        assert!(task.to_string().starts_with("task-"));
        assert!(trace.to_string().starts_with("trace-"));
    }

    #[test]
    fn parses_rendered_form() {
        let task = TaskId::from_ulid(Ulid::new());
        let parsed: TaskId = task.to_string().parse().unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn rejects_other_kinds_and_garbage() {
        let trace = TraceId::from_ulid(Ulid::new());
        assert!(trace.to_string().parse::<TaskId>().is_err());
        assert!("BUG-123".parse::<TaskId>().is_err());
        assert!("task-not-a-ulid".parse::<TaskId>().is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let task = TaskId::from_ulid(Ulid::new());
        let json = serde_json::to_string(&task).unwrap();
        assert_eq!(json, format!("\"{task}\""));

        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn ulid_ids_are_sortable() {
        let id1 = TaskId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = TaskId::from_ulid(Ulid::new());

        assert!(id1 < id2);
    }
}
