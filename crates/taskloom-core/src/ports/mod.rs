//! Ports: the seams between the broker and its environment.

pub mod clock;
pub mod event_sink;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, MemoryEventSink, TracingEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
