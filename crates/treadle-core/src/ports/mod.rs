//! Ports - the seams between orchestration logic and infrastructure.
//!
//! Each trait hides one external concern (broker, result backend, model,
//! time, ids, telemetry). `impls` has the in-process and HTTP adapters.
//!
//! # Ground rules
//! - The result store is the source of truth for task state.
//! - The broker queue carries whole records, delivered at least once.
//! - Backends know nothing about deadlines; workers enforce them.

pub mod backend;
pub mod broker_queue;
pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod result_store;

pub use self::backend::{Generation, GenerationBackend};
pub use self::broker_queue::{BrokerQueue, Delivery, DeliveryTag, QueueDepth};
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::event_sink::{EventSink, FanoutSink, LifecycleEvent};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::result_store::ResultStore;
