//! treadle-core
//!
//! Asynchronous text-generation job orchestration: submit a prompt, get a
//! task id back at once, and poll or stream the outcome while a bounded
//! pool of workers feeds one shared generation backend.
//!
//! # Modules
//! - **domain**: task record, state machine, params, metrics, errors, views
//! - **ports**: BrokerQueue, ResultStore, GenerationBackend, Clock, IdGenerator, EventSink
//! - **impls**: in-memory queue and store, echo and Ollama backends, tracing sink
//! - **app**: gateway, rate limiter, worker loop, status reader, GC, builder
//! - **observability**: counters fed by lifecycle events

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use crate::app::{App, AppBuilder, BackendConfig, BuildError, OrchestratorConfig, RunningApp};
pub use crate::domain::{
    GenerationParams, ParamLimits, StatusError, SubmitError, SubmitReceipt, TaskId, TaskRecord,
    TaskStatus, TaskView,
};
pub use crate::observability::StatsSnapshot;
