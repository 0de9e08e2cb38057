//! App - orchestration logic composed from the ports.
//!
//! # Components
//! - **SubmissionGateway**: validate, rate-limit, store, enqueue
//! - **WorkerLoop** / **WorkerGroup**: lease, run under deadline, record outcome
//! - **StatusReader**: poll and stream task state
//! - **RateLimiter**: per-caller token buckets
//! - **GcLoop**: expired-result and idle-bucket reclamation
//! - **AppBuilder**: wiring and fail-fast configuration checks

pub mod builder;
pub mod config;
pub mod gateway;
pub mod gc_loop;
pub mod rate_limit;
pub mod status;
pub mod worker_loop;

pub use self::builder::{App, AppBuilder, BuildError, RunningApp, backend_from_config};
pub use self::config::{BackendConfig, OrchestratorConfig, RateLimitConfig};
pub use self::gateway::SubmissionGateway;
pub use self::gc_loop::GcLoop;
pub use self::rate_limit::RateLimiter;
pub use self::status::{StatusReader, StatusStream};
pub use self::worker_loop::{WorkerGroup, WorkerLoop};
