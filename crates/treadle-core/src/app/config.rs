//! Orchestrator configuration.
//!
//! Plain data with defaults; `AppBuilder::build` validates it before anything
//! is spawned.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ParamLimits;

pub const DEFAULT_TASK_TIME_LIMIT: Duration = Duration::from_secs(120);
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_STREAM_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_LEASE_WAIT: Duration = Duration::from_secs(1);
pub const DEFAULT_LEASE_GRACE: Duration = Duration::from_secs(30);
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60);

/// Largest accepted deadline, grace or tick setting.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Token bucket settings, shared by every caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained admissions per minute.
    pub per_minute: u32,
    /// Bucket capacity.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 60,
            burst: 10,
        }
    }
}

impl RateLimitConfig {
    /// Continuous refill rate of one bucket.
    pub fn refill_per_second(&self) -> f64 {
        f64::from(self.per_minute) / 60.0
    }
}

/// Which generation backend the CLI wires in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Echo {
        #[serde(default, with = "duration_millis")]
        latency: Duration,
    },
    Ollama {
        base_url: String,
        model: String,
        #[serde(with = "duration_millis")]
        request_timeout: Duration,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Echo {
            latency: Duration::ZERO,
        }
    }
}

/// Everything the orchestrator needs besides the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Hard deadline for one backend call.
    pub task_time_limit: Duration,
    /// How long terminal records stay readable.
    pub result_ttl: Duration,
    pub worker_count: usize,
    /// Server-side tick of the status stream.
    pub stream_interval: Duration,
    /// How long a worker blocks on an empty queue before re-checking shutdown.
    pub lease_wait: Duration,
    /// Extra visibility time on top of `task_time_limit` before redelivery.
    pub lease_grace: Duration,
    pub gc_interval: Duration,
    pub rate_limit: RateLimitConfig,
    pub limits: ParamLimits,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_time_limit: DEFAULT_TASK_TIME_LIMIT,
            result_ttl: DEFAULT_RESULT_TTL,
            worker_count: 1,
            stream_interval: DEFAULT_STREAM_INTERVAL,
            lease_wait: DEFAULT_LEASE_WAIT,
            lease_grace: DEFAULT_LEASE_GRACE,
            gc_interval: DEFAULT_GC_INTERVAL,
            rate_limit: RateLimitConfig::default(),
            limits: ParamLimits::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Visibility timeout for broker leases.
    pub fn visibility_timeout(&self) -> Duration {
        self.task_time_limit.saturating_add(self.lease_grace)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
