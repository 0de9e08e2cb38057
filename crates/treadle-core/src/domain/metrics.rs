//! Per-task metrics, derived once at the terminal transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token usage as reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    /// Rough count for backends that report nothing: ~4 characters per
    /// token, rounded up.
    pub fn estimate(prompt: &str, completion: &str) -> Self {
        Self {
            prompt_tokens: estimate_tokens(prompt),
            completion_tokens: estimate_tokens(completion),
        }
    }
}

fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4)
}

/// Timings in seconds, plus token counts for completed tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub queue_wait_time: f64,
    pub processing_time: f64,
    pub total_time: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,

    /// True when the token counts were estimated rather than reported.
    #[serde(default)]
    pub estimated: bool,
}

impl TaskMetrics {
    /// Timing-only metrics (failed and timed-out tasks).
    pub fn timing(
        enqueue_time: DateTime<Utc>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            queue_wait_time: seconds_between(enqueue_time, start_time),
            processing_time: seconds_between(start_time, end_time),
            total_time: seconds_between(enqueue_time, end_time),
            prompt_tokens: None,
            completion_tokens: None,
            tokens_per_second: None,
            estimated: false,
        }
    }

    /// Add token counts and derive tokens per second.
    pub fn with_usage(mut self, usage: Usage, estimated: bool) -> Self {
        let tps = if self.processing_time > 0.0 {
            f64::from(usage.completion_tokens) / self.processing_time
        } else {
            0.0
        };
        self.prompt_tokens = Some(usage.prompt_tokens);
        self.completion_tokens = Some(usage.completion_tokens);
        self.tokens_per_second = Some(tps);
        self.estimated = estimated;
        self
    }
}

/// Seconds from `from` to `to`, never negative.
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let micros = (to - from).num_microseconds().unwrap_or(i64::MAX);
    (micros.max(0) as f64) / 1_000_000.0
}
