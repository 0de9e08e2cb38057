//! Error taxonomy.
//!
//! Two families:
//! - admission errors (`ValidationError`, `RateLimitError`) are returned to
//!   the submitter synchronously and never become tasks;
//! - execution errors (`BackendError`, deadline expiry) are captured into
//!   the terminal `TaskRecord` and never cross the queue boundary.
//!
//! Everything else here is infrastructure plumbing (store, queue, wiring).

use std::time::Duration;

use thiserror::Error;

use super::ids::TaskId;
use super::state::TaskStatus;

/// Bad input, rejected before queueing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("prompt has {chars} characters, the limit is {max}")]
    PromptTooLong { chars: usize, max: usize },

    #[error("max_tokens={value} is outside [{min}, {max}]")]
    MaxTokensOutOfRange { value: u32, min: u32, max: u32 },

    #[error("temperature={0} is outside [0, 2]")]
    TemperatureOutOfRange(f32),

    #[error("top_p={0} is outside [0, 1]")]
    TopPOutOfRange(f32),
}

/// Admission denied by the caller's token bucket.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("rate limit exceeded for caller '{caller_id}', retry after {retry_after:?}")]
pub struct RateLimitError {
    pub caller_id: String,
    pub retry_after: Duration,
}

/// Everything `SubmissionGateway::submit` can fail with.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    #[error("submission unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for SubmitError {
    fn from(err: StoreError) -> Self {
        SubmitError::Unavailable(err.to_string())
    }
}

impl From<QueueError> for SubmitError {
    fn from(err: QueueError) -> Self {
        SubmitError::Unavailable(err.to_string())
    }
}

/// Attempted move that the task state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Result store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Compare-and-put found a different status (or no record) than expected.
    #[error("conflict on {id}: expected {expected}, found {found:?}")]
    Conflict {
        id: TaskId,
        expected: TaskStatus,
        found: Option<TaskStatus>,
    },

    #[error("result store unavailable: {0}")]
    Unavailable(String),
}

/// Broker queue failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,

    /// Ack for a delivery that is no longer leased (expired and redelivered).
    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    #[error("queue operation failed: {0}")]
    OperationFailed(String),
}

/// Failure raised by a generation backend.
///
/// `kind` is the backend's own category (e.g. `ConnectionError`), and ends
/// up as the record's `error_kind`. `detail` is operator-only diagnostics;
/// it is logged, never stored in the record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct BackendError {
    pub kind: String,
    pub message: String,
    pub detail: Option<String>,
}

impl BackendError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            detail: None,
        }
    }

    /// Attach operator-only diagnostics.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Lookup failures for the status reader.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    /// Unknown or expired id; callers cannot tell the two apart.
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("timed out waiting for {0} to finish")]
    WaitTimeout(TaskId),
}
