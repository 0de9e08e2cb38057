//! Domain model: ids, inputs, task records, state machine, errors.
//!
//! Nothing here knows about queues, stores or workers; those live behind
//! the traits in `ports`.

pub mod errors;
pub mod ids;
pub mod metrics;
pub mod params;
pub mod record;
pub mod state;
pub mod view;

pub use self::errors::{
    BackendError, QueueError, RateLimitError, StatusError, StoreError, SubmitError,
    TransitionError, ValidationError,
};
pub use self::ids::{ParseTaskIdError, TaskId};
pub use self::metrics::{TaskMetrics, Usage};
pub use self::params::{GenerationParams, ParamLimits};
pub use self::record::{TaskError, TaskRecord};
pub use self::state::TaskStatus;
pub use self::view::{SubmitReceipt, TaskView};
