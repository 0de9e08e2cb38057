//! IdGenerator port - task id allocation.
//!
//! # Implementations
//! - **UlidGenerator**: ULID from the injected clock + 80 random bits

use crate::domain::ids::TaskId;
use crate::ports::Clock;
use ulid::Ulid;

/// Allocates globally unique task ids.
///
/// # Thread Safety
/// - `Send + Sync`: the gateway is shared across submitters
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;
}

/// ULID-based generator.
///
/// The timestamp half comes from `clock`, so a frozen clock still yields
/// distinct ids (the random half differs) that sort by submission time.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        TaskId::from(ulid)
    }
}
