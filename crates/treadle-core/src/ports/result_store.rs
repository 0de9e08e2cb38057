//! ResultStore port - the source of truth for task records.
//!
//! # Contract
//! - Every write replaces the whole record; readers never see a half update.
//! - Terminal records expire `ttl` after their terminal write. Reads after
//!   that return `None`, exactly like an id that never existed.
//! - Non-terminal records do not expire.

use async_trait::async_trait;

use crate::domain::{StoreError, TaskId, TaskRecord, TaskStatus};

/// Key-value store of task records with TTL on terminal ones.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Unconditional write. Used once per task, by the gateway, at creation.
    async fn put(&self, record: TaskRecord) -> Result<(), StoreError>;

    /// Write only if the stored record currently has status `expected`.
    ///
    /// Worker transitions go through here, which makes a second terminal
    /// write impossible even when a delivery is processed twice.
    async fn compare_and_put(
        &self,
        expected: TaskStatus,
        record: TaskRecord,
    ) -> Result<(), StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// Drop expired records. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}
