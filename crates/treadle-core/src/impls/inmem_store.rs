//! In-memory result store with TTL on terminal records.
//!
//! Expiry is lazy: a read past the deadline behaves as if the record is
//! gone, and `purge_expired` reclaims the memory later.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;

use crate::domain::{StoreError, TaskId, TaskRecord, TaskStatus};
use crate::ports::{Clock, ResultStore};

#[derive(Debug, Clone)]
struct Entry {
    record: TaskRecord,
    /// Set once the record is terminal.
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process `ResultStore`. Expiry is read from `clock`.
pub struct InMemoryResultStore<C> {
    entries: RwLock<HashMap<TaskId, Entry>>,
    ttl: TimeDelta,
    clock: C,
}

impl<C: Clock> InMemoryResultStore<C> {
    pub fn new(ttl: Duration, clock: C) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            clock,
        }
    }

    fn entry_for(&self, record: TaskRecord, now: DateTime<Utc>) -> Entry {
        let expires_at = record
            .is_terminal()
            .then(|| now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC));
        Entry { record, expires_at }
    }

    /// Live (unexpired) entries, for diagnostics and tests.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl<C: Clock> ResultStore for InMemoryResultStore<C> {
    async fn put(&self, record: TaskRecord) -> Result<(), StoreError> {
        let now = self.clock.now();
        let entry = self.entry_for(record, now);
        self.entries.write().await.insert(entry.record.id, entry);
        Ok(())
    }

    async fn compare_and_put(
        &self,
        expected: TaskStatus,
        record: TaskRecord,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;

        let found = entries
            .get(&record.id)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.record.status);
        if found != Some(expected) {
            return Err(StoreError::Conflict {
                id: record.id,
                expected,
                found,
            });
        }

        let entry = self.entry_for(record, now);
        entries.insert(entry.record.id, entry);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(&id)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.record.clone()))
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GenerationParams;
    use crate::ports::ManualClock;
    use chrono::TimeZone;
    use std::sync::Arc;
    use ulid::Ulid;

    fn setup() -> (Arc<ManualClock>, InMemoryResultStore<Arc<ManualClock>>) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = InMemoryResultStore::new(Duration::from_secs(3600), clock.clone());
        (clock, store)
    }

    fn queued(clock: &ManualClock) -> TaskRecord {
        TaskRecord::new(
            TaskId::from_ulid(Ulid::new()),
            "anonymous",
            "2+2=",
            GenerationParams::default(),
            clock.now(),
        )
    }

    #[tokio::test]
    async fn unknown_id_reads_as_none() {
        let (_, store) = setup();
        let got = store.get(TaskId::from_ulid(Ulid::new())).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn non_terminal_records_never_expire() {
        let (clock, store) = setup();
        let record = queued(&clock);
        store.put(record.clone()).await.unwrap();

        clock.advance(Duration::from_secs(10 * 3600));

        assert_eq!(store.get(record.id).await.unwrap(), Some(record));
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn terminal_records_expire_after_ttl() {
        let (clock, store) = setup();
        let mut record = queued(&clock);
        store.put(record.clone()).await.unwrap();

        record.start_processing(clock.now()).unwrap();
        store
            .compare_and_put(TaskStatus::Queued, record.clone())
            .await
            .unwrap();
        record.complete(clock.now(), "4".to_string(), None).unwrap();
        store
            .compare_and_put(TaskStatus::Processing, record.clone())
            .await
            .unwrap();

        clock.advance(Duration::from_secs(3599));
        assert!(store.get(record.id).await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(store.get(record.id).await.unwrap().is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn compare_and_put_rejects_stale_status() {
        let (clock, store) = setup();
        let mut record = queued(&clock);
        store.put(record.clone()).await.unwrap();

        record.start_processing(clock.now()).unwrap();
        let err = store
            .compare_and_put(TaskStatus::Processing, record.clone())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StoreError::Conflict {
                id: record.id,
                expected: TaskStatus::Processing,
                found: Some(TaskStatus::Queued),
            }
        );
    }

    #[tokio::test]
    async fn compare_and_put_on_missing_record_conflicts() {
        let (clock, store) = setup();
        let record = queued(&clock);
        let err = store
            .compare_and_put(TaskStatus::Queued, record)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { found: None, .. }));
    }
}
