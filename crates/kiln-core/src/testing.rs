//! Test doubles shared by unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{JobId, JobPatch, JobRecord, MergeOutcome, StoreError};
use crate::impls::InMemoryStateStore;
use crate::ports::StateStore;

/// In-memory store that can be switched to "unreachable" at any time.
/// `slow_put` makes record creation lag behind.
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: InMemoryStateStore,
    down: AtomicBool,
    put_delay: Duration,
}

impl FlakyStore {
    pub fn down() -> Self {
        let store = Self::default();
        store.set_down(true);
        store
    }

    pub fn slow_put(delay: Duration) -> Self {
        Self {
            put_delay: delay,
            ..Self::default()
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::unavailable("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn put(&self, record: JobRecord) -> Result<(), StoreError> {
        if !self.put_delay.is_zero() {
            tokio::time::sleep(self.put_delay).await;
        }
        self.check()?;
        self.inner.put(record).await
    }

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        self.check()?;
        self.inner.get(id).await
    }

    async fn merge(&self, id: &JobId, patch: JobPatch) -> Result<MergeOutcome, StoreError> {
        self.check()?;
        self.inner.merge(id, patch).await
    }

    async fn append_log(&self, id: &JobId, entry: String) -> Result<(), StoreError> {
        self.check()?;
        self.inner.append_log(id, entry).await
    }

    async fn delete(&self, id: &JobId) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete(id).await
    }

    async fn expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobId>, StoreError> {
        self.check()?;
        self.inner.expired(cutoff).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}
