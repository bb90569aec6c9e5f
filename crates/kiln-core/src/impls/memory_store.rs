//! InMemoryStateStore - プロセス内のジョブレコード保管
//!
//! # 実装詳細
//! - `HashMap<JobId, JobRecord>` を 1 つの tokio Mutex で守る
//! - 各メソッドはロックを取って、その操作だけで手放す（await を跨がない）
//! - 期限切れは Reaper が `expired()` で年齢判定して消す

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{JobId, JobPatch, JobRecord, MergeOutcome, StoreError};
use crate::ports::{Clock, StateStore, SystemClock};

pub struct InMemoryStateStore {
    records: Mutex<HashMap<JobId, JobRecord>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// The clock stamps `updated_at` on merges.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn put(&self, record: JobRecord) -> Result<(), StoreError> {
        self.records.lock().await.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn merge(&self, id: &JobId, patch: JobPatch) -> Result<MergeOutcome, StoreError> {
        let now = self.clock.now();
        let mut records = self.records.lock().await;
        let record = records.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        Ok(record.apply(&patch, now))
    }

    async fn append_log(&self, id: &JobId, entry: String) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut records = self.records.lock().await;
        let record = records.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        record.append_log(entry, now);
        Ok(())
    }

    async fn delete(&self, id: &JobId) -> Result<bool, StoreError> {
        Ok(self.records.lock().await.remove(id).is_some())
    }

    async fn expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobId>, StoreError> {
        let records = self.records.lock().await;
        let mut ids: Vec<JobId> = records
            .values()
            .filter(|r| r.is_expired(cutoff))
            .map(|r| r.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
