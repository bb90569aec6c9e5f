//! StateStore port - ジョブレコードの正本（source of truth）
//!
//! # 実装
//! - `InMemoryStateStore`: プロセス内（単一インスタンス、揮発）
//! - `RedisStateStore`: ネットワーク KV（共有、再起動に耐える、ネイティブ TTL）
//!
//! Dispatcher / Poller / Reaper は `Arc<dyn StateStore>` だけを見る。
//! どちらのバックエンドかで分岐しない。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{JobId, JobPatch, JobRecord, MergeOutcome, StoreError};

/// Key-value store for job records.
///
/// # 設計原則
/// - 同一キーへの `merge` / `append_log` はストア側で直列化する
///   （スカラーは last-write-wins、ログは絶対に失わない）
/// - ロックは 1 操作の中で完結させる（呼び出し側は複数操作にまたがるロックを持たない）
/// - 到達不能は `StoreError::Unavailable`、レコード無しは `Ok(None)` / `NotFound`
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Create a record. The dispatcher is the only caller.
    async fn put(&self, record: JobRecord) -> Result<(), StoreError>;

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Merge a partial update into an existing record.
    ///
    /// # Errors
    /// - `StoreError::NotFound` if the record is gone (e.g. reaped mid-run).
    async fn merge(&self, id: &JobId, patch: JobPatch) -> Result<MergeOutcome, StoreError>;

    /// Append one log entry; safe against concurrent merges and appends.
    async fn append_log(&self, id: &JobId, entry: String) -> Result<(), StoreError>;

    /// Delete a record. Returns `false` when it was already absent.
    async fn delete(&self, id: &JobId) -> Result<bool, StoreError>;

    /// Ids of records created at or before `cutoff`, completed or not.
    async fn expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobId>, StoreError>;

    /// Backend liveness check.
    async fn ping(&self) -> Result<(), StoreError>;
}
