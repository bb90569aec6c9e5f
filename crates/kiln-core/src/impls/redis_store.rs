//! Redis storage backend for job records.
//!
//! # Key Schema
//!
//! | Key Pattern | Type | Purpose |
//! |-------------|------|---------|
//! | `{prefix}:job:{id}` | Hash | `version`, `data` (record JSON without log) |
//! | `{prefix}:log:{id}` | List | append-only log entries (`RPUSH`) |
//! | `{prefix}:idx` | Sorted Set | ids scored by `created_at` millis |
//!
//! Writes go through Lua scripts so hash, list and index move together. The
//! log lives in its own list: an append is a single `RPUSH` and can never be
//! lost to a concurrent merge of the scalar fields.
//!
//! Merges are read, apply in Rust, compare-and-swap on `version`, retried a
//! bounded number of times. Domain rules stay in `JobRecord::apply`.
//!
//! Both keys carry a native expiry of `ttl` from creation. The index is not
//! expired natively; the reaper walks it so working directories of natively
//! expired records are reclaimed too.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::Script;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{JobId, JobPatch, JobRecord, MergeOutcome, StoreError};
use crate::ports::{Clock, StateStore, SystemClock};

const MAX_CAS_ATTEMPTS: usize = 16;

/// Create: hash + optional initial log + index entry + expiry.
///
/// KEYS[1] = hash, KEYS[2] = log list, KEYS[3] = index.
/// ARGV[1] = data JSON, ARGV[2] = ttl seconds, ARGV[3] = id,
/// ARGV[4] = created_at millis, ARGV[5..] = initial log entries.
const LUA_PUT: &str = r#"
redis.call('DEL', KEYS[1], KEYS[2])
redis.call('HSET', KEYS[1], 'version', '1', 'data', ARGV[1])
redis.call('EXPIRE', KEYS[1], tonumber(ARGV[2]))
for i = 5, #ARGV do
    redis.call('RPUSH', KEYS[2], ARGV[i])
end
if #ARGV >= 5 then
    redis.call('EXPIRE', KEYS[2], tonumber(ARGV[2]))
end
redis.call('ZADD', KEYS[3], tonumber(ARGV[4]), ARGV[3])
return 1
"#;

/// Compare-and-swap on `version`. Expiry of the hash is left untouched.
///
/// KEYS[1] = hash. ARGV[1] = data JSON, ARGV[2] = expected version.
/// Returns {status, version}: 1 = written, 0 = mismatch, -1 = missing.
const LUA_PUT_IF_VERSION: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
if not current then
    return {-1, 0}
end
local actual = tonumber(current)
if actual ~= tonumber(ARGV[2]) then
    return {0, actual}
end
redis.call('HSET', KEYS[1], 'version', tostring(actual + 1), 'data', ARGV[1])
return {1, actual + 1}
"#;

/// Append one log entry; the list inherits the hash's remaining lifetime.
///
/// KEYS[1] = hash, KEYS[2] = log list. ARGV[1] = entry.
/// Returns the new list length, or -1 when the record is missing.
const LUA_APPEND_LOG: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return -1
end
local len = redis.call('RPUSH', KEYS[2], ARGV[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl > 0 then
    redis.call('PEXPIRE', KEYS[2], ttl)
end
return len
"#;

/// Delete hash, log and index entry.
///
/// KEYS[1] = hash, KEYS[2] = log list, KEYS[3] = index. ARGV[1] = id.
/// Returns 1 if the hash existed.
const LUA_DELETE: &str = r#"
local existed = redis.call('EXISTS', KEYS[1])
redis.call('DEL', KEYS[1], KEYS[2])
redis.call('ZREM', KEYS[3], ARGV[1])
return existed
"#;

/// Redis-backed [`StateStore`].
///
/// `MultiplexedConnection` is cheap to clone; every call clones it so
/// concurrent requests share one TCP connection.
#[derive(Clone)]
pub struct RedisStateStore {
    conn: MultiplexedConnection,
    key_prefix: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RedisStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStateStore")
            .field("key_prefix", &self.key_prefix)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl RedisStateStore {
    /// Connect to `url` (`redis://[:<password>@]<host>:<port>[/<db>]`).
    ///
    /// Fails fast if the connection cannot be established.
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(url).map_err(|e| StoreError::Unavailable {
            message: format!("failed to create Redis client: {e}"),
            source: Some(Box::new(e)),
        })?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Unavailable {
                message: format!("failed to connect to Redis: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self::with_connection(conn, ttl))
    }

    pub fn with_connection(conn: MultiplexedConnection, ttl: Duration) -> Self {
        Self {
            conn,
            key_prefix: "kiln".to_string(),
            ttl,
            clock: Arc::new(SystemClock),
        }
    }

    /// The clock stamps `updated_at` on merges. Log appends go straight to the
    /// list and leave `updated_at` alone.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Custom key prefix (isolation between deployments or test runs).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.key_prefix, id)
    }

    fn log_key(&self, id: &JobId) -> String {
        format!("{}:log:{}", self.key_prefix, id)
    }

    fn index_key(&self) -> String {
        format!("{}:idx", self.key_prefix)
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }

    /// Read the scalar part of a record plus its version.
    async fn load_scalar(&self, id: &JobId) -> Result<Option<(u64, JobRecord)>, StoreError> {
        let fields: HashMap<String, String> = ::redis::cmd("HGETALL")
            .arg(self.job_key(id))
            .query_async(&mut self.conn.clone())
            .await
            .map_err(map_redis_error)?;
        if fields.is_empty() {
            return Ok(None);
        }
        let version = fields
            .get("version")
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| corrupt(id, "missing or invalid version field"))?;
        let data = fields
            .get("data")
            .ok_or_else(|| corrupt(id, "missing data field"))?;
        let record = decode(id, data)?;
        Ok(Some((version, record)))
    }
}

fn map_redis_error(err: ::redis::RedisError) -> StoreError {
    StoreError::Unavailable {
        message: format!("Redis error: {err}"),
        source: Some(Box::new(err)),
    }
}

fn corrupt(id: &JobId, message: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        message: message.into(),
    }
}

fn decode(id: &JobId, data: &str) -> Result<JobRecord, StoreError> {
    serde_json::from_str(data).map_err(|e| corrupt(id, e.to_string()))
}

/// Serialize without the log; the log has its own list.
fn encode_scalar(record: &JobRecord) -> Result<String, StoreError> {
    let mut scalar = record.clone();
    scalar.log.clear();
    serde_json::to_string(&scalar).map_err(|e| corrupt(&record.id, e.to_string()))
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn put(&self, record: JobRecord) -> Result<(), StoreError> {
        let data = encode_scalar(&record)?;
        let script = Script::new(LUA_PUT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(self.job_key(&record.id))
            .key(self.log_key(&record.id))
            .key(self.index_key())
            .arg(data)
            .arg(self.ttl_secs())
            .arg(record.id.to_string())
            .arg(record.created_at.timestamp_millis());
        for entry in &record.log {
            invocation.arg(entry);
        }
        let _: i64 = invocation
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let (fields, log): (HashMap<String, String>, Vec<String>) = ::redis::pipe()
            .atomic()
            .cmd("HGETALL")
            .arg(self.job_key(id))
            .cmd("LRANGE")
            .arg(self.log_key(id))
            .arg(0)
            .arg(-1)
            .query_async(&mut self.conn.clone())
            .await
            .map_err(map_redis_error)?;

        if fields.is_empty() {
            return Ok(None);
        }
        let data = fields
            .get("data")
            .ok_or_else(|| corrupt(id, "missing data field"))?;
        let mut record = decode(id, data)?;
        record.log = log;
        Ok(Some(record))
    }

    async fn merge(&self, id: &JobId, patch: JobPatch) -> Result<MergeOutcome, StoreError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some((version, mut record)) = self.load_scalar(id).await? else {
                return Err(StoreError::NotFound(*id));
            };
            if record.apply(&patch, self.clock.now()) == MergeOutcome::Ignored {
                return Ok(MergeOutcome::Ignored);
            }

            let (status, _): (i64, i64) = Script::new(LUA_PUT_IF_VERSION)
                .key(self.job_key(id))
                .arg(encode_scalar(&record)?)
                .arg(version)
                .invoke_async(&mut self.conn.clone())
                .await
                .map_err(map_redis_error)?;

            match status {
                1 => return Ok(MergeOutcome::Applied),
                -1 => return Err(StoreError::NotFound(*id)),
                // 競合: 読み直して再適用
                _ => continue,
            }
        }
        Err(StoreError::unavailable(format!(
            "gave up merging {id} after {MAX_CAS_ATTEMPTS} conflicting writes"
        )))
    }

    async fn append_log(&self, id: &JobId, entry: String) -> Result<(), StoreError> {
        let len: i64 = Script::new(LUA_APPEND_LOG)
            .key(self.job_key(id))
            .key(self.log_key(id))
            .arg(entry)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(map_redis_error)?;
        if len < 0 {
            return Err(StoreError::NotFound(*id));
        }
        Ok(())
    }

    async fn delete(&self, id: &JobId) -> Result<bool, StoreError> {
        let existed: i64 = Script::new(LUA_DELETE)
            .key(self.job_key(id))
            .key(self.log_key(id))
            .key(self.index_key())
            .arg(id.to_string())
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(map_redis_error)?;
        Ok(existed == 1)
    }

    async fn expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobId>, StoreError> {
        let members: Vec<String> = ::redis::cmd("ZRANGEBYSCORE")
            .arg(self.index_key())
            .arg("-inf")
            // 排他的な上限: 経過時間がちょうど TTL のものは残す
            .arg(format!("({}", cutoff.timestamp_millis()))
            .query_async(&mut self.conn.clone())
            .await
            .map_err(map_redis_error)?;

        let mut ids = Vec::with_capacity(members.len());
        for member in members {
            match JobId::parse(&member) {
                Some(id) => ids.push(id),
                None => {
                    tracing::warn!(member = %member, "dropping unparsable id from index");
                    let _: i64 = ::redis::cmd("ZREM")
                        .arg(self.index_key())
                        .arg(&member)
                        .query_async(&mut self.conn.clone())
                        .await
                        .map_err(map_redis_error)?;
                }
            }
        }
        Ok(ids)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let _: String = ::redis::cmd("PING")
            .query_async(&mut self.conn.clone())
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }
}

/// Integration tests against a live Redis.
///
/// Run with `cargo test -p kiln-core --features redis-tests`; set `REDIS_URL`
/// to override `redis://127.0.0.1:6379`. Each test uses its own key prefix.
#[cfg(all(test, feature = "redis-tests"))]
mod tests {
    use super::*;
    use crate::domain::Terminal;
    use std::sync::Arc;
    use ulid::Ulid;

    async fn store() -> RedisStateStore {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        RedisStateStore::connect(&url, Duration::from_secs(60))
            .await
            .unwrap()
            .with_prefix(format!("kiln-test-{}", Ulid::new()))
    }

    fn new_id() -> JobId {
        JobId::from_ulid(Ulid::new())
    }

    #[tokio::test]
    async fn put_get_merge_delete() {
        let store = store().await;
        let id = new_id();
        store.put(JobRecord::new(id, Utc::now())).await.unwrap();

        store.append_log(&id, "hello".into()).await.unwrap();
        assert_eq!(
            store
                .merge(&id, JobPatch::progress(30, "building"))
                .await
                .unwrap(),
            MergeOutcome::Applied
        );
        store
            .merge(&id, Terminal::succeeded("out.zip").into())
            .await
            .unwrap();

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.progress, 100);
        assert_eq!(record.log, vec!["hello"]);
        assert_eq!(record.download_reference.as_deref(), Some("out.zip"));

        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let store = store().await;
        let id = new_id();
        assert!(matches!(
            store.merge(&id, JobPatch::progress(1, "x")).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.append_log(&id, "x".into()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_appends_and_merges_lose_nothing() {
        let store = Arc::new(store().await);
        let id = new_id();
        store.put(JobRecord::new(id, Utc::now())).await.unwrap();

        let mut handles = Vec::new();
        for tag in ["a", "b"] {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for i in 0..50u8 {
                    store.append_log(&id, format!("{tag}-{i}")).await.unwrap();
                    store.merge(&id, JobPatch::progress(i, tag)).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.log.len(), 100);
        assert_eq!(record.progress, 49);
    }

    #[tokio::test]
    async fn expired_walks_the_index() {
        let store = store().await;
        let now = Utc::now();
        let old = JobRecord::new(new_id(), now - chrono::Duration::hours(2));
        let fresh = JobRecord::new(new_id(), now);
        store.put(old.clone()).await.unwrap();
        store.put(fresh.clone()).await.unwrap();

        let expired = store
            .expired(now - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(expired, vec![old.id]);
    }

    #[tokio::test]
    async fn merges_are_stamped_by_the_injected_clock() {
        let at = Utc::now() - chrono::Duration::days(3);
        let clock = Arc::new(crate::ports::FixedClock::new(at));
        let store = store().await.with_clock(clock.clone());
        let id = new_id();
        store.put(JobRecord::new(id, at)).await.unwrap();

        clock.advance(chrono::Duration::seconds(5));
        store
            .merge(&id, JobPatch::progress(10, "building"))
            .await
            .unwrap();

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.updated_at, at + chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn expired_excludes_a_record_exactly_at_the_cutoff() {
        let store = store().await;
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let at_cutoff = JobRecord::new(new_id(), cutoff);
        let older = JobRecord::new(new_id(), cutoff - chrono::Duration::milliseconds(1));
        store.put(at_cutoff.clone()).await.unwrap();
        store.put(older.clone()).await.unwrap();

        assert_eq!(store.expired(cutoff).await.unwrap(), vec![older.id]);
    }
}
