//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStateStore**: 単一インスタンス用（揮発）
//! - **RedisStateStore**: 共有・再起動に耐える（feature `redis`）
//! - **LocalArtifactStore**: ローカルディスク上の作業領域

pub mod local_artifacts;
pub mod memory_store;
#[cfg(feature = "redis")]
pub mod redis_store;

use std::sync::Arc;
use std::time::Duration;

pub use self::local_artifacts::LocalArtifactStore;
pub use self::memory_store::InMemoryStateStore;
#[cfg(feature = "redis")]
pub use self::redis_store::RedisStateStore;

use crate::config::StoreConfig;
use crate::domain::StoreError;
use crate::ports::StateStore;

/// Build the configured state store backend.
///
/// A connection string selects the networked backend; otherwise records live
/// in process memory. Callers only ever see `Arc<dyn StateStore>`.
pub async fn connect_state_store(
    config: &StoreConfig,
    ttl: Duration,
) -> Result<Arc<dyn StateStore>, StoreError> {
    match &config.url {
        None => {
            tracing::info!("using in-memory state store");
            Ok(Arc::new(InMemoryStateStore::new()))
        }
        #[cfg(feature = "redis")]
        Some(url) => {
            let store = RedisStateStore::connect(url, ttl)
                .await?
                .with_prefix(config.key_prefix.clone());
            tracing::info!(prefix = %config.key_prefix, "using redis state store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            let _ = ttl;
            Err(StoreError::unavailable(
                "a store URL is configured but kiln-core was built without the `redis` feature",
            ))
        }
    }
}
