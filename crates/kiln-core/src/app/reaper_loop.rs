//! ReaperLoop - TTL 切れジョブの回収
//!
//! # フロー
//! 1. `StateStore::expired(now - ttl)` で古いレコードを列挙
//! 2. レコードを消す（ポーリングは以後 NotFound）
//! 3. 作業ディレクトリ / 成果物を消す
//!
//! 完了・未完了に関係なく年齢だけで回収する。実行中のジョブが回収された場合、
//! そのジョブのストア書き込みは NotFound になり、ワーカーは静かに諦める。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::domain::{JobId, KilnError};
use crate::ports::{ArtifactStore, Clock, StateStore};

/// What one sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub records: usize,
    pub artifacts: usize,
    /// Jobs whose reclamation failed part-way; retried next sweep.
    pub failures: usize,
}

/// What reclaiming a single job removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reclaimed {
    pub record: bool,
    pub artifacts: bool,
}

pub struct Reaper {
    store: Arc<dyn StateStore>,
    artifacts: Arc<dyn ArtifactStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn StateStore>,
        artifacts: Arc<dyn ArtifactStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            artifacts,
            clock,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// One pass over every record older than the TTL.
    ///
    /// # Errors
    /// Only when the expired set itself cannot be listed. Per-job failures
    /// are counted in the report and left for the next pass.
    pub async fn sweep(&self) -> Result<SweepReport, KilnError> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| KilnError::Internal(format!("ttl out of range: {e}")))?;
        let cutoff = self.clock.now() - ttl;

        let expired = self.store.expired(cutoff).await?;
        let mut report = SweepReport::default();
        for id in expired {
            match self.reclaim(&id).await {
                Ok(reclaimed) => {
                    report.records += usize::from(reclaimed.record);
                    report.artifacts += usize::from(reclaimed.artifacts);
                }
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "reclaim failed");
                    report.failures += 1;
                }
            }
        }
        Ok(report)
    }

    /// Remove one job's record, then its working storage. Idempotent.
    pub async fn reclaim(&self, id: &JobId) -> Result<Reclaimed, KilnError> {
        let record = self.store.delete(id).await?;
        let artifacts = self.artifacts.remove(id).await?;
        if record || artifacts {
            tracing::debug!(job_id = %id, record, artifacts, "job reclaimed");
        }
        Ok(Reclaimed { record, artifacts })
    }
}

/// Runs `Reaper::sweep` on a fixed period until cancelled.
pub struct ReaperLoop {
    reaper: Arc<Reaper>,
    period: Duration,
}

impl ReaperLoop {
    pub fn new(reaper: Arc<Reaper>, period: Duration) -> Self {
        Self { reaper, period }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            period_secs = self.period.as_secs(),
            ttl_secs = self.reaper.ttl().as_secs(),
            "reaper started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("reaper stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.reaper.sweep().await {
                        Ok(report) if report == SweepReport::default() => {}
                        Ok(report) => tracing::info!(
                            records = report.records,
                            artifacts = report.artifacts,
                            failures = report.failures,
                            "sweep complete"
                        ),
                        // 次の周期でまた試す
                        Err(e) => tracing::error!(error = %e, "sweep failed"),
                    }
                }
            }
        }
    }
}
