//! JobRunner port - ジョブ本体（外部ビルドツールの実行など）
//!
//! Runner は「入力を受け取り、進捗イベントを順に出し、最後に成果物か失敗を返す」
//! だけの能力。ストアへの書き込みは `ProgressReporter` が引き受ける。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{
    ArtifactRef, JobId, JobInput, JobPatch, ProgressEvent, RunnerError, StoreError,
};
use crate::ports::StateStore;

/// Everything a runner gets to work with.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub id: JobId,
    pub input: JobInput,
    /// Working directory exclusively owned by this job.
    pub work_dir: PathBuf,
}

#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Execute one job. The returned artifact must live under `ctx.work_dir`.
    async fn run(
        &self,
        ctx: JobContext,
        progress: ProgressReporter,
    ) -> Result<ArtifactRef, RunnerError>;
}

/// Writes a runner's progress into the job's record.
///
/// Methods take `&mut self` and await the store write before returning, so a
/// runner cannot have two reports in flight: merges land in emission order.
/// Store failures are logged and swallowed; a runner keeps working even if
/// its record was reaped underneath it.
pub struct ProgressReporter {
    id: JobId,
    store: Arc<dyn StateStore>,
    last_percent: u8,
}

impl ProgressReporter {
    pub fn new(id: JobId, store: Arc<dyn StateStore>) -> Self {
        Self {
            id,
            store,
            last_percent: 0,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.id
    }

    /// Highest percentage reported so far.
    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }

    pub async fn report(&mut self, event: ProgressEvent) {
        let percent = event.percent.min(100).max(self.last_percent);
        self.last_percent = percent;

        let patch = JobPatch::progress(percent, event.status);
        if let Err(e) = self.store.merge(&self.id, patch).await {
            self.warn("progress merge failed", &e);
        }
        if let Some(line) = event.log {
            self.log(line).await;
        }
    }

    /// Append a log line without touching progress.
    pub async fn log(&mut self, line: impl Into<String>) {
        if let Err(e) = self.store.append_log(&self.id, line.into()).await {
            self.warn("log append failed", &e);
        }
    }

    fn warn(&self, what: &str, err: &StoreError) {
        tracing::warn!(job_id = %self.id, error = %err, "{what}");
    }
}
