//! Orchestrator - 外部に見せる操作の窓口
//!
//! HTTP 層などの呼び出し元は `Orchestrator` だけを持つ。
//! submit / poll / fetch_artifact / cleanup / health / spawn_reaper / shutdown。

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::dispatcher::Dispatcher;
use crate::app::reaper_loop::{Reaper, ReaperLoop, Reclaimed};
use crate::app::status::{HealthReport, PollOutcome, QueueCounts, StatusPoller};
use crate::app::worker_loop::WorkerGroup;
use crate::config::OrchestratorConfig;
use crate::domain::{JobId, JobInput, KilnError};
use crate::ports::{ArtifactHandle, ArtifactStore, StateStore};

pub struct Orchestrator {
    config: OrchestratorConfig,
    dispatcher: Dispatcher,
    poller: StatusPoller,
    reaper: Arc<Reaper>,
    store: Arc<dyn StateStore>,
    artifacts: Arc<dyn ArtifactStore>,
    workers: Mutex<Option<WorkerGroup>>,
}

impl Orchestrator {
    pub(crate) fn new(
        config: OrchestratorConfig,
        dispatcher: Dispatcher,
        poller: StatusPoller,
        reaper: Arc<Reaper>,
        store: Arc<dyn StateStore>,
        artifacts: Arc<dyn ArtifactStore>,
        workers: WorkerGroup,
    ) -> Self {
        Self {
            config,
            dispatcher,
            poller,
            reaper,
            store,
            artifacts,
            workers: Mutex::new(Some(workers)),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub async fn submit(&self, input: JobInput) -> Result<JobId, KilnError> {
        self.dispatcher.submit(input).await
    }

    pub async fn poll(&self, job_id: &str) -> Result<PollOutcome, KilnError> {
        self.poller.poll(job_id).await
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    /// Open a finished job's artifact for streaming.
    ///
    /// # Errors
    /// `NotFound` unless the job completed successfully, `filename` is the
    /// artifact it reported, and the file is still there.
    pub async fn fetch_artifact(
        &self,
        job_id: &str,
        filename: &str,
    ) -> Result<ArtifactHandle, KilnError> {
        let not_found = || KilnError::NotFound(format!("{job_id}/{filename}"));

        let id = JobId::parse(job_id).ok_or_else(not_found)?;
        let record = self.store.get(&id).await?.ok_or_else(not_found)?;
        if !(record.completed && record.success)
            || record.download_reference.as_deref() != Some(filename)
        {
            return Err(not_found());
        }

        self.artifacts
            .open(&id, filename)
            .await?
            .ok_or_else(not_found)
    }

    /// Client-requested early cleanup. Idempotent; unknown ids are a no-op.
    pub async fn cleanup(&self, job_id: &str) -> Result<Reclaimed, KilnError> {
        match JobId::parse(job_id) {
            Some(id) => self.reaper.reclaim(&id).await,
            None => Ok(Reclaimed::default()),
        }
    }

    pub fn stats(&self) -> QueueCounts {
        self.dispatcher.stats()
    }

    pub async fn health(&self) -> HealthReport {
        let store_healthy = match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "state store ping failed");
                false
            }
        };
        HealthReport {
            store_healthy,
            queue: self.stats(),
        }
    }

    /// Start the periodic reaper; it stops when `cancel` fires.
    pub fn spawn_reaper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let reaper_loop = ReaperLoop::new(Arc::clone(&self.reaper), self.config.sweep_interval);
        tokio::spawn(reaper_loop.run(cancel))
    }

    /// Stop taking tickets, wait for running jobs, fail the ones still
    /// queued. Later calls are no-ops.
    pub async fn shutdown(&self) {
        let workers = self.workers.lock().await.take();
        if let Some(workers) = workers {
            tracing::info!("orchestrator shutting down");
            workers.shutdown_and_join().await;
        }
    }
}
