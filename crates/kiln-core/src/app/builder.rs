//! OrchestratorBuilder - オーケストレータの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 設定は `build()` 時に検証する（0 ワーカーなどは起動させない）
//! - 必須の port（`JobRunner`）が無ければ `BuildError::MissingPort`
//! - 省略可能な port は既定の実装で埋める

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::app::dispatcher::{Counters, Dispatcher};
use crate::app::orchestrator::Orchestrator;
use crate::app::reaper_loop::Reaper;
use crate::app::retry::RetryPolicy;
use crate::app::status::StatusPoller;
use crate::app::worker_loop::{JobExecutor, WorkerGroup};
use crate::config::{ConfigError, OrchestratorConfig};
use crate::impls::{InMemoryStateStore, LocalArtifactStore};
use crate::ports::{
    ArtifactStore, Clock, IdGenerator, JobRunner, StateStore, SystemClock, UlidGenerator,
};

/// # 使用例
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new(config)
///     .store(store)
///     .runner(Arc::new(CommandRunner::new(settings)))
///     .build()?;
/// ```
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    store: Option<Arc<dyn StateStore>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    runner: Option<Arc<dyn JobRunner>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    retry: RetryPolicy,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing port: {0}. It must be provided before build().")]
    MissingPort(&'static str),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl OrchestratorBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            store: None,
            artifacts: None,
            runner: None,
            clock: None,
            ids: None,
            retry: RetryPolicy::default(),
        }
    }

    /// State store backend. Defaults to in-memory.
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to a `LocalArtifactStore` under `config.artifact_root`.
    pub fn artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Required.
    pub fn runner(mut self, runner: Arc<dyn JobRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Backoff for terminal writes while the store is unavailable.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Wire everything and start the worker group.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<Orchestrator, BuildError> {
        self.config.validate()?;
        let runner = self.runner.ok_or(BuildError::MissingPort("runner"))?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStateStore::with_clock(Arc::clone(&clock))));
        let artifacts = self.artifacts.unwrap_or_else(|| {
            Arc::new(LocalArtifactStore::new(self.config.artifact_root.clone()))
        });
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        let reaper = Arc::new(Reaper::new(
            Arc::clone(&store),
            Arc::clone(&artifacts),
            Arc::clone(&clock),
            self.config.ttl,
        ));

        let counters = Arc::new(Counters::default());
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            ids,
            clock,
            tx,
            self.config.workers,
            Arc::clone(&counters),
        );

        let executor = Arc::new(JobExecutor {
            store: Arc::clone(&store),
            artifacts: Arc::clone(&artifacts),
            runner,
            reaper: Arc::clone(&reaper),
            counters,
            job_timeout: self.config.job_timeout,
            retry: self.retry,
        });
        let workers = WorkerGroup::spawn(self.config.workers, rx, executor);

        tracing::info!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            job_timeout_secs = self.config.job_timeout.as_secs(),
            ttl_secs = self.config.ttl.as_secs(),
            "orchestrator started"
        );

        Ok(Orchestrator::new(
            self.config,
            dispatcher,
            StatusPoller::new(Arc::clone(&store)),
            reaper,
            store,
            artifacts,
            workers,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArtifactRef, RunnerError};
    use crate::ports::{JobContext, ProgressReporter};
    use async_trait::async_trait;

    struct NoopRunner;

    #[async_trait]
    impl JobRunner for NoopRunner {
        async fn run(
            &self,
            _ctx: JobContext,
            _progress: ProgressReporter,
        ) -> Result<ArtifactRef, RunnerError> {
            Err(RunnerError::Failed("noop".to_string()))
        }
    }

    #[tokio::test]
    async fn missing_runner_fails_fast() {
        let result = OrchestratorBuilder::new(OrchestratorConfig::default()).build();
        assert!(matches!(result, Err(BuildError::MissingPort("runner"))));
    }

    #[tokio::test]
    async fn invalid_config_fails_fast() {
        let config = OrchestratorConfig {
            workers: 0,
            ..OrchestratorConfig::default()
        };
        let result = OrchestratorBuilder::new(config)
            .runner(Arc::new(NoopRunner))
            .build();
        assert!(matches!(result, Err(BuildError::Config(ConfigError::Zero(_)))));
    }

    #[tokio::test]
    async fn defaults_fill_optional_ports() {
        let tmp = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig {
            artifact_root: tmp.path().to_path_buf(),
            ..OrchestratorConfig::default()
        };
        let orchestrator = OrchestratorBuilder::new(config)
            .runner(Arc::new(NoopRunner))
            .build()
            .unwrap();

        let health = orchestrator.health().await;
        assert!(health.store_healthy);
        assert_eq!(health.queue.workers, 2);
        assert_eq!(health.queue.capacity, 32);
        orchestrator.shutdown().await;
    }
}
