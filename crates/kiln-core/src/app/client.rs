//! PollingClient - ポーリングする側の推奨挙動
//!
//! # 振る舞い
//! - 完了するまで一定間隔でポーリング
//! - ストア到達不能・通信エラーは指数バックオフで再試行（連続 `max_failures` 回まで）
//! - NotFound になったら、別経路で保存しておいた ID で 1 回だけ復旧を試みる
//! - ログはクライアント側で蓄積する（連続する重複は捨てる）
//!
//! サーバ側は最新のログ 1 行しか返さないので、間隔が粗いと途中の行は見えない。

use std::time::Duration;

use async_trait::async_trait;

use crate::app::retry::RetryPolicy;
use crate::app::status::{PollOutcome, StatusPoller};
use crate::domain::{JobStatusView, KilnError};

/// Anything a client can poll: the in-process poller, or an HTTP client.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self, job_id: &str) -> Result<PollOutcome, KilnError>;
}

#[async_trait]
impl StatusSource for StatusPoller {
    async fn fetch(&self, job_id: &str) -> Result<PollOutcome, KilnError> {
        self.poll(job_id).await
    }
}

/// Independently cached copy of a job id (browser storage, a file, ...).
pub trait IdCache: Send + Sync {
    fn recover(&self) -> Option<String>;
}

/// A cache holding nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl IdCache for NoCache {
    fn recover(&self) -> Option<String> {
        None
    }
}

/// A cache holding one known id.
#[derive(Debug, Clone)]
pub struct CachedId(pub String);

impl IdCache for CachedId {
    fn recover(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Too many consecutive failed polls.
    #[error("lost connection to the orchestrator after {attempts} attempts: {last_error}")]
    Connectivity { attempts: u32, last_error: String },

    /// The job is gone and the cached copy did not help.
    #[error("job {job_id} was not found")]
    Lost { job_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    /// Consecutive failed polls tolerated before giving up.
    pub max_failures: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            retry: RetryPolicy::new(Duration::from_secs(1), 2.0),
            max_failures: 5,
        }
    }
}

/// Everything a client saw while following one job.
#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    /// The id that finally answered (differs from the original after recovery).
    pub job_id: String,
    pub recovered: bool,
    pub final_status: JobStatusView,
    /// Accumulated log, consecutive repeats collapsed.
    pub log: Vec<String>,
    /// Progress as observed on each successful poll.
    pub progress: Vec<u8>,
}

pub struct PollingClient<S> {
    source: S,
    settings: ClientSettings,
}

impl<S: StatusSource> PollingClient<S> {
    pub fn new(source: S, settings: ClientSettings) -> Self {
        Self { source, settings }
    }

    /// Poll `job_id` until it completes.
    pub async fn follow(&self, job_id: &str, cache: &dyn IdCache) -> Result<PollReport, ClientError> {
        let mut current = job_id.to_string();
        let mut recovered = false;
        let mut failures = 0u32;
        let mut log: Vec<String> = Vec::new();
        let mut progress = Vec::new();

        loop {
            match self.source.fetch(&current).await {
                Ok(PollOutcome::Found(view)) => {
                    failures = 0;
                    progress.push(view.progress);
                    if let Some(line) = &view.latest_log_entry
                        && log.last() != Some(line)
                    {
                        log.push(line.clone());
                    }
                    if view.completed {
                        return Ok(PollReport {
                            job_id: current,
                            recovered,
                            final_status: view,
                            log,
                            progress,
                        });
                    }
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
                Ok(PollOutcome::NotFound) => {
                    if !recovered && let Some(cached) = cache.recover() {
                        tracing::info!(lost = %current, cached = %cached, "job not found; trying cached id");
                        current = cached;
                        recovered = true;
                        continue;
                    }
                    return Err(ClientError::Lost { job_id: current });
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.settings.max_failures {
                        return Err(ClientError::Connectivity {
                            attempts: failures,
                            last_error: e.to_string(),
                        });
                    }
                    let delay = self.settings.retry.next_delay(failures);
                    tracing::debug!(error = %e, failures, ?delay, "poll failed; backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
