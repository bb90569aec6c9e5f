//! WorkerLoop - ジョブ実行ループ
//!
//! # フロー（チケット 1 枚ごと）
//! 1. レコードを `Running / "starting"` にする
//! 2. 作業ディレクトリを用意する
//! 3. Runner を別タスクで起動し、`job_timeout` まで待つ（超えたら abort）
//! 4. 終端状態をちょうど 1 回だけ書き込む（Unavailable はバックオフで再試行）
//!
//! Runner の panic やタスク消失も「失敗したジョブ」として記録する。
//! 呼び出し元に返るエラーは無い。

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;

use crate::app::dispatcher::{Counters, Ticket};
use crate::app::reaper_loop::Reaper;
use crate::app::retry::RetryPolicy;
use crate::domain::{
    JobId, JobInput, JobPatch, JobPhase, MergeOutcome, StoreError, Terminal, TerminalCause,
};
use crate::ports::{ArtifactStore, JobContext, JobRunner, ProgressReporter, StateStore};

/// Message recorded for tickets still queued when the worker group stops.
pub const SHUTDOWN_MESSAGE: &str = "orchestrator shut down before the job started";

/// Runs single jobs end to end. Shared by every worker.
pub(crate) struct JobExecutor {
    pub store: Arc<dyn StateStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub runner: Arc<dyn JobRunner>,
    pub reaper: Arc<Reaper>,
    pub counters: Arc<Counters>,
    pub job_timeout: Duration,
    pub retry: RetryPolicy,
}

impl JobExecutor {
    pub async fn execute(&self, worker_id: usize, ticket: Ticket) {
        let Ticket { id, input } = ticket;
        self.counters.started();

        let span = tracing::info_span!("job", job_id = %id, worker = worker_id);
        async {
            tracing::info!("job started");
            if let Some(terminal) = self.run_to_terminal(id, input).await {
                self.finish(id, terminal).await;
            }
        }
        .instrument(span)
        .await;

        self.counters.finished();
    }

    /// Record a terminal state for a ticket that never ran.
    pub async fn abandon(&self, ticket: Ticket) {
        self.counters.dropped();
        let span = tracing::info_span!("job", job_id = %ticket.id);
        self.finish(ticket.id, Terminal::fault(SHUTDOWN_MESSAGE))
            .instrument(span)
            .await;
    }

    /// `None` when the record is gone (or already terminal) before the runner
    /// started; there is nothing left to report to.
    async fn run_to_terminal(&self, id: JobId, input: JobInput) -> Option<Terminal> {
        match self
            .store
            .merge(&id, JobPatch::phase(JobPhase::Running, "starting"))
            .await
        {
            Ok(MergeOutcome::Applied) => {}
            Ok(MergeOutcome::Ignored) => {
                tracing::debug!("record already terminal; not running");
                return None;
            }
            Err(StoreError::NotFound(_)) => {
                tracing::warn!("record reaped before start; not running");
                return None;
            }
            // 書けなくても実行は続ける。終端の書き込みは再試行される
            Err(e) => tracing::warn!(error = %e, "could not mark job running"),
        }

        let work_dir = match self.artifacts.prepare(&id).await {
            Ok(dir) => dir,
            Err(e) => {
                return Some(Terminal::fault(format!(
                    "unexpected fault: could not prepare working directory: {e}"
                )));
            }
        };

        let ctx = JobContext {
            id,
            input,
            work_dir,
        };
        let reporter = ProgressReporter::new(id, Arc::clone(&self.store));
        let runner = Arc::clone(&self.runner);
        let mut handle: JoinHandle<_> =
            tokio::spawn(async move { runner.run(ctx, reporter).await }.in_current_span());

        let terminal = match tokio::time::timeout(self.job_timeout, &mut handle).await {
            Ok(Ok(Ok(artifact))) => self.verify_artifact(&id, artifact.filename).await,
            Ok(Ok(Err(e))) => Terminal::failed(e.to_string()),
            Ok(Err(join_err)) => Terminal::fault(describe_join_error(join_err)),
            Err(_elapsed) => {
                handle.abort();
                Terminal::timed_out(self.job_timeout)
            }
        };
        Some(terminal)
    }

    /// A success is only recorded for an artifact that can actually be served.
    async fn verify_artifact(&self, id: &JobId, filename: String) -> Terminal {
        match self.artifacts.open(id, &filename).await {
            Ok(Some(_)) => Terminal::succeeded(filename),
            Ok(None) => Terminal::failed(format!(
                "runner reported artifact {filename:?} but it does not exist"
            )),
            Err(e) => Terminal::failed(format!("artifact {filename:?} is not usable: {e}")),
        }
    }

    async fn finish(&self, id: JobId, terminal: Terminal) {
        if terminal.cause() != TerminalCause::Succeeded
            && let Some(message) = terminal.message()
            && let Err(e) = self.store.append_log(&id, format!("error: {message}")).await
        {
            tracing::debug!(error = %e, "could not append failure to log");
        }

        let cause = terminal.cause();
        let patch = JobPatch::from(terminal);
        let mut failures = 0;
        loop {
            match self.store.merge(&id, patch.clone()).await {
                Ok(MergeOutcome::Applied) => {
                    tracing::info!(?cause, "job finished");
                    return;
                }
                Ok(MergeOutcome::Ignored) => {
                    tracing::debug!(?cause, "record already terminal; outcome dropped");
                    return;
                }
                Err(StoreError::NotFound(_)) => {
                    // 実行中に回収された。走行中に作られたファイルも片付ける
                    tracing::warn!(?cause, "record reaped while running; outcome dropped");
                    if let Err(e) = self.reaper.reclaim(&id).await {
                        tracing::warn!(error = %e, "could not remove leftover artifacts");
                    }
                    return;
                }
                Err(e) if e.is_unavailable() => {
                    failures += 1;
                    if !self.retry.allows_retry(failures) {
                        tracing::error!(error = %e, failures, "giving up on terminal write");
                        return;
                    }
                    let delay = self.retry.next_delay(failures);
                    tracing::warn!(error = %e, failures, ?delay, "terminal write failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "terminal write failed");
                    return;
                }
            }
        }
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        format!("unexpected fault: runner panicked: {}", panic_message(err.into_panic()))
    } else {
        "unexpected fault: runner task was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Worker group handle.
/// - `request_shutdown()` で新しいチケットの取得を止める
/// - `shutdown_and_join()` で実行中のジョブを待ち、残ったチケットを失敗として記録する
pub(crate) struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    rx: Arc<Mutex<mpsc::Receiver<Ticket>>>,
    executor: Arc<JobExecutor>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing one admission queue.
    pub fn spawn(n: usize, rx: mpsc::Receiver<Ticket>, executor: Arc<JobExecutor>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let rx = Arc::new(Mutex::new(rx));

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let rx = Arc::clone(&rx);
            let executor = Arc::clone(&executor);
            let shutdown_rx = shutdown_rx.clone();

            joins.push(tokio::spawn(worker_loop(
                worker_id,
                rx,
                executor,
                shutdown_rx,
            )));
        }

        Self {
            shutdown_tx,
            joins,
            rx,
            executor,
        }
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "worker task failed");
            }
        }

        // close 後の recv は、予約済みの枠（put 待ちの submit）が送るか
        // 手放すまで None を返さない
        let mut rx = self.rx.lock().await;
        rx.close();
        let mut abandoned = 0usize;
        while let Some(ticket) = rx.recv().await {
            self.executor.abandon(ticket).await;
            abandoned += 1;
        }
        if abandoned > 0 {
            tracing::warn!(abandoned, "queued jobs failed at shutdown");
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Ticket>>>,
    executor: Arc<JobExecutor>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::debug!(worker = worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // 受信待ちは shutdown と競合させる。ロックは受信の間だけ持つ
        let ticket = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            ticket = async { rx.lock().await.recv().await } => ticket,
        };

        let Some(ticket) = ticket else {
            // 送信側が全部 drop された
            break;
        };

        executor.execute(worker_id, ticket).await;
    }
    tracing::debug!(worker = worker_id, "worker stopped");
}
