//! Dispatcher - ジョブの受付（admission）
//!
//! # フロー
//! 1. 入力検証（失敗ならレコードは作らない）
//! 2. キューの空きを予約（満杯なら `QueueFull`、レコードは作らない）
//! 3. 初期レコードを書き込む
//! 4. チケットをワーカーへ渡し、ID を返す
//!
//! `submit` はジョブの実行を待たない。ID を返した時点でレコードは読める。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::app::status::QueueCounts;
use crate::domain::{JobId, JobInput, JobRecord, KilnError};
use crate::ports::{Clock, IdGenerator, StateStore};

/// A job accepted for execution, waiting in the admission queue.
#[derive(Debug)]
pub(crate) struct Ticket {
    pub id: JobId,
    pub input: JobInput,
}

/// Live counters shared by the dispatcher and the workers.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    queued: AtomicUsize,
    running: AtomicUsize,
}

impl Counters {
    pub fn enqueued(&self) {
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    /// A worker picked a ticket up.
    pub fn started(&self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
        self.running.fetch_add(1, Ordering::SeqCst);
    }

    pub fn finished(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }

    /// A ticket left the queue without running (shutdown drain).
    pub fn dropped(&self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self, capacity: usize, workers: usize) -> QueueCounts {
        QueueCounts {
            queued: self.queued.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
            capacity,
            workers,
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn StateStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    tx: mpsc::Sender<Ticket>,
    capacity: usize,
    workers: usize,
    counters: Arc<Counters>,
}

impl Dispatcher {
    pub(crate) fn new(
        store: Arc<dyn StateStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        tx: mpsc::Sender<Ticket>,
        workers: usize,
        counters: Arc<Counters>,
    ) -> Self {
        let capacity = tx.max_capacity();
        Self {
            store,
            ids,
            clock,
            tx,
            capacity,
            workers,
            counters,
        }
    }

    /// Accept a job and return its id without waiting for it to run.
    ///
    /// # Errors
    /// - `InvalidInput`: rejected, no record exists
    /// - `QueueFull`: every queue slot is taken, no record exists
    /// - `StoreUnavailable`: the initial record could not be written
    pub async fn submit(&self, input: JobInput) -> Result<JobId, KilnError> {
        input.check().map_err(KilnError::InvalidInput)?;

        // 予約してから書く: 書き込み後に満杯で弾かれる孤児レコードを作らない
        let permit = self.tx.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => KilnError::QueueFull {
                capacity: self.capacity,
            },
            TrySendError::Closed(()) => {
                KilnError::Internal("orchestrator is shutting down".to_string())
            }
        })?;

        let id = self.ids.generate_job_id();
        self.store.put(JobRecord::new(id, self.clock.now())).await?;

        self.counters.enqueued();
        permit.send(Ticket { id, input });
        tracing::info!(job_id = %id, "job submitted");
        Ok(id)
    }

    pub fn stats(&self) -> QueueCounts {
        self.counters.snapshot(self.capacity, self.workers)
    }
}
