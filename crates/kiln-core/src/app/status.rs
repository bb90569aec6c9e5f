//! Status - ステータス照会（Status Poller Protocol のサーバ側）
//!
//! # 設計原則
//! - 読み取り専用。ポーリングでレコードは変わらない
//! - 「レコードが無い」（`PollOutcome::NotFound`）と
//!   「ストアに届かない」（`Err(KilnError::StoreUnavailable)`）を混同しない

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{JobId, JobStatusView, KilnError};
use crate::ports::StateStore;

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Found(JobStatusView),
    /// Unknown, malformed or reaped id.
    NotFound,
}

impl PollOutcome {
    pub fn found(self) -> Option<JobStatusView> {
        match self {
            PollOutcome::Found(view) => Some(view),
            PollOutcome::NotFound => None,
        }
    }
}

#[derive(Clone)]
pub struct StatusPoller {
    store: Arc<dyn StateStore>,
}

impl StatusPoller {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Poll by the raw id a client holds. Ids that do not parse were never
    /// issued, so they are simply not found.
    pub async fn poll(&self, raw_id: &str) -> Result<PollOutcome, KilnError> {
        match JobId::parse(raw_id) {
            Some(id) => self.poll_id(&id).await,
            None => Ok(PollOutcome::NotFound),
        }
    }

    pub async fn poll_id(&self, id: &JobId) -> Result<PollOutcome, KilnError> {
        let outcome = match self.store.get(id).await? {
            Some(record) => PollOutcome::Found(record.status_view()),
            None => PollOutcome::NotFound,
        };
        Ok(outcome)
    }
}

/// Snapshot of the admission queue and worker group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Accepted jobs waiting for a worker.
    pub queued: usize,
    /// Jobs currently executing.
    pub running: usize,
    pub capacity: usize,
    pub workers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub store_healthy: bool,
    pub queue: QueueCounts,
}
