//! Errors - エラー型と分類
//!
//! 層ごとにエラー型を分ける:
//! - `StoreError`: State Store バックエンドの失敗
//! - `ArtifactError`: 作業ディレクトリ / 成果物の失敗
//! - `RunnerError`: ジョブ本体の失敗（呼び出し元には返さず、レコードに記録する）
//! - `KilnError`: オーケストレータ API が同期的に返すエラー

use thiserror::Error;

use super::ids::JobId;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or failing. Transient: "status unknown", never
    /// "job does not exist".
    #[error("state store unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("job record not found: {0}")]
    NotFound(JobId),

    /// Stored bytes could not be decoded.
    #[error("corrupt job record {id}: {message}")]
    Corrupt { id: String, message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        StoreError::Unavailable {
            message: message.into(),
            source: None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invalid artifact name: {0}")]
    InvalidName(String),

    #[error("artifact io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of the unit of work itself.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{0}")]
    Failed(String),

    #[error("runner io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned synchronously by the orchestrator.
#[derive(Debug, Error)]
pub enum KilnError {
    /// Submission rejected before any record was created.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Admission queue is at capacity (backpressure).
    #[error("job queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("state store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for KilnError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { message, .. } => KilnError::StoreUnavailable(message),
            StoreError::NotFound(id) => KilnError::NotFound(id.to_string()),
            StoreError::Corrupt { id, message } => {
                KilnError::Internal(format!("corrupt job record {id}: {message}"))
            }
        }
    }
}
