//! ArtifactStore port - ジョブごとの作業領域と成果物
//!
//! # 設計原則
//! - 作業ディレクトリはそのジョブの実行が排他的に所有する
//! - 回収（remove）は Reaper だけが行う。冪等
//! - ダウンロードは `open` で得たファイルをそのままストリームする

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::{ArtifactError, JobId};

/// An artifact opened for streaming.
#[derive(Debug)]
pub struct ArtifactHandle {
    pub path: PathBuf,
    pub size: u64,
    pub file: tokio::fs::File,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create (if needed) and return the job's working directory.
    async fn prepare(&self, id: &JobId) -> Result<PathBuf, ArtifactError>;

    /// Open `filename` inside the job's directory, `None` if absent.
    ///
    /// # Errors
    /// - `ArtifactError::InvalidName` for names that would escape the directory.
    async fn open(&self, id: &JobId, filename: &str)
    -> Result<Option<ArtifactHandle>, ArtifactError>;

    /// Remove everything stored for the job. `false` when nothing was there.
    async fn remove(&self, id: &JobId) -> Result<bool, ArtifactError>;
}
