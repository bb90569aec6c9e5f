//! LocalArtifactStore - ローカルファイルシステム上の作業領域
//!
//! レイアウト: `{root}/{job-id}/...`。ジョブの作業ディレクトリと成果物は
//! 同じ場所に置き、Reaper がディレクトリごと消す。

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::domain::{ArtifactError, JobId};
use crate::ports::{ArtifactHandle, ArtifactStore};

#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, id: &JobId) -> PathBuf {
        self.root.join(id.to_string())
    }
}

/// Only plain relative paths made of normal components are served.
fn check_name(filename: &str) -> Result<&Path, ArtifactError> {
    let path = Path::new(filename);
    let plain = !filename.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if plain {
        Ok(path)
    } else {
        Err(ArtifactError::InvalidName(filename.to_string()))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn prepare(&self, id: &JobId) -> Result<PathBuf, ArtifactError> {
        let dir = self.job_dir(id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn open(
        &self,
        id: &JobId,
        filename: &str,
    ) -> Result<Option<ArtifactHandle>, ArtifactError> {
        let path = self.job_dir(id).join(check_name(filename)?);
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Ok(None);
        }
        Ok(Some(ArtifactHandle {
            path,
            size: metadata.len(),
            file,
        }))
    }

    async fn remove(&self, id: &JobId) -> Result<bool, ArtifactError> {
        match tokio::fs::remove_dir_all(self.job_dir(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
