//! What a runner reports while working and when it is done.

use serde::{Deserialize, Serialize};

/// One progress report from a runner, applied in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub percent: u8,
    pub status: String,
    pub log: Option<String>,
}

impl ProgressEvent {
    pub fn new(percent: u8, status: impl Into<String>) -> Self {
        Self {
            percent,
            status: status.into(),
            log: None,
        }
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.log = Some(line.into());
        self
    }
}

/// Reference to the artifact a successful run produced, relative to the
/// job's working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub filename: String,
}

impl ArtifactRef {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
        }
    }
}
