//! Job identifier.
//!
//! # ULID ベースの ID
//! - **時刻でソート可能**: timestamp が先頭にあるため、生成順序でソートできる
//! - **分散生成可能**: 調整なしで生成できる
//! - 表示形式は `job-<ULID>`（HTTP のパスやログにそのまま出せる）

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

const PREFIX: &str = "job-";

/// Identifier of a submitted job. Never reused.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(Ulid);

impl JobId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Lenient parse used by the read paths: anything unparsable is `None`
    /// and is answered as "not found" rather than as a transport error.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl From<Ulid> for JobId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0)
    }
}

/// Error returned when a string is not a `job-<ULID>` identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job id: {0}")]
pub struct ParseJobIdError(String);

impl FromStr for JobId {
    type Err = ParseJobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| ParseJobIdError(s.to_string()))?;
        Ulid::from_string(body)
            .map(Self)
            .map_err(|_| ParseJobIdError(s.to_string()))
    }
}

impl TryFrom<String> for JobId {
    type Error = ParseJobIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.to_string()
    }
}
