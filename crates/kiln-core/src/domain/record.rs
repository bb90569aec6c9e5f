//! Job record: the observable state of one unit of work.
//!
//! Design:
//! - Single source of truth for a job's state (the store holds these).
//! - State transitions happen via `apply` / `append_log` only; the invariants
//!   (monotonic progress, one-way completion latch, artifact iff success) are
//!   enforced here so every backend gets them for free.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;
use super::phase::JobPhase;

/// Status label written at submission time.
pub const INITIAL_STATUS: &str = "initializing";

/// Fixed message recorded when a job exceeds its execution timeout.
pub const TIMEOUT_MESSAGE: &str = "job exceeded the execution timeout";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub progress: u8,
    pub status: String,
    pub phase: JobPhase,
    pub completed: bool,
    pub success: bool,
    pub message: Option<String>,
    #[serde(default)]
    pub log: Vec<String>,
    pub download_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: JobId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            progress: 0,
            status: INITIAL_STATUS.to_string(),
            phase: JobPhase::Queued,
            completed: false,
            success: false,
            message: None,
            log: Vec::new(),
            download_reference: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge a patch into this record.
    ///
    /// Returns `Ignored` when the record is already terminal: the latch never
    /// reopens and a second terminal outcome is dropped.
    pub fn apply(&mut self, patch: &JobPatch, now: DateTime<Utc>) -> MergeOutcome {
        if self.completed {
            return MergeOutcome::Ignored;
        }

        match patch {
            JobPatch::Progress {
                percent,
                status,
                phase,
            } => {
                if let Some(percent) = percent {
                    // 後退は無視（読み手から見て単調増加）
                    self.progress = self.progress.max((*percent).min(100));
                }
                if let Some(status) = status {
                    self.status = status.clone();
                }
                if let Some(phase) = phase
                    && !phase.is_terminal()
                {
                    self.phase = *phase;
                }
            }
            JobPatch::Terminal(terminal) => {
                self.completed = true;
                self.success = terminal.cause == TerminalCause::Succeeded;
                self.progress = 100;
                self.phase = terminal.cause.phase();
                self.status = terminal.cause.phase().as_str().to_string();
                self.message = terminal.message.clone();
                self.download_reference = terminal.download_reference.clone();
            }
        }
        self.updated_at = now;
        MergeOutcome::Applied
    }

    /// Append one log entry. Allowed after completion too (late runner output).
    pub fn append_log(&mut self, entry: impl Into<String>, now: DateTime<Utc>) {
        self.log.push(entry.into());
        self.updated_at = now;
    }

    pub fn latest_log_entry(&self) -> Option<&str> {
        self.log.last().map(String::as_str)
    }

    /// Age check used by the reaper: created strictly before `cutoff`, so a
    /// record whose age equals the TTL is still kept.
    pub fn is_expired(&self, cutoff: DateTime<Utc>) -> bool {
        self.created_at < cutoff
    }

    /// Read-only projection handed to pollers.
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id,
            progress: self.progress,
            status: self.status.clone(),
            phase: self.phase,
            completed: self.completed,
            success: self.success,
            message: self.message.clone(),
            latest_log_entry: self.latest_log_entry().map(str::to_string),
            download_reference: self.download_reference.clone(),
        }
    }
}

/// Result of a merge against an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    /// The record was already terminal; nothing changed.
    Ignored,
}

/// A partial update. Never carries the log: log entries go through
/// `append_log` so concurrent appends cannot be lost to an overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPatch {
    Progress {
        percent: Option<u8>,
        status: Option<String>,
        phase: Option<JobPhase>,
    },
    Terminal(Terminal),
}

impl JobPatch {
    pub fn progress(percent: u8, status: impl Into<String>) -> Self {
        let status = status.into();
        JobPatch::Progress {
            percent: Some(percent),
            phase: Some(JobPhase::classify(&status)),
            status: Some(status),
        }
    }

    pub fn phase(phase: JobPhase, status: impl Into<String>) -> Self {
        JobPatch::Progress {
            percent: None,
            status: Some(status.into()),
            phase: Some(phase),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPatch::Terminal(_))
    }
}

impl From<Terminal> for JobPatch {
    fn from(terminal: Terminal) -> Self {
        JobPatch::Terminal(terminal)
    }
}

/// Why a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalCause {
    Succeeded,
    /// The runner reported a failure.
    RunnerFailure,
    /// The runner did not return within the execution timeout.
    RunnerTimeout,
    /// The execution context itself died (panic, aborted task, shutdown).
    Fault,
}

impl TerminalCause {
    pub fn phase(self) -> JobPhase {
        match self {
            TerminalCause::Succeeded => JobPhase::Succeeded,
            TerminalCause::RunnerTimeout => JobPhase::TimedOut,
            TerminalCause::RunnerFailure | TerminalCause::Fault => JobPhase::Failed,
        }
    }
}

/// The one terminal update a job receives.
///
/// Constructors are the only way to build one, so a success without an
/// artifact (or a failure with one) cannot be expressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminal {
    cause: TerminalCause,
    message: Option<String>,
    download_reference: Option<String>,
}

impl Terminal {
    pub fn succeeded(download_reference: impl Into<String>) -> Self {
        Self {
            cause: TerminalCause::Succeeded,
            message: None,
            download_reference: Some(download_reference.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            cause: TerminalCause::RunnerFailure,
            message: Some(message.into()),
            download_reference: None,
        }
    }

    pub fn timed_out(limit: Duration) -> Self {
        Self {
            cause: TerminalCause::RunnerTimeout,
            message: Some(format!("{TIMEOUT_MESSAGE} ({}s)", limit.as_secs())),
            download_reference: None,
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self {
            cause: TerminalCause::Fault,
            message: Some(message.into()),
            download_reference: None,
        }
    }

    pub fn cause(&self) -> TerminalCause {
        self.cause
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// What a poll returns: the record minus the full log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub progress: u8,
    pub status: String,
    pub phase: JobPhase,
    pub completed: bool,
    pub success: bool,
    pub message: Option<String>,
    pub latest_log_entry: Option<String>,
    pub download_reference: Option<String>,
}
