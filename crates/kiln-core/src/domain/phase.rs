//! Job phase: the controlled counterpart of the free-text status label.

use serde::{Deserialize, Serialize};

/// Phase of a job.
///
/// State transitions:
/// - Queued -> Running/Installing/Packaging (any order, driven by runner labels)
/// - active -> Succeeded | Failed | TimedOut (exactly once)
///
/// Runners only ever report free-text labels; [`JobPhase::classify`] maps
/// them onto the active phases. Terminal phases are set by terminal patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// Accepted and waiting for a worker.
    Queued,

    /// Installing the build tool or the job's dependencies.
    Installing,

    /// Build is running.
    Running,

    /// Collecting and archiving outputs.
    Packaging,

    Succeeded,

    Failed,

    /// Execution exceeded the configured timeout.
    TimedOut,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobPhase::Succeeded | JobPhase::Failed | JobPhase::TimedOut
        )
    }

    /// Map a free-text status label onto an active phase.
    pub fn classify(label: &str) -> JobPhase {
        let label = label.to_ascii_lowercase();
        if label.contains("install") || label.contains("dependenc") {
            JobPhase::Installing
        } else if ["packag", "zip", "archiv", "collect"]
            .iter()
            .any(|k| label.contains(k))
        {
            JobPhase::Packaging
        } else {
            JobPhase::Running
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobPhase::Queued => "queued",
            JobPhase::Installing => "installing",
            JobPhase::Running => "running",
            JobPhase::Packaging => "packaging",
            JobPhase::Succeeded => "succeeded",
            JobPhase::Failed => "failed",
            JobPhase::TimedOut => "timed_out",
        }
    }
}
