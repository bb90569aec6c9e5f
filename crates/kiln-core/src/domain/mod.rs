//! Domain model (ids, records, phases, inputs, progress, errors).

pub mod errors;
pub mod ids;
pub mod input;
pub mod phase;
pub mod progress;
pub mod record;

pub use self::errors::{ArtifactError, KilnError, RunnerError, StoreError};
pub use self::ids::{JobId, ParseJobIdError};
pub use self::input::JobInput;
pub use self::phase::JobPhase;
pub use self::progress::{ArtifactRef, ProgressEvent};
pub use self::record::{
    INITIAL_STATUS, JobPatch, JobRecord, JobStatusView, MergeOutcome, TIMEOUT_MESSAGE, Terminal,
    TerminalCause,
};
