/*
[INPUT]:  Adapter errors and tracker-level failure conditions
[OUTPUT]: SubmissionError / TrackerError returned to callers
[POS]:    Error handling layer - tracker crate
[UPDATE]: When adding caller-visible failure modes
*/

use std::time::Duration;
use thiserror::Error;

use stockdash_adapter::AdapterError;

use crate::state::TaskId;

/// Job was not created. Never retried by the tracker.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("invalid analysis request: {0}")]
    Invalid(String),

    #[error("submission transport failed: {0}")]
    Transport(#[source] AdapterError),

    #[error("backend rejected submission (code {code}): {message}")]
    Rejected { code: i32, message: String },

    #[error("submission timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

impl SubmissionError {
    pub(crate) fn timeout(duration: Duration) -> Self {
        SubmissionError::Timeout {
            duration_ms: duration.as_millis() as u64,
        }
    }
}

impl From<AdapterError> for SubmissionError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Api { code, message } => SubmissionError::Rejected { code, message },
            AdapterError::Timeout { duration_ms } => SubmissionError::Timeout { duration_ms },
            other => SubmissionError::Transport(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error("task {0} is not tracked")]
    UnknownTask(TaskId),

    #[error("active task listing failed: {0}")]
    Registry(#[source] AdapterError),

    #[error("tracker setup failed: {0}")]
    Setup(#[source] AdapterError),

    #[error("tracker is shutting down")]
    ShuttingDown,
}
