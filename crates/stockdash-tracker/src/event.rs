/*
[INPUT]:  Task snapshots decoded by a progress channel, local cancellation
[OUTPUT]: Immutable ProgressEvent values tagged with source + sequence
[POS]:    Domain layer - unit of information folded into TaskState
[UPDATE]: When adding event sources or snapshot fields
*/

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use stockdash_adapter::{TaskFailure, TaskSnapshot, TaskStatus, TaskStep};

use crate::state::TaskId;

/// Producer of a progress event. Sequence numbers are only comparable
/// within one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Streaming,
    Polling,
    Registry,
    Local,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventSource::Streaming => "streaming",
            EventSource::Polling => "polling",
            EventSource::Registry => "registry",
            EventSource::Local => "local",
        };
        f.write_str(name)
    }
}

/// One ordered update about a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub source: EventSource,
    pub sequence: u64,
    pub status: Option<TaskStatus>,
    pub progress: Option<f64>,
    pub task_type: Option<String>,
    pub current_step: Option<String>,
    /// Full step history as reported; empty when the producer sent none.
    pub steps: Vec<TaskStep>,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskFailure>,
    pub observed_at: DateTime<Utc>,
}

impl ProgressEvent {
    /// Event carrying only a status change.
    pub fn status(task_id: TaskId, source: EventSource, sequence: u64, status: TaskStatus) -> Self {
        Self {
            task_id,
            source,
            sequence,
            status: Some(status),
            progress: None,
            task_type: None,
            current_step: None,
            steps: Vec::new(),
            result: None,
            error: None,
            observed_at: Utc::now(),
        }
    }

    /// Convert a backend snapshot. Server `seq` values are connection-scoped
    /// and never become the fold sequence.
    pub fn from_snapshot(snapshot: TaskSnapshot, source: EventSource, sequence: u64) -> Self {
        let observed_at = snapshot.updated_at_utc().unwrap_or_else(Utc::now);
        Self {
            task_id: TaskId::from(snapshot.task_id),
            source,
            sequence,
            status: Some(snapshot.status),
            progress: snapshot.progress,
            task_type: snapshot.task_type,
            current_step: snapshot.current_step,
            steps: snapshot.steps,
            result: snapshot.result,
            error: snapshot.error,
            observed_at,
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_steps(mut self, steps: Vec<TaskStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: TaskFailure) -> Self {
        self.error = Some(error);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(TaskStatus::is_terminal)
    }
}
