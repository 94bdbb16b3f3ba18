/*
[INPUT]:  ProgressEvent values from any source
[OUTPUT]: Folded TaskState snapshots + fold outcome / rejection reason
[POS]:    Domain layer - the one place task state is merged
[UPDATE]: When changing merge rules or the status lifecycle
*/

//! Task state and the event fold.
//!
//! The fold is the only code that mutates a [`TaskState`]. It enforces:
//! - statuses only move forward (`pending < running < terminal`),
//! - nothing is applied once a terminal status is reached,
//! - per-source sequence numbers strictly increase, which makes replaying
//!   an event a no-op,
//! - progress never decreases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use stockdash_adapter::{TaskFailure, TaskSnapshot, TaskStatus, TaskStep};

use crate::event::{EventSource, ProgressEvent};

/// Backend-assigned task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Current known state of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskState {
    pub id: TaskId,
    pub task_type: Option<String>,
    pub status: TaskStatus,
    pub progress: Option<f64>,
    pub current_step: Option<String>,
    /// Step history; replaced only by a longer one, so it never shrinks.
    pub steps: Vec<TaskStep>,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented on every applied change; lets subscribers skip duplicates.
    pub revision: u64,
    #[serde(skip)]
    last_sequence: BTreeMap<EventSource, u64>,
}

/// Result of folding an accepted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// State changed; subscribers must be notified.
    Applied,
    /// Event accepted but carried nothing new.
    Unchanged,
}

/// Why an event was not folded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FoldRejection {
    #[error("event for task {event} folded into task {state}")]
    WrongTask { state: TaskId, event: TaskId },

    #[error("task already {current}; dropped {incoming:?} event")]
    AfterTerminal {
        current: TaskStatus,
        incoming: Option<TaskStatus>,
    },

    #[error("status regression {from} -> {to}")]
    StatusRegression { from: TaskStatus, to: TaskStatus },

    #[error("stale {origin} sequence {sequence} (last applied {last})")]
    Stale {
        origin: EventSource,
        sequence: u64,
        last: u64,
    },
}

impl FoldRejection {
    /// Rejections that indicate a misbehaving producer rather than a replay.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            FoldRejection::AfterTerminal { .. } | FoldRejection::StatusRegression { .. }
        )
    }
}

impl TaskState {
    /// Fresh `pending` state for a just-submitted task.
    pub fn pending(id: TaskId) -> Self {
        let now = Utc::now();
        Self {
            id,
            task_type: None,
            status: TaskStatus::Pending,
            progress: None,
            current_step: None,
            steps: Vec::new(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            revision: 0,
            last_sequence: BTreeMap::new(),
        }
    }

    /// Adopt a task in whatever status the backend reports.
    pub fn from_snapshot(snapshot: &TaskSnapshot) -> Self {
        let now = Utc::now();
        let created_at = snapshot.created_at_utc().unwrap_or(now);
        let updated_at = snapshot.updated_at_utc().unwrap_or(created_at);
        let status = snapshot.status;
        Self {
            id: TaskId::new(snapshot.task_id.clone()),
            task_type: snapshot.task_type.clone(),
            status,
            progress: snapshot.progress.and_then(clamp_progress),
            current_step: snapshot.current_step.clone(),
            steps: snapshot.steps.clone(),
            result: (status == TaskStatus::Succeeded)
                .then(|| snapshot.result.clone())
                .flatten(),
            error: (status == TaskStatus::Failed)
                .then(|| snapshot.error.clone())
                .flatten(),
            created_at,
            updated_at,
            revision: 0,
            last_sequence: BTreeMap::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Last sequence applied from `source`, if any.
    pub fn last_sequence(&self, source: EventSource) -> Option<u64> {
        self.last_sequence.get(&source).copied()
    }

    /// Fold one event into this state.
    pub fn apply(&mut self, event: &ProgressEvent) -> Result<FoldOutcome, FoldRejection> {
        if event.task_id != self.id {
            return Err(FoldRejection::WrongTask {
                state: self.id.clone(),
                event: event.task_id.clone(),
            });
        }

        if let Some(&last) = self.last_sequence.get(&event.source)
            && event.sequence <= last
        {
            return Err(FoldRejection::Stale {
                origin: event.source,
                sequence: event.sequence,
                last,
            });
        }

        if self.status.is_terminal() {
            return Err(FoldRejection::AfterTerminal {
                current: self.status,
                incoming: event.status,
            });
        }

        let next_status = event.status.unwrap_or(self.status);
        if next_status.rank() < self.status.rank() {
            return Err(FoldRejection::StatusRegression {
                from: self.status,
                to: next_status,
            });
        }

        self.last_sequence.insert(event.source, event.sequence);

        let mut changed = false;
        if next_status != self.status {
            self.status = next_status;
            changed = true;
        }

        if let Some(incoming) = event.progress.and_then(clamp_progress) {
            let merged = self.progress.map_or(incoming, |current| current.max(incoming));
            if self.progress != Some(merged) {
                self.progress = Some(merged);
                changed = true;
            }
        }

        changed |= merge_field(&mut self.task_type, &event.task_type);
        changed |= merge_field(&mut self.current_step, &event.current_step);
        if event.steps.len() > self.steps.len() {
            self.steps = event.steps.clone();
            changed = true;
        }

        if self.status == TaskStatus::Succeeded {
            changed |= merge_field(&mut self.result, &event.result);
        }
        if self.status == TaskStatus::Failed {
            changed |= merge_field(&mut self.error, &event.error);
        }

        if !changed {
            return Ok(FoldOutcome::Unchanged);
        }

        self.revision += 1;
        self.updated_at = self.updated_at.max(event.observed_at).max(Utc::now());
        Ok(FoldOutcome::Applied)
    }
}

fn merge_field<T: Clone + PartialEq>(slot: &mut Option<T>, incoming: &Option<T>) -> bool {
    match incoming {
        Some(value) if slot.as_ref() != Some(value) => {
            *slot = Some(value.clone());
            true
        }
        _ => false,
    }
}

fn clamp_progress(value: f64) -> Option<f64> {
    value.is_finite().then(|| value.clamp(0.0, 100.0))
}
