/*
[INPUT]:  Backend task status strings
[OUTPUT]: Typed task status enum with ordering helpers
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When the backend adds task states or renames existing ones
*/

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a backend analysis task.
///
/// The backend historically reports `completed` for success and some
/// services spell cancellation `canceled`; both are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "pending", alias = "queued")]
    Pending,
    #[serde(rename = "running", alias = "in_progress")]
    Running,
    #[serde(rename = "succeeded", alias = "completed", alias = "success")]
    Succeeded,
    #[serde(rename = "failed", alias = "error")]
    Failed,
    #[serde(rename = "cancelled", alias = "canceled")]
    Cancelled,
}

impl TaskStatus {
    /// Position in the one-directional lifecycle.
    ///
    /// All terminal states share the highest rank, so moving between two
    /// terminal states is never a forward transition.
    pub const fn rank(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Running => 1,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled => 2,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
