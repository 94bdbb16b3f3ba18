/*
[INPUT]:  Backend task records (progress endpoint, active listing, stream frames)
[OUTPUT]: Typed task snapshot structs with lenient deserialization
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When the backend task record schema changes
*/

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::TaskStatus;

/// Point-in-time view of one backend task as reported by the backend.
///
/// Every producer (progress polling, active listing, WebSocket frames)
/// emits this same record, so one decoder serves all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    #[serde(alias = "id")]
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// Step history, oldest first. The backend only ever appends to it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<TaskStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
    /// Producer-assigned sequence number, when the backend provides one.
    #[serde(default, alias = "sequence", skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl TaskSnapshot {
    /// Minimal snapshot carrying only an id and status.
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: None,
            status,
            progress: None,
            current_step: None,
            steps: Vec::new(),
            result: None,
            error: None,
            seq: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_deref().and_then(parse_timestamp)
    }

    pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
        self.updated_at.as_deref().and_then(parse_timestamp)
    }
}

/// One entry of a task's step history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    #[serde(default)]
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl TaskStep {
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_deref().and_then(parse_timestamp)
    }
}

/// Failure detail attached to a `failed` task.
///
/// The backend sends either a bare message string or an object with a
/// machine-readable `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TaskFailureRepr")]
pub struct TaskFailure {
    pub kind: String,
    pub message: String,
}

impl TaskFailure {
    pub const UNSPECIFIED_KIND: &'static str = "unspecified";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskFailureRepr {
    Message(String),
    Detailed {
        #[serde(default, alias = "code", alias = "type")]
        kind: Option<String>,
        #[serde(alias = "detail")]
        message: String,
    },
}

impl From<TaskFailureRepr> for TaskFailure {
    fn from(repr: TaskFailureRepr) -> Self {
        match repr {
            TaskFailureRepr::Message(message) => {
                TaskFailure::new(TaskFailure::UNSPECIFIED_KIND, message)
            }
            TaskFailureRepr::Detailed { kind, message } => TaskFailure::new(
                kind.unwrap_or_else(|| TaskFailure::UNSPECIFIED_KIND.to_string()),
                message,
            ),
        }
    }
}

/// Parse a backend timestamp.
///
/// Accepts RFC 3339 and naive ISO-8601 (`2024-01-01T08:30:00.123456`), the
/// latter interpreted as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_snapshot_from_backend_record() {
        let raw = r#"{
            "task_id": "T1",
            "task_type": "stock_analysis",
            "status": "completed",
            "progress": 100,
            "current_step": "analysis complete",
            "steps": [],
            "params": {"stock_code": "600519"},
            "result": {"rating": "buy"},
            "error": null,
            "created_at": "2024-03-01T09:30:00.123456",
            "updated_at": "2024-03-01T09:31:00"
        }"#;

        let snapshot: TaskSnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snapshot.task_id, "T1");
        assert_eq!(snapshot.status, TaskStatus::Succeeded);
        assert_eq!(snapshot.progress, Some(100.0));
        assert_eq!(snapshot.error, None);
        assert_eq!(snapshot.seq, None);
        assert_eq!(
            snapshot.result,
            Some(serde_json::json!({"rating": "buy"}))
        );
        let created = snapshot.created_at_utc().unwrap();
        assert_eq!((created.hour(), created.minute()), (9, 30));
    }

    #[test]
    fn test_snapshot_step_history() {
        let raw = r#"{
            "task_id": "T1",
            "status": "running",
            "progress": 40,
            "steps": [
                {"step": "fetching quotes", "progress": 10, "timestamp": "2024-03-01T09:30:00"},
                {"step": "news digest", "timestamp": "2024-03-01T09:30:20.5"}
            ]
        }"#;

        let snapshot: TaskSnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snapshot.steps.len(), 2);
        assert_eq!(snapshot.steps[0].step, "fetching quotes");
        assert_eq!(snapshot.steps[0].progress, Some(10.0));
        assert_eq!(snapshot.steps[1].progress, None);
        assert_eq!(snapshot.steps[1].timestamp_utc().unwrap().second(), 20);

        let bare: TaskSnapshot = serde_json::from_str(r#"{"task_id":"T1","status":"pending"}"#).unwrap();
        assert!(bare.steps.is_empty());
    }

    #[test]
    fn test_failure_accepts_string_and_object() {
        let plain: TaskFailure = serde_json::from_str(r#""data source offline""#).unwrap();
        assert_eq!(plain.kind, TaskFailure::UNSPECIFIED_KIND);
        assert_eq!(plain.message, "data source offline");

        let detailed: TaskFailure =
            serde_json::from_str(r#"{"kind":"timeout","message":"llm timed out"}"#).unwrap();
        assert_eq!(detailed, TaskFailure::new("timeout", "llm timed out"));
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let rfc = parse_timestamp("2024-03-01T09:30:00+08:00").unwrap();
        assert_eq!(rfc.hour(), 1);
        let naive = parse_timestamp("2024-03-01 09:30:00").unwrap();
        assert_eq!(naive.day(), 1);
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
