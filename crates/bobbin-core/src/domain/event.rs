//! TaskEvent - submission channel に流れるメッセージ本体
//!
//! Body は `{taskId, taskType, payload}` のみ。correlation id は body ではなく
//! メッセージヘッダで運ぶため、ここでは別の値オブジェクトとして持ちます。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

use super::{TaskId, TaskType};

/// Immutable wire event announcing a task submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub payload: String,
}

impl TaskEvent {
    pub fn new(task_id: TaskId, task_type: TaskType, payload: impl Into<String>) -> Self {
        Self {
            task_id,
            task_type,
            payload: payload.into(),
        }
    }

    /// Per-task lock key shared by every consumer process.
    pub fn lock_key(&self) -> String {
        lock_key(self.task_id)
    }
}

pub fn lock_key(task_id: TaskId) -> String {
    format!("lock:task:{}", task_id.as_key())
}

/// Trace id threaded explicitly through one request or one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    /// Use the incoming value when present and non-blank, otherwise mint one.
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Self::new(v),
            _ => Self::generate(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_body_matches_submission_contract() {
        let id = TaskId::from_ulid(Ulid::new());
        let event = TaskEvent::new(id, TaskType::new("DEFAULT"), "hello");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "taskId": id.as_key(),
                "taskType": "DEFAULT",
                "payload": "hello",
            })
        );
    }

    #[test]
    fn lock_key_uses_bare_task_id() {
        let id = TaskId::from_ulid(Ulid::new());
        let event = TaskEvent::new(id, TaskType::new("DEFAULT"), "");
        assert_eq!(event.lock_key(), format!("lock:task:{}", id.as_key()));
    }

    #[test]
    fn correlation_id_falls_back_when_blank() {
        assert_eq!(CorrelationId::from_header(Some("abc")).as_str(), "abc");

        let minted = CorrelationId::from_header(Some("   "));
        assert!(!minted.as_str().trim().is_empty());
        assert_ne!(CorrelationId::from_header(None), CorrelationId::from_header(None));
    }
}
