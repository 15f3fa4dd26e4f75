//! Task entity: identity + status + audit counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::TaskId;
use super::state::TaskStatus;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Composite storage key. `id` alone addresses and locks a task;
/// the pair lets a store partition rows by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub created_at: DateTime<Utc>,
    pub id: TaskId,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// A persisted task.
///
/// Design:
/// - Created once by the ingress orchestrator at `Pending`.
/// - Mutated only through the transition methods below, and only by the
///   consumer holding the task's lock.
/// - `retry_count` is an audit counter; it moves only on a `Failed` transition.
/// - `version` is the row version the copy was loaded at. The store bumps it on
///   every accepted update and rejects writes made from an older copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub payload: String,
    pub retry_count: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Task {
    pub fn new_pending(id: TaskId, payload: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            status: TaskStatus::Pending,
            payload: payload.into(),
            retry_count: 0,
            updated_at: now,
            version: 0,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey {
            created_at: self.created_at,
            id: self.id,
        }
    }

    /// Mark as succeeded.
    pub fn mark_succeeded(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Success, now)
    }

    /// Mark as failed and bump the audit counter.
    pub fn mark_failed(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Failed, now)?;
        self.retry_count += 1;
        Ok(())
    }

    fn transition(&mut self, next: TaskStatus, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn new_task_is_pending_with_zero_retries() {
        let task = Task::new_pending(TaskId::from_ulid(Ulid::new()), "x", at(0));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.created_at, task.updated_at);
    }

    #[test]
    fn failure_increments_retry_count_and_success_does_not() {
        let mut task = Task::new_pending(TaskId::from_ulid(Ulid::new()), "x", at(0));

        task.mark_failed(at(1)).unwrap();
        task.mark_failed(at(2)).unwrap();
        assert_eq!(task.retry_count, 2);

        task.mark_succeeded(at(3)).unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.retry_count, 2);
        assert_eq!(task.updated_at, at(3));
        assert_eq!(task.created_at, at(0));
    }

    #[test]
    fn success_is_terminal() {
        let mut task = Task::new_pending(TaskId::from_ulid(Ulid::new()), "x", at(0));
        task.mark_succeeded(at(1)).unwrap();

        let err = task.mark_failed(at(2)).unwrap_err();
        assert_eq!(err.from, TaskStatus::Success);
        assert_eq!(task.retry_count, 0);
        assert!(task.mark_succeeded(at(3)).is_err());
        assert_eq!(task.updated_at, at(1));
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let task = Task::new_pending(TaskId::from_ulid(Ulid::new()), "hello", at(0));
        let json = serde_json::to_value(&task).unwrap();

        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["payload"], "hello");
        assert_eq!(json["version"], 0);
        assert!(json.get("createdAt").is_some());
    }
}
