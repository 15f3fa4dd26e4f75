//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted task status.
///
/// State transitions:
/// - Pending -> Success
/// - Pending -> Failed
/// - Failed -> Success (a later attempt succeeded)
/// - Failed -> Failed (a later attempt failed again)
///
/// Success is terminal: nothing leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created by ingress, not yet executed successfully.
    Pending,

    /// Executed successfully.
    Success,

    /// Last execution failed; the broker-level retry chain may still re-run it.
    Failed,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success)
    }

    /// Can a task move from `self` to `next`?
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Success)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Failed, TaskStatus::Success)
                | (TaskStatus::Failed, TaskStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::pending_to_success(TaskStatus::Pending, TaskStatus::Success, true)]
    #[case::pending_to_failed(TaskStatus::Pending, TaskStatus::Failed, true)]
    #[case::failed_to_success(TaskStatus::Failed, TaskStatus::Success, true)]
    #[case::failed_again(TaskStatus::Failed, TaskStatus::Failed, true)]
    #[case::success_to_failed(TaskStatus::Success, TaskStatus::Failed, false)]
    #[case::success_to_success(TaskStatus::Success, TaskStatus::Success, false)]
    #[case::success_to_pending(TaskStatus::Success, TaskStatus::Pending, false)]
    #[case::failed_to_pending(TaskStatus::Failed, TaskStatus::Pending, false)]
    fn transitions(#[case] from: TaskStatus, #[case] to: TaskStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn serializes_in_screaming_case() {
        let json = serde_json::to_string(&TaskStatus::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");
        assert!(TaskStatus::Success.is_terminal());
        assert!(!TaskStatus::Failed.is_terminal());
    }
}
