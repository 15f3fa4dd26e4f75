//! TaskStore port - relational store が実装する正本（source of truth）
//!
//! TaskRepository は 1 本の接続（primary または replica）を表します。
//! primary / replica の振り分けは `app::task_store::RoutingTaskStore` が行います。
//!
//! # 設計原則
//! - Task の insert と outbox 行の insert は同一トランザクション
//! - 更新は fencing token と読み込み時の version を提示し、古いものは拒否される
//! - SUCCESS の行は二度と書き換えない
//! - replica には一切書き込まない

use async_trait::async_trait;
use thiserror::Error;

use super::lock_store::FencingToken;
use crate::domain::{OutboxEntry, OutboxId, Task, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("task {0} already exists")]
    Duplicate(TaskId),

    #[error("task {0} does not exist")]
    Missing(TaskId),

    #[error("stale fencing token for {task_id}: presented {presented}, current {current}")]
    StaleFence {
        task_id: TaskId,
        presented: u64,
        current: u64,
    },

    #[error("version conflict for {task_id}: loaded {loaded}, current {current}")]
    VersionConflict {
        task_id: TaskId,
        loaded: u64,
        current: u64,
    },

    #[error("task {0} already succeeded")]
    AlreadySucceeded(TaskId),

    #[error("write rejected: connection is read-only")]
    ReadOnly,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Which connection a unit of work should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Primary connection; every mutation goes here.
    ReadWrite,
    /// Replica connection; may lag behind the primary.
    ReadOnly,
}

/// Repository-style access to task rows and outbox rows.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new task row.
    async fn insert(&self, task: &Task) -> Result<(), StoreError>;

    /// Insert a new task row and its outbox row atomically.
    async fn insert_with_outbox(&self, task: &Task, entry: &OutboxEntry) -> Result<(), StoreError>;

    /// Look a task up by id alone.
    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Persist a mutated task.
    ///
    /// Checked in order:
    /// - `AlreadySucceeded` when the stored row is SUCCESS;
    /// - `StaleFence` when `fence` is lower than the highest token recorded for the row;
    /// - `VersionConflict` when `task.version` is not the stored version.
    ///
    /// On success the row's token becomes `fence` and its version is bumped.
    async fn update(&self, task: &Task, fence: FencingToken) -> Result<(), StoreError>;

    /// Oldest pending outbox rows first.
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Delete an outbox row after a confirmed publish. Deleting twice is a no-op.
    async fn delete_outbox(&self, id: OutboxId) -> Result<(), StoreError>;
}
