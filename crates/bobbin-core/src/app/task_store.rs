//! RoutingTaskStore - primary / replica の振り分け
//!
//! 書き込み系は必ず primary、読み取り専用の問い合わせは replica に流します。
//! replica は `ReadOnlyRepository` で包み、誤って書き込んだ場合はエラーにします。

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{OutboxEntry, OutboxId, Task, TaskId};
use crate::ports::{Access, FencingToken, StoreError, TaskRepository};

/// Replica connection: reads pass through, writes are rejected.
pub struct ReadOnlyRepository {
    inner: Arc<dyn TaskRepository>,
}

impl ReadOnlyRepository {
    pub fn new(inner: Arc<dyn TaskRepository>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl TaskRepository for ReadOnlyRepository {
    async fn insert(&self, _task: &Task) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    async fn insert_with_outbox(&self, _task: &Task, _entry: &OutboxEntry) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn update(&self, _task: &Task, _fence: FencingToken) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        self.inner.pending_outbox(limit).await
    }

    async fn delete_outbox(&self, _id: OutboxId) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }
}

/// Read/write-split connection router.
#[derive(Clone)]
pub struct RoutingTaskStore {
    primary: Arc<dyn TaskRepository>,
    replica: Arc<dyn TaskRepository>,
}

impl RoutingTaskStore {
    pub fn new(primary: Arc<dyn TaskRepository>, replica: Arc<dyn TaskRepository>) -> Self {
        Self {
            primary,
            replica: Arc::new(ReadOnlyRepository::new(replica)),
        }
    }

    /// Primary and replica backed by the same connection (no replication set up).
    pub fn single(repository: Arc<dyn TaskRepository>) -> Self {
        Self::new(repository.clone(), repository)
    }

    pub fn route(&self, access: Access) -> &Arc<dyn TaskRepository> {
        match access {
            Access::ReadWrite => &self.primary,
            Access::ReadOnly => &self.replica,
        }
    }

    pub fn primary(&self) -> &Arc<dyn TaskRepository> {
        self.route(Access::ReadWrite)
    }

    pub fn replica(&self) -> &Arc<dyn TaskRepository> {
        self.route(Access::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryTaskRepository;
    use chrono::Utc;
    use ulid::Ulid;

    fn task() -> Task {
        Task::new_pending(TaskId::from_ulid(Ulid::new()), "x", Utc::now())
    }

    #[tokio::test]
    async fn writes_go_to_primary_and_replica_rejects_them() {
        let primary = InMemoryTaskRepository::new();
        let replica = InMemoryTaskRepository::new();
        let store = RoutingTaskStore::new(Arc::new(primary.clone()), Arc::new(replica.clone()));
        let task = task();

        store.route(Access::ReadWrite).insert(&task).await.unwrap();
        let err = store.route(Access::ReadOnly).insert(&task).await.unwrap_err();

        assert_eq!(err, StoreError::ReadOnly);
        assert_eq!(primary.task_count().await, 1);
        assert_eq!(replica.task_count().await, 0);
    }

    #[tokio::test]
    async fn replica_reads_may_lag_the_primary() {
        let primary = InMemoryTaskRepository::new();
        let replica = InMemoryTaskRepository::new();
        let store = RoutingTaskStore::new(Arc::new(primary), Arc::new(replica));
        let task = task();

        store.primary().insert(&task).await.unwrap();

        // nothing replicates in this setup, so the replica has not seen the row
        assert!(store.replica().find_by_id(task.id).await.unwrap().is_none());
        assert!(store.primary().find_by_id(task.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn single_connection_serves_both_paths() {
        let store = RoutingTaskStore::single(Arc::new(InMemoryTaskRepository::new()));
        let task = task();

        store.primary().insert(&task).await.unwrap();
        assert_eq!(store.replica().find_by_id(task.id).await.unwrap(), Some(task.clone()));
        assert_eq!(
            store.replica().update(&task, FencingToken::new(1)).await,
            Err(StoreError::ReadOnly)
        );
    }
}
