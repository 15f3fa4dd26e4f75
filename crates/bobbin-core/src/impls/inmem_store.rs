//! InMemoryTaskRepository - 開発用・テスト用の正本
//!
//! # 実装詳細
//! - rows は (created_at, id) の複合キーで保持し、id → key の索引で findById を引く
//! - outbox は OutboxId（ULID = 時刻順）で保持する
//! - 1 つの Mutex 内で task + outbox を書くことでトランザクションを表現する

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{OutboxEntry, OutboxId, Task, TaskId, TaskKey, TaskStatus};
use crate::ports::{FencingToken, StoreError, TaskRepository};

#[derive(Debug, Clone)]
struct StoredTask {
    task: Task,
    /// Highest fencing token that has written this row (0 = never updated).
    fence: u64,
}

#[derive(Debug, Default)]
struct InMemoryStoreState {
    rows: BTreeMap<TaskKey, StoredTask>,
    by_id: HashMap<TaskId, TaskKey>,
    outbox: BTreeMap<OutboxId, OutboxEntry>,
}

impl InMemoryStoreState {
    fn insert_row(&mut self, task: &Task) -> Result<(), StoreError> {
        if self.by_id.contains_key(&task.id) {
            return Err(StoreError::Duplicate(task.id));
        }
        let key = task.key();
        self.by_id.insert(task.id, key);
        self.rows.insert(
            key,
            StoredTask {
                task: task.clone(),
                fence: 0,
            },
        );
        Ok(())
    }
}

/// In-memory relational store stand-in.
///
/// Cloning shares the same rows, so a clone can serve as a zero-lag replica.
#[derive(Clone, Default)]
pub struct InMemoryTaskRepository {
    state: Arc<Mutex<InMemoryStoreState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StoreError::Unavailable` (outage simulation).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn task_count(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn outbox_len(&self) -> usize {
        self.state.lock().await.outbox.len()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn insert(&self, task: &Task) -> Result<(), StoreError> {
        self.check_available()?;
        self.state.lock().await.insert_row(task)
    }

    async fn insert_with_outbox(&self, task: &Task, entry: &OutboxEntry) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.insert_row(task)?;
        state.outbox.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .by_id
            .get(&id)
            .and_then(|key| state.rows.get(key))
            .map(|stored| stored.task.clone()))
    }

    async fn update(&self, task: &Task, fence: FencingToken) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let stored = state
            .rows
            .get_mut(&task.key())
            .ok_or(StoreError::Missing(task.id))?;

        if stored.task.status == TaskStatus::Success {
            return Err(StoreError::AlreadySucceeded(task.id));
        }
        if fence.value() < stored.fence {
            return Err(StoreError::StaleFence {
                task_id: task.id,
                presented: fence.value(),
                current: stored.fence,
            });
        }
        if task.version != stored.task.version {
            return Err(StoreError::VersionConflict {
                task_id: task.id,
                loaded: task.version,
                current: stored.task.version,
            });
        }
        stored.fence = fence.value();
        stored.task = Task {
            version: task.version + 1,
            ..task.clone()
        };
        Ok(())
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.outbox.values().take(limit).cloned().collect())
    }

    async fn delete_outbox(&self, id: OutboxId) -> Result<(), StoreError> {
        self.check_available()?;
        self.state.lock().await.outbox.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CorrelationId, TaskEvent, TaskType};
    use chrono::Utc;
    use ulid::Ulid;

    fn task(payload: &str) -> Task {
        Task::new_pending(TaskId::from_ulid(Ulid::new()), payload, Utc::now())
    }

    fn outbox_for(task: &Task) -> OutboxEntry {
        OutboxEntry::new(
            OutboxId::from_ulid(Ulid::new()),
            TaskEvent::new(task.id, TaskType::new("DEFAULT"), task.payload.clone()),
            Some(CorrelationId::new("c")),
            task.created_at,
        )
    }

    #[tokio::test]
    async fn insert_then_find_by_id() {
        let repo = InMemoryTaskRepository::new();
        let task = task("x");

        repo.insert(&task).await.unwrap();

        let found = repo.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(found, task);
        assert_eq!(found.version, 0);
        assert!(matches!(repo.insert(&task).await, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn insert_with_outbox_is_all_or_nothing() {
        let repo = InMemoryTaskRepository::new();
        let task = task("x");
        repo.insert(&task).await.unwrap();

        // duplicate task row: the outbox row must not appear either
        let err = repo.insert_with_outbox(&task, &outbox_for(&task)).await;
        assert!(err.is_err());
        assert_eq!(repo.outbox_len().await, 0);

        let other = self::task("y");
        repo.insert_with_outbox(&other, &outbox_for(&other)).await.unwrap();
        assert_eq!(repo.outbox_len().await, 1);
        assert_eq!(repo.task_count().await, 2);
    }

    #[tokio::test]
    async fn stale_fence_is_rejected() {
        let repo = InMemoryTaskRepository::new();
        let mut task = task("x");
        repo.insert(&task).await.unwrap();

        task.mark_failed(Utc::now()).unwrap();
        repo.update(&task, FencingToken::new(2)).await.unwrap();

        let mut stale = task.clone();
        stale.mark_succeeded(Utc::now()).unwrap();
        let err = repo.update(&stale, FencingToken::new(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::StaleFence { presented: 1, current: 2, .. }));

        let mut stored = repo.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.version, 1);

        // same holder may write again from a fresh copy
        stored.mark_succeeded(Utc::now()).unwrap();
        repo.update(&stored, FencingToken::new(2)).await.unwrap();
    }

    #[tokio::test]
    async fn write_from_an_outdated_copy_is_rejected() {
        let repo = InMemoryTaskRepository::new();
        let task = task("x");
        repo.insert(&task).await.unwrap();

        let mut first = task.clone();
        first.mark_failed(Utc::now()).unwrap();
        repo.update(&first, FencingToken::new(1)).await.unwrap();

        // a newer token does not make an outdated copy current
        let mut second = task.clone();
        second.mark_failed(Utc::now()).unwrap();
        let err = repo.update(&second, FencingToken::new(2)).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { loaded: 0, current: 1, .. }));
        assert_eq!(repo.find_by_id(task.id).await.unwrap().unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn succeeded_row_is_never_rewritten() {
        let repo = InMemoryTaskRepository::new();
        let task = task("x");
        repo.insert(&task).await.unwrap();

        let mut done = task.clone();
        done.mark_succeeded(Utc::now()).unwrap();
        repo.update(&done, FencingToken::new(1)).await.unwrap();

        let mut late = task.clone();
        late.mark_failed(Utc::now()).unwrap();
        let err = repo.update(&late, FencingToken::new(2)).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadySucceeded(id) if id == task.id));

        let stored = repo.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Success);
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn outbox_is_drained_oldest_first() {
        let repo = InMemoryTaskRepository::new();
        let first = task("a");
        let second = task("b");
        let first_entry = outbox_for(&first);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second_entry = outbox_for(&second);

        repo.insert_with_outbox(&second, &second_entry).await.unwrap();
        repo.insert_with_outbox(&first, &first_entry).await.unwrap();

        let pending = repo.pending_outbox(10).await.unwrap();
        assert_eq!(pending, vec![first_entry.clone(), second_entry]);

        repo.delete_outbox(first_entry.id).await.unwrap();
        repo.delete_outbox(first_entry.id).await.unwrap();
        assert_eq!(repo.pending_outbox(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let repo = InMemoryTaskRepository::new();
        repo.set_unavailable(true);

        let err = repo.insert(&task("x")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
