//! TaskService - ingress 側のオーケストレータ
//!
//! # createTask
//! 1. payload を検証（空は Validation）
//! 2. PENDING / retryCount 0 の Task を組み立てる
//! 3. primary に永続化（失敗したら何も publish しない）
//!    - outbox 有効: Task と outbox 行を同一トランザクションで書く（relay が配送）
//!    - outbox 無効: insert 後に `TaskProducer::send` で投げっぱなし publish
//!
//! # getTask
//! - `get_task`: replica から読む（レプリケーション遅延は許容）
//! - `get_task_consistent`: primary から読む

use std::sync::Arc;

use tracing::{Instrument, info, info_span};

use crate::domain::{CorrelationId, OutboxEntry, PipelineError, Task, TaskEvent, TaskId, TaskType};
use crate::ports::{Access, Clock, IdGenerator, TaskRepository};

use super::producer::TaskProducer;
use super::task_store::RoutingTaskStore;

/// How a created task reaches the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Outbox row written with the task; a relay publishes it.
    Outbox,
    /// Fire-and-forget publish after the insert.
    Direct,
}

#[derive(Clone)]
pub struct TaskService {
    store: RoutingTaskStore,
    producer: TaskProducer,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    task_type: TaskType,
    mode: PublishMode,
}

impl TaskService {
    pub fn new(
        store: RoutingTaskStore,
        producer: TaskProducer,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        task_type: TaskType,
        mode: PublishMode,
    ) -> Self {
        Self {
            store,
            producer,
            ids,
            clock,
            task_type,
            mode,
        }
    }

    pub fn mode(&self) -> PublishMode {
        self.mode
    }

    pub async fn create_task(
        &self,
        payload: &str,
        correlation_id: &CorrelationId,
    ) -> Result<Task, PipelineError> {
        if payload.trim().is_empty() {
            return Err(PipelineError::Validation("payload must not be blank".into()));
        }

        let now = self.clock.now();
        let task = Task::new_pending(self.ids.generate_task_id(), payload, now);
        let event = TaskEvent::new(task.id, self.task_type.clone(), payload);

        let span = info_span!("create_task", task_id = %task.id, correlation_id = %correlation_id);
        async {
            let primary = self.store.route(Access::ReadWrite);
            match self.mode {
                PublishMode::Outbox => {
                    let entry = OutboxEntry::new(
                        self.ids.generate_outbox_id(),
                        event,
                        Some(correlation_id.clone()),
                        now,
                    );
                    primary.insert_with_outbox(&task, &entry).await?;
                }
                PublishMode::Direct => {
                    primary.insert(&task).await?;
                    // not awaited: the outcome is logged by the producer
                    drop(self.producer.send(event, Some(correlation_id.clone())));
                }
            }
            info!(mode = ?self.mode, "task created");
            Ok(task)
        }
        .instrument(span)
        .await
    }

    /// Replica read; a task created moments ago may not be visible yet.
    pub async fn get_task(&self, id: TaskId) -> Result<Task, PipelineError> {
        self.find(Access::ReadOnly, id).await
    }

    /// Primary read.
    pub async fn get_task_consistent(&self, id: TaskId) -> Result<Task, PipelineError> {
        self.find(Access::ReadWrite, id).await
    }

    async fn find(&self, access: Access, id: TaskId) -> Result<Task, PipelineError> {
        let repo: &Arc<dyn TaskRepository> = self.store.route(access);
        repo.find_by_id(id)
            .await?
            .ok_or(PipelineError::NotFound(id))
    }
}
