//! OutboxRelay - outbox 行を broker に配送する publisher loop
//!
//! # フロー
//! 1. `pending_outbox(batch_size)` で古い順に取得（primary から読む）
//! 2. `TaskProducer::publish` で broker の受理まで待つ
//! 3. 受理されたら `delete_outbox` で行を消す
//! 4. publish に失敗した行はそのまま残し、次の tick で再送する
//!
//! 削除前に落ちると同じ event が再送されますが、consumer は冪等なので問題ありません。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::PipelineError;
use crate::ports::TaskRepository;

use super::producer::TaskProducer;

/// Result of one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub published: usize,
    pub failed: usize,
}

pub struct OutboxRelay {
    repository: Arc<dyn TaskRepository>,
    producer: TaskProducer,
    batch_size: usize,
    poll_interval: Duration,
}

impl OutboxRelay {
    /// `repository` must be the primary connection.
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        producer: TaskProducer,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            repository,
            producer,
            batch_size,
            poll_interval,
        }
    }

    /// Relay one batch.
    ///
    /// Stops at the first failed publish so later rows for the same task
    /// never overtake an earlier one.
    pub async fn run_once(&self) -> Result<RelayStats, PipelineError> {
        let entries = self.repository.pending_outbox(self.batch_size).await?;
        let mut stats = RelayStats::default();

        for entry in entries {
            match self
                .producer
                .publish(&entry.event, entry.correlation_id.as_ref())
                .await
            {
                Ok(()) => {
                    self.repository.delete_outbox(entry.id).await?;
                    debug!(outbox_id = %entry.id, task_id = %entry.event.task_id, "outbox entry relayed");
                    stats.published += 1;
                }
                Err(err) => {
                    warn!(outbox_id = %entry.id, error = %err, "outbox publish failed; will retry");
                    stats.failed += 1;
                    break;
                }
            }
        }
        Ok(stats)
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            channel = self.producer.channel(),
            batch_size = self.batch_size,
            "outbox relay started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                // drained a full batch: go again without sleeping
                Ok(stats) if stats.failed == 0 && stats.published == self.batch_size => continue,
                Ok(_) => {}
                Err(err) => warn!(error = %err, "outbox relay pass failed"),
            }

            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("outbox relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CorrelationId, OutboxEntry, OutboxId, Task, TaskEvent, TaskId, TaskType};
    use crate::impls::{InMemoryBroker, InMemoryTaskRepository};
    use chrono::Utc;
    use ulid::Ulid;

    async fn seed(repo: &InMemoryTaskRepository, n: usize) -> Vec<TaskId> {
        let mut ids = Vec::new();
        for i in 0..n {
            let id = TaskId::from_ulid(Ulid::new());
            let now = Utc::now();
            let task = Task::new_pending(id, format!("p{i}"), now);
            let entry = OutboxEntry::new(
                OutboxId::from_ulid(Ulid::new()),
                TaskEvent::new(id, TaskType::new("DEFAULT"), task.payload.clone()),
                Some(CorrelationId::new(format!("c{i}"))),
                now,
            );
            repo.insert_with_outbox(&task, &entry).await.unwrap();
            ids.push(id);
        }
        ids
    }

    fn relay(repo: &InMemoryTaskRepository, broker: &InMemoryBroker) -> OutboxRelay {
        OutboxRelay::new(
            Arc::new(repo.clone()),
            TaskProducer::new(Arc::new(broker.clone()), "tasks.main"),
            10,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn relays_and_deletes_in_order() {
        let repo = InMemoryTaskRepository::new();
        let broker = InMemoryBroker::new();
        let ids = seed(&repo, 3).await;

        let stats = relay(&repo, &broker).run_once().await.unwrap();

        assert_eq!(stats, RelayStats { published: 3, failed: 0 });
        assert_eq!(repo.outbox_len().await, 0);
        let keys: Vec<_> = broker
            .pending("tasks.main")
            .await
            .into_iter()
            .map(|m| m.key)
            .collect();
        let expected: Vec<_> = ids.iter().map(|id| id.as_key()).collect();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn failed_publish_keeps_rows_for_next_pass() {
        let repo = InMemoryTaskRepository::new();
        let broker = InMemoryBroker::new();
        seed(&repo, 2).await;
        let relay = relay(&repo, &broker);

        broker.set_unavailable(true);
        let stats = relay.run_once().await.unwrap();
        assert_eq!(stats, RelayStats { published: 0, failed: 1 });
        assert_eq!(repo.outbox_len().await, 2);

        broker.set_unavailable(false);
        let stats = relay.run_once().await.unwrap();
        assert_eq!(stats.published, 2);
        assert_eq!(repo.outbox_len().await, 0);
        assert_eq!(broker.pending("tasks.main").await.len(), 2);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let repo = InMemoryTaskRepository::new();
        let broker = InMemoryBroker::new();
        seed(&repo, 1).await;
        let relay = Arc::new(relay(&repo, &broker));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let relay = relay.clone();
            async move { relay.run(rx).await }
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while repo.outbox_len().await > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(broker.pending("tasks.main").await.len(), 1);
    }
}
