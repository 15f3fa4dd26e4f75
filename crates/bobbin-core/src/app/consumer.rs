//! TaskConsumer - 1 delivery attempt の処理
//!
//! # フロー
//! 1. correlation id をヘッダから取り出す（無ければこの attempt 用に採番）
//! 2. `lock:task:<id>` を lease 付きで取得（取れなければ LockContention で即失敗）
//! 3. lock 内で Task を primary から読む（無ければ NotFound、リトライしない）
//! 4. SUCCESS なら何もしない（冪等）
//! 5. handler を実行
//! 6. 成功: SUCCESS にして保存
//! 7. 失敗: FAILED + retryCount++ を保存してからエラーを返す（broker 側リトライへ）
//!
//! 保存は fencing token と読み込み時の version 付き。lease 切れで追い越された holder の
//! 書き込みは拒否されます。既に SUCCESS になっていれば Skipped として扱います。

use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, debug, info, info_span, warn};

use crate::domain::{CorrelationId, PipelineError, TaskStatus};
use crate::ports::{Access, Clock, Message, StoreError};

use super::lock::DistributedLock;
use super::runtime::Runtime;
use super::task_store::RoutingTaskStore;

/// What one delivery attempt did to its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The task was already SUCCESS; the body did not run.
    Skipped,
    /// The body ran and the task is now SUCCESS.
    Succeeded,
}

#[derive(Clone)]
pub struct TaskConsumer {
    store: RoutingTaskStore,
    lock: DistributedLock,
    runtime: Runtime,
    clock: Arc<dyn Clock>,
    lease: Duration,
}

impl TaskConsumer {
    pub fn new(
        store: RoutingTaskStore,
        lock: DistributedLock,
        runtime: Runtime,
        clock: Arc<dyn Clock>,
        lease: Duration,
    ) -> Self {
        Self {
            store,
            lock,
            runtime,
            clock,
            lease,
        }
    }

    /// Process one delivery. An `Err` means the attempt failed and the
    /// caller decides between retry and dead letter.
    pub async fn handle(&self, message: &Message) -> Result<ConsumeOutcome, PipelineError> {
        let correlation_id = message
            .correlation_id()
            .unwrap_or_else(CorrelationId::generate);

        let span = info_span!(
            "consume",
            correlation_id = %correlation_id,
            key = %message.key,
            attempt = message.attempt(),
        );
        self.process(message).instrument(span).await
    }

    async fn process(&self, message: &Message) -> Result<ConsumeOutcome, PipelineError> {
        let event = message
            .decode_event()
            .map_err(|e| PipelineError::Decode(e.to_string()))?;
        let handler = self.runtime.handler_for(&event.task_type)?;
        let repository = self.store.route(Access::ReadWrite);
        let task_id = event.task_id;

        self.lock
            .execute_with_lock(&event.lock_key(), self.lease, |fence| async move {
                let mut task = repository
                    .find_by_id(task_id)
                    .await?
                    .ok_or(PipelineError::NotFound(task_id))?;

                if task.status == TaskStatus::Success {
                    debug!(%task_id, "task already succeeded; skipping");
                    return Ok(ConsumeOutcome::Skipped);
                }

                match handler.execute(&task).await {
                    Ok(()) => {
                        task.mark_succeeded(self.clock.now())?;
                        match repository.update(&task, fence).await {
                            Err(StoreError::AlreadySucceeded(_)) => {
                                debug!(%task_id, "another holder already succeeded");
                                Ok(ConsumeOutcome::Skipped)
                            }
                            Err(err) => Err(err.into()),
                            Ok(()) => {
                                info!(%task_id, %fence, "task succeeded");
                                Ok(ConsumeOutcome::Succeeded)
                            }
                        }
                    }
                    Err(source) => {
                        task.mark_failed(self.clock.now())?;
                        // persisted before the failure is signalled
                        match repository.update(&task, fence).await {
                            Err(StoreError::AlreadySucceeded(_)) => {
                                debug!(%task_id, error = %source, "failure discarded: another holder already succeeded");
                                Ok(ConsumeOutcome::Skipped)
                            }
                            Err(err) => Err(err.into()),
                            Ok(()) => {
                                warn!(%task_id, retry_count = task.retry_count, error = %source, "task failed");
                                Err(PipelineError::Execution { task_id, source })
                            }
                        }
                    }
                }
            })
            .await
    }
}
