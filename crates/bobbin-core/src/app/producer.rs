//! TaskProducer - submission channel への publish
//!
//! - `publish`: broker の受理まで待つ（outbox relay 用）
//! - `send`: 投げっぱなし。結果はログに残すだけで呼び出し側は待たない

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span};

use crate::domain::{CorrelationId, PipelineError, TaskEvent};
use crate::ports::{Message, MessageBroker};

#[derive(Clone)]
pub struct TaskProducer {
    broker: Arc<dyn MessageBroker>,
    channel: String,
}

impl TaskProducer {
    pub fn new(broker: Arc<dyn MessageBroker>, channel: impl Into<String>) -> Self {
        Self {
            broker,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publish keyed by task id and wait for the broker to accept it.
    pub async fn publish(
        &self,
        event: &TaskEvent,
        correlation_id: Option<&CorrelationId>,
    ) -> Result<(), PipelineError> {
        let message = Message::from_event(event, correlation_id).map_err(PipelineError::Publish)?;
        self.broker
            .publish(&self.channel, message)
            .await
            .map_err(PipelineError::Publish)
    }

    /// Fire-and-forget publish. The outcome is only logged.
    pub fn send(&self, event: TaskEvent, correlation_id: Option<CorrelationId>) -> JoinHandle<()> {
        let producer = self.clone();
        let span = info_span!(
            "send",
            task_id = %event.task_id,
            correlation_id = correlation_id.as_ref().map(CorrelationId::as_str).unwrap_or("-"),
        );

        tokio::spawn(
            async move {
                match producer.publish(&event, correlation_id.as_ref()).await {
                    Ok(()) => info!(channel = %producer.channel, "task event published"),
                    Err(err) => error!(channel = %producer.channel, error = %err, "task event publish failed"),
                }
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, TaskType};
    use crate::impls::InMemoryBroker;
    use ulid::Ulid;

    fn event() -> TaskEvent {
        TaskEvent::new(TaskId::from_ulid(Ulid::new()), TaskType::new("DEFAULT"), "p")
    }

    #[tokio::test]
    async fn send_publishes_in_background() {
        let broker = InMemoryBroker::new();
        let producer = TaskProducer::new(Arc::new(broker.clone()), "tasks.main");
        let event = event();

        producer
            .send(event.clone(), Some(CorrelationId::new("c-1")))
            .await
            .unwrap();

        let pending = broker.pending("tasks.main").await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, event.task_id.as_key());
        assert_eq!(pending[0].correlation_id(), Some(CorrelationId::new("c-1")));
    }

    #[tokio::test]
    async fn send_failure_is_swallowed_but_publish_reports_it() {
        let broker = InMemoryBroker::new();
        broker.set_unavailable(true);
        let producer = TaskProducer::new(Arc::new(broker.clone()), "tasks.main");

        // background task completes without panicking
        producer.send(event(), None).await.unwrap();

        let err = producer.publish(&event(), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Publish(_)));
        assert!(broker.pending("tasks.main").await.is_empty());
    }
}
