//! PipelineBuilder - パイプラインの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - `expect_task_types()` で期待される task_type を登録
//! - ingress が付ける task_type（`channels.task_type`）も暗黙に期待集合へ入る
//! - `build()` 時に「期待集合 ⊆ 登録済み集合」と設定値をチェックし、不足があれば BuildError

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use ulid::Ulid;

use crate::config::{BobbinConfig, ConfigError};
use crate::domain::{DefaultDecider, PipelineError, TaskType};
use crate::impls::{InMemoryBroker, InMemoryBucketStore, InMemoryLockStore, InMemoryTaskRepository};
use crate::ports::{
    BucketStore, Clock, LockStore, MessageBroker, SystemClock, TaskRepository, UlidGenerator,
};

use super::consumer::TaskConsumer;
use super::lock::DistributedLock;
use super::producer::TaskProducer;
use super::publisher_loop::OutboxRelay;
use super::rate_limiter::RateLimiter;
use super::runtime::{HandlerRegistry, Runtime, TaskHandler};
use super::task_service::{PublishMode, TaskService};
use super::task_store::RoutingTaskStore;
use super::worker_loop::{RetryRouter, WorkerGroup, WorkerSettings};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<TaskType>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// External collaborators the pipeline runs on.
#[derive(Clone)]
pub struct Adapters {
    pub primary: Arc<dyn TaskRepository>,
    pub replica: Arc<dyn TaskRepository>,
    pub broker: Arc<dyn MessageBroker>,
    pub locks: Arc<dyn LockStore>,
    pub buckets: Arc<dyn BucketStore>,
}

impl Adapters {
    /// Everything in process; the replica shares the primary's rows.
    pub fn in_memory() -> Self {
        let repository = Arc::new(InMemoryTaskRepository::new());
        Self {
            primary: repository.clone(),
            replica: repository,
            broker: Arc::new(InMemoryBroker::new()),
            locks: Arc::new(InMemoryLockStore::new()),
            buckets: Arc::new(InMemoryBucketStore::new()),
        }
    }
}

/// # 使用例
/// ```ignore
/// let pipeline = PipelineBuilder::new(config)
///     .register(TaskType::new("DEFAULT"), Arc::new(PayloadMarkerHandler::default()))?
///     .expect_task_types(&["DEFAULT"])
///     .build()?;
/// ```
pub struct PipelineBuilder {
    config: BobbinConfig,
    registry: HandlerRegistry,
    expected: Vec<TaskType>,
    adapters: Option<Adapters>,
    clock: Arc<dyn Clock>,
    holder_id: Option<String>,
}

impl PipelineBuilder {
    pub fn new(config: BobbinConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
            expected: Vec::new(),
            adapters: None,
            clock: Arc::new(SystemClock),
            holder_id: None,
        }
    }

    pub fn register(
        mut self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self, PipelineError> {
        self.registry.register(task_type, handler)?;
        Ok(self)
    }

    pub fn expect_task_types(mut self, task_types: &[&str]) -> Self {
        self.expected = task_types.iter().map(|t| TaskType::new(*t)).collect();
        self
    }

    /// Defaults to `Adapters::in_memory()`.
    pub fn with_adapters(mut self, adapters: Adapters) -> Self {
        self.adapters = Some(adapters);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Name written into lock markers. Defaults to a random `bobbin-<ulid>`.
    pub fn with_holder_id(mut self, holder_id: impl Into<String>) -> Self {
        self.holder_id = Some(holder_id.into());
        self
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        self.config.validate()?;

        let ingress_type = TaskType::new(self.config.channels.task_type.clone());
        let registered = self.registry.registered_types();
        let mut missing: Vec<TaskType> = self
            .expected
            .iter()
            .chain(std::iter::once(&ingress_type))
            .filter(|t| !registered.contains(t))
            .cloned()
            .collect();
        missing.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        missing.dedup();
        if !missing.is_empty() {
            return Err(BuildError::MissingTaskTypes(missing));
        }

        let adapters = self.adapters.unwrap_or_else(Adapters::in_memory);
        let clock = self.clock;
        let store = RoutingTaskStore::new(adapters.primary.clone(), adapters.replica.clone());
        let topology = self.config.topology();
        let producer = TaskProducer::new(adapters.broker.clone(), topology.submission());

        let mode = if self.config.outbox.enabled {
            PublishMode::Outbox
        } else {
            PublishMode::Direct
        };
        let service = TaskService::new(
            store.clone(),
            producer.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
            clock.clone(),
            ingress_type,
            mode,
        );

        let holder_id = self
            .holder_id
            .unwrap_or_else(|| format!("bobbin-{}", Ulid::new().to_string().to_lowercase()));
        let consumer = TaskConsumer::new(
            store.clone(),
            DistributedLock::new(adapters.locks.clone(), holder_id),
            Runtime::new(Arc::new(self.registry)),
            clock.clone(),
            self.config.lock_lease(),
        );

        let router = RetryRouter::new(
            adapters.broker.clone(),
            Arc::new(DefaultDecider::new(self.config.retry_policy())),
            topology,
            clock.clone(),
        );

        let relay = self.config.outbox.enabled.then(|| {
            Arc::new(OutboxRelay::new(
                store.primary().clone(),
                producer,
                self.config.outbox.batch_size,
                self.config.outbox_poll_interval(),
            ))
        });

        let rate_limiter = self.config.rate_limit.enabled.then(|| {
            RateLimiter::new(adapters.buckets.clone(), clock.clone(), self.config.bucket())
        });

        info!(
            submission = router.topology().submission(),
            max_attempts = self.config.retry.max_attempts,
            outbox = self.config.outbox.enabled,
            rate_limit = self.config.rate_limit.enabled,
            "pipeline built"
        );

        Ok(Pipeline {
            config: self.config,
            service,
            consumer: Arc::new(consumer),
            router,
            relay,
            rate_limiter,
            broker: adapters.broker,
        })
    }
}

/// A wired pipeline. `start` runs its background parts.
pub struct Pipeline {
    config: BobbinConfig,
    service: TaskService,
    consumer: Arc<TaskConsumer>,
    router: RetryRouter,
    relay: Option<Arc<OutboxRelay>>,
    rate_limiter: Option<RateLimiter>,
    broker: Arc<dyn MessageBroker>,
}

impl Pipeline {
    pub fn config(&self) -> &BobbinConfig {
        &self.config
    }

    pub fn task_service(&self) -> &TaskService {
        &self.service
    }

    /// None when rate limiting is disabled.
    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }

    pub fn consumer(&self) -> &Arc<TaskConsumer> {
        &self.consumer
    }

    pub fn router(&self) -> &RetryRouter {
        &self.router
    }

    pub fn relay(&self) -> Option<&Arc<OutboxRelay>> {
        self.relay.as_ref()
    }

    /// Start the worker group and, in outbox mode, the relay.
    pub fn start(&self) -> RunningPipeline {
        let workers = WorkerGroup::spawn(
            self.consumer.clone(),
            self.broker.clone(),
            self.router.clone(),
            WorkerSettings {
                concurrency: self.config.consumer.concurrency,
                poll_timeout: self.config.poll_timeout(),
            },
        );

        let (relay_tx, relay_rx) = watch::channel(false);
        let relay = self.relay.clone().map(|relay| {
            tokio::spawn(async move { relay.run(relay_rx).await })
        });

        info!(workers = workers.len(), relay = relay.is_some(), "pipeline started");
        RunningPipeline {
            workers,
            relay,
            relay_tx,
        }
    }
}

/// Background tasks of a started pipeline.
pub struct RunningPipeline {
    workers: WorkerGroup,
    relay: Option<JoinHandle<()>>,
    relay_tx: watch::Sender<bool>,
}

impl RunningPipeline {
    /// Stop the relay first so nothing new is published, then drain the workers.
    pub async fn shutdown(self) {
        let _ = self.relay_tx.send(true);
        if let Some(relay) = self.relay
            && let Err(err) = relay.await
        {
            tracing::error!(error = %err, "outbox relay ended abnormally");
        }
        self.workers.shutdown_and_join().await;
        info!("pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::runtime::PayloadMarkerHandler;
    use crate::domain::{CorrelationId, TaskStatus};
    use std::time::Duration;

    fn config() -> BobbinConfig {
        let mut config = BobbinConfig::default();
        config.retry.base_delay_ms = 5;
        config.consumer.poll_timeout_ms = 20;
        config.outbox.poll_interval_ms = 10;
        config
    }

    fn builder() -> PipelineBuilder {
        PipelineBuilder::new(config())
            .register(TaskType::new("DEFAULT"), Arc::new(PayloadMarkerHandler::default()))
            .unwrap()
    }

    #[test]
    fn build_succeeds_when_expected_types_are_registered() {
        assert!(builder().expect_task_types(&["DEFAULT"]).build().is_ok());
    }

    #[test]
    fn build_fails_on_missing_expected_type() {
        let result = builder().expect_task_types(&["DEFAULT", "REPORT"]).build();
        assert!(matches!(
            result,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec![TaskType::new("REPORT")]
        ));
    }

    #[test]
    fn ingress_task_type_must_have_a_handler() {
        let result = PipelineBuilder::new(config()).build();
        assert!(matches!(
            result,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec![TaskType::new("DEFAULT")]
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = config();
        config.retry.max_attempts = 0;
        let result = PipelineBuilder::new(config)
            .register(TaskType::new("DEFAULT"), Arc::new(PayloadMarkerHandler::default()))
            .unwrap()
            .build();
        assert!(matches!(result, Err(BuildError::Config(_))));
    }

    #[test]
    fn optional_parts_follow_config() {
        let mut config = config();
        config.outbox.enabled = false;
        config.rate_limit.enabled = false;
        let pipeline = PipelineBuilder::new(config)
            .register(TaskType::new("DEFAULT"), Arc::new(PayloadMarkerHandler::default()))
            .unwrap()
            .build()
            .unwrap();

        assert!(pipeline.relay().is_none());
        assert!(pipeline.rate_limiter().is_none());
        assert_eq!(pipeline.task_service().mode(), PublishMode::Direct);
    }

    #[tokio::test]
    async fn end_to_end_success_and_failure() {
        let broker = InMemoryBroker::new();
        let adapters = Adapters {
            broker: Arc::new(broker.clone()),
            ..Adapters::in_memory()
        };
        let pipeline = builder().with_adapters(adapters).build().unwrap();
        let running = pipeline.start();
        let service = pipeline.task_service();

        let ok = service.create_task("hello", &CorrelationId::generate()).await.unwrap();
        let bad = service.create_task("please fail", &CorrelationId::generate()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let ok_done = service.get_task_consistent(ok.id).await.unwrap().status
                    == TaskStatus::Success;
                let dead = broker.pending("tasks.main-dlt").await.len();
                if ok_done && dead == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("pipeline settles");
        running.shutdown().await;

        let failed = service.get_task_consistent(bad.id).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.retry_count, 4);
    }

    #[tokio::test]
    async fn single_attempt_failure_is_recorded_once_and_dead_lettered() {
        let mut config = config();
        config.retry.max_attempts = 1;
        let broker = InMemoryBroker::new();
        let adapters = Adapters {
            broker: Arc::new(broker.clone()),
            ..Adapters::in_memory()
        };
        let pipeline = PipelineBuilder::new(config)
            .register(TaskType::new("DEFAULT"), Arc::new(PayloadMarkerHandler::default()))
            .unwrap()
            .with_adapters(adapters)
            .build()
            .unwrap();
        let running = pipeline.start();
        let service = pipeline.task_service();

        let bad = service
            .create_task("contains-fail-marker", &CorrelationId::generate())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while broker.pending("tasks.main-dlt").await.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("failure reaches the dead letter channel");
        running.shutdown().await;

        let failed = service.get_task_consistent(bad.id).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(broker.pending("tasks.main-dlt").await.len(), 1);
        assert!(broker.pending("tasks.main-retry-0").await.is_empty());
    }
}
