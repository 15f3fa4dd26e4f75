//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてパイプラインを実装します。
//!
//! # 主要コンポーネント
//! - **PipelineBuilder**: 構築とワイヤリング（起動時検証つき）
//! - **TaskService**: ingress 側（作成・参照）
//! - **RateLimiter**: client ごとの token bucket
//! - **DistributedLock**: task 単位の lease 付き相互排他 + fencing token
//! - **TaskConsumer**: 1 delivery attempt の処理
//! - **WorkerGroup / RetryRouter**: channel の消費と retry / dead-letter 振り分け
//! - **OutboxRelay**: outbox 行の配送

pub mod builder;
pub mod consumer;
pub mod lock;
pub mod producer;
pub mod publisher_loop;
pub mod rate_limiter;
pub mod retry;
pub mod runtime;
pub mod task_service;
pub mod task_store;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{Adapters, BuildError, Pipeline, PipelineBuilder, RunningPipeline};
pub use self::consumer::{ConsumeOutcome, TaskConsumer};
pub use self::lock::{DistributedLock, LockGuard};
pub use self::producer::TaskProducer;
pub use self::publisher_loop::{OutboxRelay, RelayStats};
pub use self::rate_limiter::{BucketConfig, RateLimiter};
pub use self::retry::{ChannelTopology, RetryPolicy};
pub use self::runtime::{HandlerRegistry, PayloadMarkerHandler, Runtime, TaskHandler};
pub use self::task_service::{PublishMode, TaskService};
pub use self::task_store::{ReadOnlyRepository, RoutingTaskStore};
pub use self::worker_loop::{RetryRouter, Routed, WorkerGroup, WorkerSettings};
