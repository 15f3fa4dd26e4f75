//! bobbin-core
//!
//! Core building blocks for the Bobbin task pipeline.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, task, event, outbox, errors, decision）
//! - **ports**: 抽象化レイヤー（TaskRepository, MessageBroker, LockStore, BucketStore, Clock）
//! - **app**: アプリケーションロジック（builder, task_service, consumer, worker_loop, publisher_loop など）
//! - **impls**: in-memory 実装（開発・テスト用）
//! - **config**: 設定の読み込み
//! - **observability**: tracing subscriber の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
