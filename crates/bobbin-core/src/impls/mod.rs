//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の in-memory 実装を含めます。
//! 本番用の実装（PostgreSQL / Kafka / Redis）は別クレートに置く想定です。
//!
//! # 含まれる実装
//! - **InMemoryTaskRepository**: relational store の代役
//! - **InMemoryBroker**: submission / retry / dead-letter channel
//! - **InMemoryLockStore**: set-if-absent / delete / increment
//! - **InMemoryBucketStore**: rate limit bucket の compare-and-set

pub mod inmem_broker;
pub mod inmem_bucket;
pub mod inmem_lock;
pub mod inmem_store;

// 主要な型を再エクスポート
pub use self::inmem_broker::InMemoryBroker;
pub use self::inmem_bucket::InMemoryBucketStore;
pub use self::inmem_lock::InMemoryLockStore;
pub use self::inmem_store::InMemoryTaskRepository;
