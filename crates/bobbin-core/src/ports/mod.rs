//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。外部協調者はすべてここの trait 越しに使います。
//!
//! # 設計原則
//! - relational store が source of truth（正本）
//! - broker は at-least-once・key 単位の順序保証のみを前提にする
//! - 共有キャッシュは lock と rate limit bucket の原子操作のみを提供する

pub mod broker;
pub mod bucket_store;
pub mod clock;
pub mod id_generator;
pub mod lock_store;
pub mod task_store;

// 主要な trait を再エクスポート
pub use self::broker::{BrokerError, Message, MessageBroker};
pub use self::bucket_store::{BucketState, BucketStore, BucketStoreError};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::lock_store::{FencingToken, LockStore, LockStoreError};
pub use self::task_store::{Access, StoreError, TaskRepository};
