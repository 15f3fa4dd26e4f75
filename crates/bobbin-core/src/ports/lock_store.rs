//! LockStore port - 共有キャッシュ（Redis 相当）の lock プリミティブ
//!
//! core が前提とするのは以下の原子操作のみ：
//! - set-if-absent-with-expiry
//! - delete
//! - increment（fencing token の採番）

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockStoreError {
    #[error("lock store unavailable: {0}")]
    Unavailable(String),
}

/// Monotonically increasing token issued with each successful lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FencingToken(u64);

impl FencingToken {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Set `key` to `marker` with expiry `ttl` only if the key is absent (or expired).
    /// Returns true iff the caller now owns the key.
    async fn set_if_absent(&self, key: &str, marker: &str, ttl: Duration)
        -> Result<bool, LockStoreError>;

    /// Unconditional delete.
    async fn delete(&self, key: &str) -> Result<(), LockStoreError>;

    /// Atomically increment the counter at `key` and return the new value (starts at 1).
    async fn increment(&self, key: &str) -> Result<u64, LockStoreError>;
}
