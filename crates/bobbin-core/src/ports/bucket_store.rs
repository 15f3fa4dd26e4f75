//! BucketStore port - rate limit の token bucket を保持する共有キャッシュ
//!
//! 複数の ingress インスタンスが 1 つの上限を共有できるように、
//! bucket の状態は外部ストアに置き、compare-and-set で更新します。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BucketStoreError {
    #[error("bucket store unavailable: {0}")]
    Unavailable(String),
}

/// Remaining tokens and the instant they were last refilled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    pub tokens: f64,
    pub refilled_at: DateTime<Utc>,
}

#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<BucketState>, BucketStoreError>;

    /// Replace the bucket with `next` only if it still equals `expected`
    /// (`None` = the key must be absent). Returns true iff the swap happened.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<BucketState>,
        next: BucketState,
    ) -> Result<bool, BucketStoreError>;
}
