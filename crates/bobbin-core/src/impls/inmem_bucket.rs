//! InMemoryBucketStore - rate limit bucket を保持する共有キャッシュ（開発用）

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::ports::{BucketState, BucketStore, BucketStoreError};

#[derive(Clone, Default)]
pub struct InMemoryBucketStore {
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
}

impl InMemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BucketStore for InMemoryBucketStore {
    async fn get(&self, key: &str) -> Result<Option<BucketState>, BucketStoreError> {
        Ok(self.buckets.lock().await.get(key).copied())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<BucketState>,
        next: BucketState,
    ) -> Result<bool, BucketStoreError> {
        let mut buckets = self.buckets.lock().await;
        if buckets.get(key).copied() != expected {
            return Ok(false);
        }
        buckets.insert(key.to_string(), next);
        Ok(true)
    }
}
