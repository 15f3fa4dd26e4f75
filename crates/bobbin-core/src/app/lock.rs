//! DistributedLock - task 単位の相互排他（lease 付き）
//!
//! # フロー
//! 1. `set_if_absent(key, marker, lease)` で取得（待たない、取れなければ即失敗）
//! 2. `increment("<key>:fence")` で fencing token を採番
//! 3. 本体を実行
//! 4. 成否にかかわらず `delete(key)` で解放
//!
//! 解放は無条件 delete なので、lease 切れ後に別の holder が取った lock を
//! 消してしまう可能性は残ります。書き込み側は fencing token で守ります。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use ulid::Ulid;

use crate::domain::PipelineError;
use crate::ports::{FencingToken, LockStore, LockStoreError};

/// Proof of a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    key: String,
    marker: String,
    token: FencingToken,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn token(&self) -> FencingToken {
        self.token
    }
}

pub fn fence_key(lock_key: &str) -> String {
    format!("{lock_key}:fence")
}

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    /// Identifies this process in lock markers.
    holder_id: String,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn LockStore>, holder_id: impl Into<String>) -> Self {
        Self {
            store,
            holder_id: holder_id.into(),
        }
    }

    /// Try once to take `key` for `lease`. `Ok(None)` means someone else holds it.
    pub async fn acquire(
        &self,
        key: &str,
        lease: Duration,
    ) -> Result<Option<LockGuard>, LockStoreError> {
        let marker = format!("{}:{}", self.holder_id, Ulid::new());
        if !self.store.set_if_absent(key, &marker, lease).await? {
            return Ok(None);
        }

        let token = match self.store.increment(&fence_key(key)).await {
            Ok(value) => FencingToken::new(value),
            Err(err) => {
                // without a token the holder cannot write; give the lock back
                if let Err(release_err) = self.store.delete(key).await {
                    warn!(key, error = %release_err, "failed to release lock after fencing error");
                }
                return Err(err);
            }
        };

        debug!(key, %token, "lock acquired");
        Ok(Some(LockGuard {
            key: key.to_string(),
            marker,
            token,
        }))
    }

    /// Unconditional delete.
    pub async fn release(&self, key: &str) -> Result<(), LockStoreError> {
        self.store.delete(key).await
    }

    /// Run `body` while holding `key`, releasing it whatever `body` returns.
    ///
    /// Fails immediately with `LockContention` when the lock is held elsewhere.
    /// A failed release is logged, not returned: the lease bounds how long the
    /// key stays taken.
    pub async fn execute_with_lock<T, F, Fut>(
        &self,
        key: &str,
        lease: Duration,
        body: F,
    ) -> Result<T, PipelineError>
    where
        F: FnOnce(FencingToken) -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let Some(guard) = self.acquire(key, lease).await? else {
            warn!(key, "could not acquire lock");
            return Err(PipelineError::LockContention {
                key: key.to_string(),
            });
        };

        let result = body(guard.token()).await;

        if let Err(err) = self.release(guard.key()).await {
            warn!(key, error = %err, "lock release failed; lease will expire");
        }
        result
    }
}
