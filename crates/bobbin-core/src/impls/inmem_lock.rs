//! InMemoryLockStore - 共有キャッシュの lock プリミティブ（開発用）
//!
//! Redis の `SET key marker NX PX ttl` / `DEL` / `INCR` と同じ意味を持ちます。
//! 期限は tokio の時計で測るので、テストで `tokio::time::pause` も使えます。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ports::{LockStore, LockStoreError};

#[derive(Debug, Clone)]
struct LockEntry {
    marker: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct InMemoryLockState {
    locks: HashMap<String, LockEntry>,
    counters: HashMap<String, u64>,
}

#[derive(Clone, Default)]
pub struct InMemoryLockStore {
    state: Arc<Mutex<InMemoryLockState>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current live marker for `key`, if any.
    pub async fn holder(&self, key: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .locks
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.marker.clone())
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        marker: &str,
        ttl: Duration,
    ) -> Result<bool, LockStoreError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if let Some(entry) = state.locks.get(key)
            && entry.expires_at > now
        {
            return Ok(false);
        }

        state.locks.insert(
            key.to_string(),
            LockEntry {
                marker: marker.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), LockStoreError> {
        self.state.lock().await.locks.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<u64, LockStoreError> {
        let mut state = self.state.lock().await;
        let counter = state.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}
