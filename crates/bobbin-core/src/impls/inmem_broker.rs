//! InMemoryBroker - 開発用の broker
//!
//! # 実装詳細
//! - HashMap<String, VecDeque<Message>> で channel ごとにキューを管理
//! - 1 channel = 1 FIFO なので、同じ key のメッセージ順序も保たれる
//! - publish 時に Notify で待機中の receive を起こす
//!
//! # 使用例
//! ```ignore
//! let broker = InMemoryBroker::new();
//! broker.publish("tasks.main", message).await?;
//! let next = broker.receive("tasks.main", Duration::from_secs(5)).await?;
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::ports::{BrokerError, Message, MessageBroker};

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    /// channel ごとのキュー
    channels: Arc<Mutex<HashMap<String, VecDeque<Message>>>>,
    /// publish 時の通知用
    notify: Arc<Notify>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `publish` fail with `BrokerError::Unavailable` (outage simulation).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of the messages still queued on `channel`.
    pub async fn pending(&self, channel: &str) -> Vec<Message> {
        self.channels
            .lock()
            .await
            .get(channel)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, channel: &str, message: Message) -> Result<(), BrokerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("in-memory broker marked down".into()));
        }
        {
            let mut channels = self.channels.lock().await;
            channels
                .entry(channel.to_string())
                .or_default()
                .push_back(message);
        }
        // 待機中の receive 全員に通知（channel が違う waiter は再度眠る）
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(
        &self,
        channel: &str,
        timeout: Duration,
    ) -> Result<Option<Message>, BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            // publish との競合で通知を取りこぼさないよう、確認前に登録する
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut channels = self.channels.lock().await;
                if let Some(queue) = channels.get_mut(channel)
                    && let Some(message) = queue.pop_front()
                {
                    return Ok(Some(message));
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }
}
