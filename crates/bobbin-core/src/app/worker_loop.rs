//! WorkerGroup - submission / retry channel を消費するワーカー群
//!
//! # フロー（1 メッセージ）
//! 1. `receive` で取り出す（shutdown と競合させる）
//! 2. `notBefore` まで待つ（retry channel の backoff）
//! 3. `TaskConsumer::handle`
//! 4. 失敗したら Decider に聞いて、次の retry channel か dead-letter channel へ publish
//!
//! broker 側の attempt 数は `attempt` ヘッダで数え、Task の retryCount とは独立です。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::domain::{Decider, Decision, PipelineError};
use crate::ports::broker::{
    HEADER_ATTEMPT, HEADER_EXCEPTION_KIND, HEADER_EXCEPTION_MESSAGE, HEADER_ORIGINAL_CHANNEL,
};
use crate::ports::{Clock, Message, MessageBroker};

use super::consumer::TaskConsumer;
use super::retry::ChannelTopology;

/// Where a failed delivery was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Retry { channel: String, attempt: u32 },
    DeadLetter { channel: String },
}

/// Publishes failed deliveries to the next retry channel or the dead-letter channel.
#[derive(Clone)]
pub struct RetryRouter {
    broker: Arc<dyn MessageBroker>,
    decider: Arc<dyn Decider>,
    topology: ChannelTopology,
    clock: Arc<dyn Clock>,
}

impl RetryRouter {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        decider: Arc<dyn Decider>,
        topology: ChannelTopology,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            broker,
            decider,
            topology,
            clock,
        }
    }

    pub fn topology(&self) -> &ChannelTopology {
        &self.topology
    }

    /// `message` failed on `channel` with `err`. The payload is forwarded unchanged.
    pub async fn route_failure(
        &self,
        channel: &str,
        message: Message,
        err: &PipelineError,
    ) -> Result<Routed, PipelineError> {
        let attempt = message.attempt();
        let retry = match self.decider.decide(attempt, err) {
            Decision::Retry {
                next_attempt,
                delay,
                reason,
            } => self
                .topology
                .channel_for_attempt(next_attempt)
                .map(|next| (next.to_string(), next_attempt, delay, reason)),
            Decision::DeadLetter { reason } => {
                debug!(%reason, "dead-lettering");
                None
            }
        };

        match retry {
            Some((next_channel, next_attempt, delay, reason)) => {
                let now = self.clock.now();
                let due = chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|delay| now.checked_add_signed(delay))
                    .unwrap_or(now);
                let forwarded = message
                    .with_header(HEADER_ATTEMPT, next_attempt.to_string())
                    .with_not_before(due);
                self.broker
                    .publish(&next_channel, forwarded)
                    .await
                    .map_err(PipelineError::Publish)?;
                info!(channel = %next_channel, attempt = next_attempt, %reason, "scheduled retry");
                Ok(Routed::Retry {
                    channel: next_channel,
                    attempt: next_attempt,
                })
            }
            None => {
                let dead_letter = self.topology.dead_letter().to_string();
                let forwarded = message
                    .with_header(HEADER_ORIGINAL_CHANNEL, channel)
                    .with_header(HEADER_EXCEPTION_MESSAGE, err.to_string())
                    .with_header(HEADER_EXCEPTION_KIND, err.kind().as_str());
                self.broker
                    .publish(&dead_letter, forwarded)
                    .await
                    .map_err(PipelineError::Publish)?;
                warn!(channel = %dead_letter, attempt, error = %err, "routed to dead letter");
                Ok(Routed::DeadLetter {
                    channel: dead_letter,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Workers per consumed channel.
    pub concurrency: usize,
    pub poll_timeout: Duration,
}

/// Worker group handle.
/// - `request_shutdown` stops every worker from taking new messages
/// - `shutdown_and_join` also waits for in-flight attempts
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `settings.concurrency` workers on every channel of the router's topology.
    pub fn spawn(
        consumer: Arc<TaskConsumer>,
        broker: Arc<dyn MessageBroker>,
        router: RetryRouter,
        settings: WorkerSettings,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let channels = router.topology().consumed_channels();
        let router = Arc::new(router);

        let mut joins = Vec::with_capacity(channels.len() * settings.concurrency);
        for channel in channels {
            for index in 0..settings.concurrency {
                let worker = Worker {
                    channel: channel.clone(),
                    consumer: Arc::clone(&consumer),
                    broker: Arc::clone(&broker),
                    router: Arc::clone(&router),
                    poll_timeout: settings.poll_timeout,
                };
                let rx = shutdown_rx.clone();
                let span = info_span!("worker", channel = %channel, index);
                joins.push(tokio::spawn(worker.run(rx).instrument(span)));
            }
        }

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// In-flight attempts are not cancelled.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker task ended abnormally");
            }
        }
    }
}

struct Worker {
    channel: String,
    consumer: Arc<TaskConsumer>,
    broker: Arc<dyn MessageBroker>,
    router: Arc<RetryRouter>,
    poll_timeout: Duration,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!("worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // group handle dropped
                        break;
                    }
                    continue;
                }
                received = self.broker.receive(&self.channel, self.poll_timeout) => received,
            };

            let message = match received {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(err) => {
                    warn!(error = %err, "receive failed");
                    tokio::time::sleep(self.poll_timeout).await;
                    continue;
                }
            };

            if !self.wait_until_due(&message, &mut shutdown).await {
                // hand it back so the next run picks it up
                if let Err(err) = self.broker.publish(&self.channel, message).await {
                    error!(error = %err, "could not requeue message on shutdown");
                }
                break;
            }

            self.process(message).await;
        }
        debug!("worker stopped");
    }

    /// Sleep until the message's `notBefore`. False if shutdown came first.
    async fn wait_until_due(&self, message: &Message, shutdown: &mut watch::Receiver<bool>) -> bool {
        let Some(due) = message.not_before() else {
            return true;
        };
        let Ok(wait) = (due - self.router.clock.now()).to_std() else {
            // already due
            return true;
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => true,
            _ = shutdown.wait_for(|stop| *stop) => false,
        }
    }

    async fn process(&self, message: Message) {
        let result = self.consumer.handle(&message).await;
        let Err(err) = result else {
            return;
        };

        if let Err(route_err) = self.router.route_failure(&self.channel, message, &err).await {
            error!(error = %route_err, cause = %err, "failed to route failed delivery");
        }
    }
}
