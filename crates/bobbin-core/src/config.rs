//! Configuration - 設定の読み込み
//!
//! 優先順位（後勝ち）:
//! 1. 各フィールドの既定値
//! 2. 設定ファイル（拡張子で YAML / TOML / JSON を判定）
//! 3. 環境変数 `BOBBIN__<SECTION>__<KEY>`（例: `BOBBIN__RETRY__MAX_ATTEMPTS=6`）

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::app::rate_limiter::BucketConfig;
use crate::app::retry::{ChannelTopology, RetryPolicy};
use crate::observability::LogFormat;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BobbinConfig {
    pub channels: ChannelsConfig,
    pub retry: RetryConfig,
    pub lock: LockConfig,
    pub rate_limit: RateLimitConfig,
    pub consumer: ConsumerConfig,
    pub outbox: OutboxConfig,
    pub http: HttpConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub submission: String,
    pub retry_suffix: String,
    pub dead_letter_suffix: String,
    /// taskType stamped on events created by the ingress path.
    pub task_type: String,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            submission: "tasks.main".to_string(),
            retry_suffix: "-retry".to_string(),
            dead_letter_suffix: "-dlt".to_string(),
            task_type: "DEFAULT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub lease_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { lease_ms: 300_000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub capacity: u32,
    pub refill_period_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 5,
            refill_period_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Workers per channel (submission and each retry channel).
    pub concurrency: usize,
    pub poll_timeout_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub enabled: bool,
    pub batch_size: usize,
    pub poll_interval_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 100,
            poll_interval_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    /// Key rate limits on `X-Client-Id` instead of the peer address.
    /// Only for deployments behind a proxy that sets the header itself.
    pub trust_client_id_header: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            trust_client_id_header: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
}

impl BobbinConfig {
    /// Load defaults, then `path` (if any), then `BOBBIN__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("BOBBIN")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: BobbinConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be >= 1".into()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid("retry.multiplier must be >= 1.0".into()));
        }
        if self.rate_limit.capacity == 0 || self.rate_limit.refill_period_ms == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.capacity and rate_limit.refill_period_ms must be > 0".into(),
            ));
        }
        if self.consumer.concurrency == 0 || self.consumer.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "consumer.concurrency and consumer.poll_timeout_ms must be > 0".into(),
            ));
        }
        if self.outbox.batch_size == 0 {
            return Err(ConfigError::Invalid("outbox.batch_size must be > 0".into()));
        }
        if self.lock.lease_ms == 0 {
            return Err(ConfigError::Invalid("lock.lease_ms must be > 0".into()));
        }
        if self.channels.submission.trim().is_empty() {
            return Err(ConfigError::Invalid("channels.submission must not be empty".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            multiplier: self.retry.multiplier,
            max_delay: self.retry.max_delay_ms.map(Duration::from_millis),
        }
    }

    pub fn topology(&self) -> ChannelTopology {
        ChannelTopology::new(
            &self.channels.submission,
            &self.channels.retry_suffix,
            &self.channels.dead_letter_suffix,
            self.retry.max_attempts,
        )
    }

    pub fn bucket(&self) -> BucketConfig {
        BucketConfig {
            capacity: self.rate_limit.capacity,
            refill_period: Duration::from_millis(self.rate_limit.refill_period_ms),
        }
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_millis(self.lock.lease_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.consumer.poll_timeout_ms)
    }

    pub fn outbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.outbox.poll_interval_ms)
    }
}
