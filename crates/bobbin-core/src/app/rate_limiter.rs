//! RateLimiter - client ごとの token bucket による受付制御
//!
//! bucket は `BucketStore` に置き、compare-and-set で更新します。
//! 競合したら読み直してやり直すので、複数インスタンスでも上限は共有されます。
//! refill は greedy（経過時間に比例して連続的に補充、capacity で頭打ち）。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::domain::PipelineError;
use crate::ports::{BucketState, BucketStore, Clock};

/// CAS retries before giving up on a hot key.
const MAX_CAS_ATTEMPTS: usize = 16;

/// `capacity` tokens per `refill_period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    pub capacity: u32,
    pub refill_period: Duration,
}

impl BucketConfig {
    fn tokens_per_ms(&self) -> f64 {
        let period_ms = self.refill_period.as_millis().max(1) as f64;
        f64::from(self.capacity) / period_ms
    }

    /// Bucket contents at `now`, starting from `state` (a missing bucket is full).
    fn refill(&self, state: Option<BucketState>, now: DateTime<Utc>) -> f64 {
        let capacity = f64::from(self.capacity);
        match state {
            None => capacity,
            Some(state) => {
                let elapsed_ms = (now - state.refilled_at).num_milliseconds().max(0) as f64;
                (state.tokens + elapsed_ms * self.tokens_per_ms()).min(capacity)
            }
        }
    }

    /// Time until `tokens` grows to one whole token.
    fn wait_for_one(&self, tokens: f64) -> Duration {
        let missing = (1.0 - tokens).max(0.0);
        let ms = (missing / self.tokens_per_ms()).ceil();
        Duration::from_millis(ms as u64)
    }
}

pub fn bucket_key(client: &str) -> String {
    format!("ratelimit:{client}")
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
    config: BucketConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn BucketStore>, clock: Arc<dyn Clock>, config: BucketConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> BucketConfig {
        self.config
    }

    /// Consume one token for `client`, or fail with `RateLimited`.
    pub async fn try_acquire(&self, client: &str) -> Result<(), PipelineError> {
        let key = bucket_key(client);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let now = self.clock.now();
            let current = self.store.get(&key).await?;
            let tokens = self.config.refill(current, now);

            if tokens < 1.0 {
                let retry_after = self.config.wait_for_one(tokens);
                debug!(client, tokens, ?retry_after, "rate limited");
                return Err(PipelineError::RateLimited {
                    client: client.to_string(),
                    retry_after,
                });
            }

            let next = BucketState {
                tokens: tokens - 1.0,
                refilled_at: now,
            };
            if self.store.compare_and_set(&key, current, next).await? {
                return Ok(());
            }
        }

        // lost every race: treat as saturated rather than over-admitting
        warn!(client, "bucket update kept conflicting");
        Err(PipelineError::RateLimited {
            client: client.to_string(),
            retry_after: self.config.wait_for_one(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryBucketStore;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn limiter(clock: Arc<FixedClock>) -> RateLimiter {
        RateLimiter::new(
            Arc::new(InMemoryBucketStore::new()),
            clock,
            BucketConfig {
                capacity: 5,
                refill_period: Duration::from_secs(60),
            },
        )
    }

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn ten_immediate_requests_admit_exactly_five() {
        let limiter = limiter(clock());

        let mut admitted = 0;
        let mut limited = 0;
        for _ in 0..10 {
            match limiter.try_acquire("client-a").await {
                Ok(()) => admitted += 1,
                Err(PipelineError::RateLimited { client, .. }) => {
                    assert_eq!(client, "client-a");
                    limited += 1;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(admitted, 5);
        assert_eq!(limited, 5);
    }

    #[tokio::test]
    async fn tokens_come_back_with_time() {
        let clock = clock();
        let limiter = limiter(clock.clone());
        for _ in 0..5 {
            limiter.try_acquire("c").await.unwrap();
        }

        let err = limiter.try_acquire("c").await.unwrap_err();
        let PipelineError::RateLimited { retry_after, .. } = err else {
            panic!("expected rate limit, got {err}");
        };
        // one token every 12s
        assert_eq!(retry_after, Duration::from_secs(12));

        clock.advance(chrono::Duration::seconds(12));
        limiter.try_acquire("c").await.unwrap();
        assert!(limiter.try_acquire("c").await.is_err());
    }

    #[tokio::test]
    async fn refill_never_exceeds_capacity() {
        let clock = clock();
        let limiter = limiter(clock.clone());
        limiter.try_acquire("c").await.unwrap();

        clock.advance(chrono::Duration::hours(1));

        let admitted = {
            let mut n = 0;
            while limiter.try_acquire("c").await.is_ok() {
                n += 1;
            }
            n
        };
        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn clients_have_independent_buckets() {
        let limiter = limiter(clock());
        for _ in 0..5 {
            limiter.try_acquire("a").await.unwrap();
        }
        assert!(limiter.try_acquire("a").await.is_err());
        assert!(limiter.try_acquire("b").await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_limit() {
        let limiter = limiter(clock());

        let joins: Vec<_> = (0..10)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.try_acquire("shared").await.is_ok() })
            })
            .collect();

        let mut admitted = 0;
        for join in joins {
            if join.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }
}
