//! Retry policy and channel topology for the broker-level retry chain.

use std::time::Duration;

/// Retry policy for failed deliveries.
///
/// `max_attempts` counts every delivery, including the first one on the
/// submission channel.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    /// 4 attempts, 1s doubling.
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before redelivering a message whose attempt `attempts` just failed.
    ///
    /// delay = base_delay * multiplier^(attempts - 1), capped at `max_delay`.
    ///
    /// Example with base_delay=1s, multiplier=2.0:
    /// - attempt 1 (submission channel) failed: 1s
    /// - attempt 2: 2s
    /// - attempt 3: 4s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        let delay = Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// Names of the submission, retry and dead-letter channels.
///
/// Retry channels are attempt-indexed: the message for attempt `n` (n >= 2)
/// travels on `<submission><retry_suffix>-<n-2>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTopology {
    submission: String,
    retries: Vec<String>,
    dead_letter: String,
}

impl ChannelTopology {
    pub fn new(submission: &str, retry_suffix: &str, dead_letter_suffix: &str, max_attempts: u32) -> Self {
        let retries = (0..max_attempts.saturating_sub(1))
            .map(|index| format!("{submission}{retry_suffix}-{index}"))
            .collect();
        Self {
            submission: submission.to_string(),
            retries,
            dead_letter: format!("{submission}{dead_letter_suffix}"),
        }
    }

    pub fn submission(&self) -> &str {
        &self.submission
    }

    pub fn dead_letter(&self) -> &str {
        &self.dead_letter
    }

    pub fn retries(&self) -> &[String] {
        &self.retries
    }

    /// Channel carrying delivery `attempt` (1-indexed). None past the last retry.
    pub fn channel_for_attempt(&self, attempt: u32) -> Option<&str> {
        match attempt {
            0 => None,
            1 => Some(&self.submission),
            n => self.retries.get((n - 2) as usize).map(String::as_str),
        }
    }

    /// Every channel a consumer group must listen on.
    pub fn consumed_channels(&self) -> Vec<String> {
        std::iter::once(self.submission.clone())
            .chain(self.retries.iter().cloned())
            .collect()
    }
}
