//! Decision model: what the retry layer does with a failed delivery attempt.
//!
//! Deciders are pure: given the attempt number and the failure, they return
//! the next action. Publishing to the retry or dead-letter channel is done by
//! the worker loop.

use std::time::Duration;

use super::errors::PipelineError;
use crate::app::retry::RetryPolicy;

/// The next action for a failed delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Redeliver on the retry channel for `next_attempt` after `delay`.
    Retry {
        next_attempt: u32,
        delay: Duration,
        reason: String,
    },

    /// Give up and route the event to the dead-letter channel.
    DeadLetter { reason: String },
}

/// Trait for deciding the next action for a failed delivery attempt.
pub trait Decider: Send + Sync {
    /// # Arguments
    /// * `attempt` - The attempt that just failed (1-indexed; 1 = submission channel)
    /// * `error` - Why it failed
    fn decide(&self, attempt: u32, error: &PipelineError) -> Decision;
}

/// Attempt-bounded exponential backoff:
/// - Permanent errors go straight to the dead-letter channel
/// - Retry while attempt < max_attempts
/// - Dead-letter once attempt >= max_attempts
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, attempt: u32, error: &PipelineError) -> Decision {
        if !error.is_retryable() {
            return Decision::DeadLetter {
                reason: format!("non-retryable ({}): {error}", error.kind().as_str()),
            };
        }

        let max_attempts = self.retry_policy.max_attempts;
        if attempt >= max_attempts {
            Decision::DeadLetter {
                reason: PipelineError::RetryExhausted { attempts: attempt }.to_string(),
            }
        } else {
            let delay = self.retry_policy.next_delay(attempt);
            Decision::Retry {
                next_attempt: attempt + 1,
                delay,
                reason: format!(
                    "retry attempt {}/{} after {:?}: {error}",
                    attempt + 1,
                    max_attempts,
                    delay
                ),
            }
        }
    }
}
