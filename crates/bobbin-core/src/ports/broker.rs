//! MessageBroker port - submission / retry / dead-letter channel の配送
//!
//! broker に求めるのは at-least-once と「同じ key は順序を保つ」ことだけです。
//! 冪等性は consumer 側（lock + 状態遷移）で担保します。

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

use crate::domain::{CorrelationId, TaskEvent};

pub const HEADER_CORRELATION_ID: &str = "correlationId";
pub const HEADER_ATTEMPT: &str = "attempt";
pub const HEADER_NOT_BEFORE: &str = "notBefore";
pub const HEADER_ORIGINAL_CHANNEL: &str = "originalChannel";
pub const HEADER_EXCEPTION_MESSAGE: &str = "exceptionMessage";
pub const HEADER_EXCEPTION_KIND: &str = "exceptionKind";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("encode failed: {0}")]
    Encode(String),
}

/// A keyed message with string headers and a JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub key: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Message {
    /// Submission message for `event`, keyed by its task id.
    pub fn from_event(
        event: &TaskEvent,
        correlation_id: Option<&CorrelationId>,
    ) -> Result<Self, BrokerError> {
        let body = serde_json::to_vec(event).map_err(|e| BrokerError::Encode(e.to_string()))?;
        let mut headers = BTreeMap::new();
        if let Some(correlation_id) = correlation_id {
            headers.insert(
                HEADER_CORRELATION_ID.to_string(),
                correlation_id.as_str().to_string(),
            );
        }
        Ok(Self {
            key: event.task_id.as_key(),
            headers,
            body,
        })
    }

    pub fn decode_event(&self) -> Result<TaskEvent, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.header(HEADER_CORRELATION_ID).map(CorrelationId::new)
    }

    /// Delivery attempt (1 = submission channel). Missing or malformed means 1.
    pub fn attempt(&self) -> u32 {
        self.header(HEADER_ATTEMPT)
            .and_then(|v| v.parse().ok())
            .filter(|n| *n >= 1)
            .unwrap_or(1)
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.header(HEADER_NOT_BEFORE)
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    pub fn with_not_before(self, at: DateTime<Utc>) -> Self {
        self.with_header(HEADER_NOT_BEFORE, at.timestamp_millis().to_string())
    }
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Append `message` to `channel`. Resolves once the broker has accepted it.
    async fn publish(&self, channel: &str, message: Message) -> Result<(), BrokerError>;

    /// Take the next message from `channel`, waiting up to `timeout`.
    async fn receive(&self, channel: &str, timeout: Duration)
        -> Result<Option<Message>, BrokerError>;
}
