//! Outbox entry: a pending announcement written in the same unit of work as its Task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CorrelationId, OutboxId, TaskEvent};

/// A row of the transactional outbox.
///
/// Lives until the relay has a confirmed publish, then is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: OutboxId,
    pub event: TaskEvent,
    pub correlation_id: Option<CorrelationId>,
    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    pub fn new(
        id: OutboxId,
        event: TaskEvent,
        correlation_id: Option<CorrelationId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event,
            correlation_id,
            created_at,
        }
    }
}
