//! Errors - エラー型と分類
//!
//! 各 port は自分のエラー型を持ち、`PipelineError` がそれを包みます。
//! リトライ判定は `ErrorKind` だけを見ます。

use std::time::Duration;

use thiserror::Error;

use super::task::TransitionError;
use super::{TaskId, TaskType};
use crate::ports::{BrokerError, BucketStoreError, LockStoreError, StoreError};

/// Operational classification of a failure.
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味、dead letter へ直行）
/// - Infrastructure: インフラエラー（store / broker / cache の障害、リトライ対象）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Permanent)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

/// Failure raised by a task body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionError {
    message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("lock already held for key: {key}")]
    LockContention { key: String },

    #[error("task {task_id} failed: {source}")]
    Execution {
        task_id: TaskId,
        #[source]
        source: ExecutionError,
    },

    #[error("retry attempts exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    #[error("publish failed: {0}")]
    Publish(#[source] BrokerError),

    #[error("rate limited: client={client} retry_after={retry_after:?}")]
    RateLimited {
        client: String,
        retry_after: Duration,
    },

    #[error("handler not found for task_type={0}")]
    HandlerNotFound(TaskType),

    #[error("duplicate handler for task_type={0}")]
    DuplicateHandler(TaskType),

    #[error("malformed message: {0}")]
    Decode(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    LockStore(#[from] LockStoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    BucketStore(#[from] BucketStoreError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NotFound(_)
            | PipelineError::Validation(_)
            | PipelineError::RetryExhausted { .. }
            | PipelineError::HandlerNotFound(_)
            | PipelineError::DuplicateHandler(_)
            | PipelineError::Decode(_)
            | PipelineError::Transition(_) => ErrorKind::Permanent,

            PipelineError::LockContention { .. }
            | PipelineError::Execution { .. }
            | PipelineError::RateLimited { .. } => ErrorKind::Transient,

            // superseded or outdated copy; the next delivery re-reads the row
            PipelineError::Store(
                StoreError::StaleFence { .. }
                | StoreError::VersionConflict { .. }
                | StoreError::AlreadySucceeded(_),
            ) => ErrorKind::Transient,

            PipelineError::Publish(_)
            | PipelineError::Store(_)
            | PipelineError::LockStore(_)
            | PipelineError::Broker(_)
            | PipelineError::BucketStore(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
