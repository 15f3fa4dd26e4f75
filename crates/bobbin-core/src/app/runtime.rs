//! Runtime - task body の登録と実行
//!
//! 失敗ルールは差し替え可能：`TaskHandler` を実装して `HandlerRegistry` に登録します。
//! 参照実装の `PayloadMarkerHandler` は payload に marker 文字列を含むと失敗します。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ExecutionError, PipelineError, Task, TaskType};

/// The body run for one task type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<(), ExecutionError>;
}

/// Registry of handlers (task_type -> handler).
///
/// Design:
/// - Built during initialization (mutable).
/// - Shared read-only by every worker afterwards.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), PipelineError> {
        if self.handlers.contains_key(&task_type) {
            return Err(PipelineError::DuplicateHandler(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: &TaskType) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_type)
    }

    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<_> = self.handlers.keys().cloned().collect();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Dispatches a task to the handler registered for its event type.
#[derive(Clone)]
pub struct Runtime {
    registry: Arc<HandlerRegistry>,
}

impl Runtime {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Fails with `HandlerNotFound` before touching the task when the type is unknown.
    pub fn handler_for(&self, task_type: &TaskType) -> Result<Arc<dyn TaskHandler>, PipelineError> {
        self.registry
            .get(task_type)
            .cloned()
            .ok_or_else(|| PipelineError::HandlerNotFound(task_type.clone()))
    }
}

/// Reference body: succeeds unless the payload contains `marker`.
#[derive(Debug, Clone)]
pub struct PayloadMarkerHandler {
    marker: String,
}

impl PayloadMarkerHandler {
    pub const DEFAULT_MARKER: &'static str = "fail";

    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl Default for PayloadMarkerHandler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MARKER)
    }
}

#[async_trait]
impl TaskHandler for PayloadMarkerHandler {
    async fn execute(&self, task: &Task) -> Result<(), ExecutionError> {
        if task.payload.contains(&self.marker) {
            return Err(ExecutionError::new("Simulated processing failure"));
        }
        Ok(())
    }
}
