//! Persistence contract for execution records.
//!
//! Updates are field-level so that concurrent writes for different nodes of
//! the same execution never overwrite each other.

use crate::{
    CancellationInfo, ExecutionId, ExecutionMetrics, ExecutionRecord, ExecutionStatus, LogEntry,
    NodeStatus, StoreError, Value,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Partial update of run-level fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct ExecutionUpdate {
    pub status: Option<ExecutionStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub metrics: Option<ExecutionMetrics>,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub error_node_id: Option<String>,
    pub cancellation: Option<CancellationInfo>,
}

impl ExecutionUpdate {
    pub fn status(status: ExecutionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Partial update of one node entry. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub status: Option<NodeStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub error_stack: Option<String>,
    pub retry_count: Option<u32>,
}

impl NodeUpdate {
    pub fn status(status: NodeStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_execution(&self, record: ExecutionRecord) -> Result<(), StoreError>;

    async fn get_execution(&self, id: ExecutionId) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Number of executions ever recorded for a workflow.
    async fn count_executions(&self, workflow_id: &str) -> Result<u64, StoreError>;

    /// Executions of a workflow, oldest first.
    async fn list_executions(&self, workflow_id: &str) -> Result<Vec<ExecutionRecord>, StoreError>;

    async fn update_execution(&self, id: ExecutionId, update: ExecutionUpdate) -> Result<(), StoreError>;

    async fn update_node(&self, id: ExecutionId, node_id: &str, update: NodeUpdate) -> Result<(), StoreError>;

    async fn append_log(&self, id: ExecutionId, entry: LogEntry) -> Result<(), StoreError>;

    async fn append_node_logs(
        &self,
        id: ExecutionId,
        node_id: &str,
        entries: Vec<LogEntry>,
    ) -> Result<(), StoreError>;
}
