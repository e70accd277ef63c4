use crate::{NodeId, Value, Workflow, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ExecutionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            node_id: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    pub fn for_node(mut self, node_id: impl Into<NodeId>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }
}

/// Options supplied with a run submission. Unset fields fall back to the
/// workflow settings, then to the engine defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_failed_nodes: Option<bool>,
    #[serde(default)]
    pub continue_on_error: Option<bool>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// Effective options of a run, persisted on the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedOptions {
    pub timeout_ms: u64,
    pub max_retries: Option<u32>,
    pub retry_failed_nodes: bool,
    pub continue_on_error: bool,
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub total_nodes: usize,
    pub completed_nodes: usize,
    pub failed_nodes: usize,
    pub skipped_nodes: usize,
    pub average_node_duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationInfo {
    pub cancelled_by: String,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionEntry {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub error_stack: Option<String>,
    pub retry_count: u32,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl NodeExecutionEntry {
    pub fn pending(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Pending,
            start_time: None,
            end_time: None,
            duration_ms: None,
            input: None,
            output: None,
            error: None,
            error_stack: None,
            retry_count: 0,
            logs: Vec::new(),
        }
    }
}

/// One persisted run of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub execution_number: u64,
    pub status: ExecutionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub nodes: Vec<NodeExecutionEntry>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub metrics: ExecutionMetrics,
    pub trigger_data: Value,
    pub options: ResolvedOptions,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub error_node_id: Option<NodeId>,
    pub cancellation: Option<CancellationInfo>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// New `PENDING` record with one `PENDING` entry per workflow node.
    pub fn new(
        workflow: &Workflow,
        execution_number: u64,
        options: ResolvedOptions,
        trigger_data: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow.id.clone(),
            execution_number,
            status: ExecutionStatus::Pending,
            start_time: None,
            end_time: None,
            duration_ms: None,
            nodes: workflow
                .nodes
                .iter()
                .map(|n| NodeExecutionEntry::pending(n.id.clone()))
                .collect(),
            logs: Vec::new(),
            metrics: ExecutionMetrics {
                total_nodes: workflow.nodes.len(),
                ..Default::default()
            },
            trigger_data,
            options,
            result: None,
            error_message: None,
            error_node_id: None,
            cancellation: None,
            created_at: Utc::now(),
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeExecutionEntry> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut NodeExecutionEntry> {
        self.nodes.iter_mut().find(|n| n.node_id == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeSpec;
    use serde_json::json;

    #[test]
    fn test_new_record_has_pending_entries() {
        let mut wf = Workflow::new("wf");
        wf.add_node(NodeSpec::new("a", "math.add"));
        wf.add_node(NodeSpec::new("b", "math.add"));

        let options = ResolvedOptions {
            timeout_ms: 1000,
            max_retries: None,
            retry_failed_nodes: true,
            continue_on_error: false,
            max_concurrency: 1,
        };
        let record = ExecutionRecord::new(&wf, 3, options, json!({"k": 1}));

        assert_eq!(record.status, ExecutionStatus::Pending);
        assert_eq!(record.execution_number, 3);
        assert_eq!(record.metrics.total_nodes, 2);
        assert!(record.nodes.iter().all(|n| n.status == NodeStatus::Pending));
        assert_eq!(record.node("b").map(|n| n.retry_count), Some(0));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(ExecutionStatus::Cancelled).unwrap(),
            json!("CANCELLED")
        );
        assert!(NodeStatus::Skipped.is_terminal());
        assert!(!NodeStatus::Running.is_terminal());
    }
}
