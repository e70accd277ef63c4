use crate::ExecutionId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure raised by a node capability.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Node panicked: {0}")]
    Panicked(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

/// Structural problems with a workflow definition.
#[derive(Error, Debug, Clone)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Validation failed [{code}]: {message}")]
    ValidationFailed { code: String, message: String },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Execution not found: {0}")]
    NotFound(ExecutionId),

    #[error("Execution {0} already exists")]
    AlreadyExists(ExecutionId),

    #[error("Node {node_id} not part of execution {execution_id}")]
    NodeNotFound {
        execution_id: ExecutionId,
        node_id: String,
    },

    #[error("Execution {0} is finalized and can no longer be modified")]
    Finalized(ExecutionId),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Errors surfaced synchronously by run submission.
///
/// Anything that happens after the execution record has been persisted is
/// recorded on the record instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),
}
