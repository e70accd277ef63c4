//! Core abstractions for the weave workflow engine
//!
//! This crate provides the data model, the node capability contract, the
//! expression language and the persistence contract that the runtime and
//! node library build on. It does not schedule anything itself.

mod error;
pub mod events;
mod execution;
pub mod expression;
mod node;
pub mod store;
mod workflow;

pub use error::{EngineError, FlowError, NodeError, StoreError, WorkflowError};
pub use events::*;
pub use execution::{
    CancellationInfo, ExecutionId, ExecutionMetrics, ExecutionOptions, ExecutionRecord,
    ExecutionStatus, LogEntry, LogLevel, NodeExecutionEntry, NodeStatus, ResolvedOptions,
};
pub use expression::{ExpressionContext, NodeSnapshot};
pub use node::{
    error_chain, execute_timed, Node, NodeContext, NodeDefinition, NodeInput, NodeMetadata, NodeResult,
    RetryClass,
};
pub use store::{ExecutionStore, ExecutionUpdate, NodeUpdate};
pub use workflow::{Edge, EdgeId, NodeId, NodeSpec, Workflow, WorkflowId, WorkflowSettings};

/// Dynamic value type for node inputs/outputs
pub use serde_json::Value;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
