use crate::{events::EventEmitter, ExecutionId, NodeError, NodeId, Value, WorkflowId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::collections::HashMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Core trait that all node capabilities implement.
///
/// A capability is registered once and shared by every execution, so it
/// must not keep per-call state. Everything a call needs arrives through
/// the arguments or the [`NodeContext`].
#[async_trait]
pub trait Node: Send + Sync {
    /// Static description of this node type (e.g. "math.add")
    fn definition(&self) -> NodeDefinition;

    /// Run the node against the values of its incoming edges and its
    /// resolved configuration.
    async fn execute(&self, inputs: &[Value], config: &Map<String, Value>) -> Result<Value, NodeError>;

    /// Context-aware entry point used by the engine.
    ///
    /// The default adapts [`Node::execute`]: the call is timed and any error
    /// is folded into the returned [`NodeResult`] instead of propagating.
    async fn execute_with_context(&self, ctx: NodeContext) -> NodeResult {
        execute_timed(self, &ctx).await
    }
}

/// Run [`Node::execute`] against the context's inputs and config and wrap
/// the outcome in a timed [`NodeResult`]. Custom adapters build on this to
/// keep `execution_time_ms` populated.
pub async fn execute_timed<N: Node + ?Sized>(node: &N, ctx: &NodeContext) -> NodeResult {
    let start = Instant::now();
    let inputs = ctx.input_values();
    let result = node.execute(&inputs, &ctx.config).await;
    let elapsed = start.elapsed().as_millis() as u64;

    match result {
        Ok(output) => NodeResult::success(output).with_duration(elapsed),
        Err(e) => NodeResult::failure(&e).with_duration(elapsed),
    }
}

/// How aggressively failures of a node type should be retried by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryClass {
    /// CPU-local work (arithmetic, branching); retrying rarely helps.
    Local,
    #[default]
    Standard,
    /// Calls into unreliable external services.
    External,
}

/// Metadata about a node type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    pub node_type: String,
    pub display_name: String,
    pub description: String,
    pub category: String,
    pub retry_class: RetryClass,
}

impl NodeDefinition {
    pub fn new(node_type: impl Into<String>, category: impl Into<String>) -> Self {
        let node_type = node_type.into();
        Self {
            display_name: node_type.clone(),
            node_type,
            description: String::new(),
            category: category.into(),
            retry_class: RetryClass::Standard,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_retry_class(mut self, class: RetryClass) -> Self {
        self.retry_class = class;
        self
    }
}

/// Value arriving over one incoming edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInput {
    pub source_node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    pub value: Value,
}

/// Execution context passed to each node invocation
#[derive(Clone)]
pub struct NodeContext {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
    pub node_name: String,
    pub node_type: String,

    /// Per-edge inputs, in edge declaration order
    pub inputs: Vec<NodeInput>,

    /// Node configuration with expressions already resolved
    pub config: Map<String, Value>,

    /// Payload that originated the run
    pub trigger_data: Value,

    /// Number of retries already performed for this node
    pub retry_count: u32,

    pub events: EventEmitter,

    /// Cancelled when the execution is cancelled or times out
    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn input_values(&self) -> Vec<Value> {
        self.inputs.iter().map(|i| i.value.clone()).collect()
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }
}

/// Outcome of one node invocation. Always well-formed, even on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
    pub error_stack: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub metadata: NodeMetadata,
    /// Output handle chosen by a branching node. Edges leaving the node
    /// through any other handle are not followed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl NodeResult {
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            error_stack: None,
            logs: Vec::new(),
            metadata: NodeMetadata::default(),
            branch: None,
        }
    }

    pub fn failure(error: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.to_string()),
            error_stack: Some(error_chain(error)),
            logs: Vec::new(),
            metadata: NodeMetadata::default(),
            branch: None,
        }
    }

    pub fn with_duration(mut self, millis: u64) -> Self {
        self.metadata.execution_time_ms = millis;
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }
}

/// Metadata about node execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    pub execution_time_ms: u64,
    #[serde(default)]
    pub custom: HashMap<String, Value>,
}

/// Render an error and its `source()` chain, outermost first.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut lines = vec![format!("{:?}", error)];
    let mut source = error.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {}", cause));
        source = cause.source();
    }
    lines.join("\n")
}
