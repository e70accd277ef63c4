//! Standard node library
//!
//! Collection of built-in nodes for common operations

mod debug;
mod http;
mod logic;
mod math;
mod time;
mod transform;
mod trigger;

pub use debug::DebugNode;
pub use http::HttpRequestNode;
pub use logic::ConditionNode;
pub use math::{AddNode, MultiplyNode};
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode};
pub use trigger::ManualTriggerNode;
use weaveruntime::NodeRegistry;

use std::sync::Arc;
use weavecore::Value;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(ManualTriggerNode));
    registry.register(Arc::new(AddNode));
    registry.register(Arc::new(MultiplyNode));
    registry.register(Arc::new(ConditionNode));
    registry.register(Arc::new(DebugNode));
    registry.register(Arc::new(DelayNode));
    registry.register(Arc::new(JsonParseNode));
    registry.register(Arc::new(JsonStringifyNode));
    registry.register(Arc::new(HttpRequestNode::new()));
}

/// JSON type name used in input type errors
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A config entry, falling back to the first input.
pub(crate) fn config_or_input<'a>(
    config: &'a serde_json::Map<String, Value>,
    key: &str,
    inputs: &'a [Value],
) -> Option<&'a Value> {
    config.get(key).or_else(|| inputs.first())
}

#[cfg(test)]
pub(crate) mod testing {
    use serde_json::{Map, Value};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;
    use weavecore::{EventEmitter, NodeContext, NodeInput};

    pub fn context(inputs: Vec<Value>, config: Value) -> NodeContext {
        let execution_id = Uuid::new_v4();
        let config: Map<String, Value> = match config {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        NodeContext {
            execution_id,
            workflow_id: "wf".into(),
            node_id: "n".into(),
            node_name: "Node".into(),
            node_type: "test".into(),
            inputs: inputs
                .into_iter()
                .enumerate()
                .map(|(i, value)| NodeInput {
                    source_node_id: format!("up{}", i),
                    source_handle: None,
                    target_handle: None,
                    value,
                })
                .collect(),
            config,
            trigger_data: Value::Null,
            retry_count: 0,
            events: EventEmitter::detached(execution_id, "n"),
            cancellation: CancellationToken::new(),
        }
    }
}
