use async_trait::async_trait;
use serde_json::Map;
use tracing::info;
use weavecore::{Node, NodeContext, NodeDefinition, NodeError, NodeResult, RetryClass, Value};

/// Simple debug node that logs its inputs and passes them through
pub struct DebugNode;

#[async_trait]
impl Node for DebugNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("debug.log", "debug")
            .with_display_name("Debug Log")
            .with_description("Logs input values for debugging")
            .with_retry_class(RetryClass::Local)
    }

    async fn execute(&self, inputs: &[Value], _config: &Map<String, Value>) -> Result<Value, NodeError> {
        Ok(passthrough(inputs))
    }

    async fn execute_with_context(&self, ctx: NodeContext) -> NodeResult {
        let message = ctx
            .config
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("(no message)")
            .to_string();

        info!(execution_id = %ctx.execution_id, node_id = %ctx.node_id, "DEBUG: {}", message);
        ctx.events.info(format!("DEBUG: {}", message));

        let mut result = NodeResult::success(passthrough(&ctx.input_values()))
            .with_log(format!("DEBUG: {}", message));
        for input in &ctx.inputs {
            let line = format!("  {}: {}", input.source_node_id, input.value);
            ctx.events.info(line.clone());
            result = result.with_log(line);
        }
        result
    }
}

fn passthrough(inputs: &[Value]) -> Value {
    match inputs {
        [] => Value::Null,
        [only] => only.clone(),
        many => Value::Array(many.to_vec()),
    }
}
