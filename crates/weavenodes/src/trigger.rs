use async_trait::async_trait;
use serde_json::Map;
use weavecore::{Node, NodeContext, NodeDefinition, NodeError, NodeResult, RetryClass, Value};

/// Entry point of manually started workflows: emits the trigger payload.
pub struct ManualTriggerNode;

#[async_trait]
impl Node for ManualTriggerNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("trigger.manual", "trigger")
            .with_display_name("Manual Trigger")
            .with_description("Starts the workflow with the payload it was submitted with")
            .with_retry_class(RetryClass::Local)
    }

    /// Without a context there is no trigger payload; upstream data (if
    /// any) passes through.
    async fn execute(&self, inputs: &[Value], _config: &Map<String, Value>) -> Result<Value, NodeError> {
        Ok(inputs.first().cloned().unwrap_or(Value::Null))
    }

    async fn execute_with_context(&self, ctx: NodeContext) -> NodeResult {
        let payload = match (&ctx.trigger_data, ctx.config.get("defaults")) {
            (Value::Null, Some(defaults)) => defaults.clone(),
            (Value::Object(data), Some(Value::Object(defaults))) => {
                let mut merged = defaults.clone();
                merged.extend(data.clone());
                Value::Object(merged)
            }
            (data, _) => data.clone(),
        };
        NodeResult::success(payload)
    }
}
