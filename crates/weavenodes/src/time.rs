use async_trait::async_trait;
use serde_json::Map;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use weavecore::{Node, NodeContext, NodeDefinition, NodeError, NodeResult, RetryClass, Value};

const DEFAULT_DELAY_MS: u64 = 1000;

/// Delay execution for a specified duration, then pass the input through.
///
/// The wait ends early when the execution is cancelled.
pub struct DelayNode;

impl DelayNode {
    fn delay(config: &Map<String, Value>) -> Duration {
        let ms = config
            .get("delayMs")
            .and_then(Value::as_f64)
            .map(|ms| ms.max(0.0) as u64)
            .unwrap_or(DEFAULT_DELAY_MS);
        Duration::from_millis(ms)
    }
}

#[async_trait]
impl Node for DelayNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("time.delay", "time")
            .with_display_name("Delay")
            .with_description("Delay execution for specified milliseconds")
            .with_retry_class(RetryClass::Local)
    }

    async fn execute(&self, inputs: &[Value], config: &Map<String, Value>) -> Result<Value, NodeError> {
        sleep(Self::delay(config)).await;
        Ok(inputs.first().cloned().unwrap_or(Value::Null))
    }

    async fn execute_with_context(&self, ctx: NodeContext) -> NodeResult {
        let delay = Self::delay(&ctx.config);
        ctx.events.info(format!("Delaying for {}ms", delay.as_millis()));

        let start = Instant::now();
        tokio::select! {
            _ = ctx.cancellation.cancelled() => NodeResult::failure(&NodeError::Cancelled),
            _ = sleep(delay) => {
                let output = ctx.inputs.first().map(|i| i.value.clone()).unwrap_or(Value::Null);
                NodeResult::success(output).with_duration(start.elapsed().as_millis() as u64)
            }
        }
    }
}
