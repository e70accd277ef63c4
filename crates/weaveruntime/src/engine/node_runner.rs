use super::EngineInner;
use crate::retry::{RetryPolicy, RETRY_CONFIG_KEY};
use chrono::Utc;
use futures::FutureExt;
use serde_json::{json, Map};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use weavecore::expression::{evaluate, evaluate_map};
use weavecore::{
    ExecutionEvent, ExecutionId, ExpressionContext, LogEntry, Node, NodeContext, NodeError,
    NodeId, NodeInput, NodeResult, NodeSpec, NodeStatus, NodeUpdate, ResolvedOptions, Value,
    WorkflowId,
};

/// Node data key holding an expression applied to the node's output.
pub(crate) const TRANSFORM_OUTPUT_KEY: &str = "transformOutput";

/// Everything a spawned node task needs.
pub(crate) struct NodeJob {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub node: NodeSpec,
    pub inputs: Vec<NodeInput>,
    pub expressions: ExpressionContext,
    pub trigger: Value,
    pub options: ResolvedOptions,
    pub token: CancellationToken,
}

/// Result of one node reported back to the scheduler.
pub(crate) struct NodeOutcome {
    pub node_id: NodeId,
    pub status: NodeStatus,
    /// Snapshot exposed to later expressions as `$node["..."].input`
    pub input: Value,
    pub output: Option<Value>,
    pub branch: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// One input is passed through as is; several become an array in edge
/// declaration order.
pub(crate) fn aggregate_input(inputs: &[NodeInput]) -> Value {
    match inputs {
        [] => Value::Null,
        [only] => only.value.clone(),
        many => Value::Array(many.iter().map(|i| i.value.clone()).collect()),
    }
}

impl EngineInner {
    pub(crate) async fn run_node(self: Arc<Self>, job: NodeJob) -> NodeOutcome {
        let execution_id = job.execution_id;
        let node_id = job.node.id.clone();
        let started = Instant::now();

        let aggregated = aggregate_input(&job.inputs);
        let expressions = job
            .expressions
            .clone()
            .for_node(&node_id, &job.node.display_name, aggregated);

        let parameters: Map<String, Value> = job
            .node
            .data
            .iter()
            .filter(|(key, _)| key.as_str() != TRANSFORM_OUTPUT_KEY && key.as_str() != RETRY_CONFIG_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let config = evaluate_map(&parameters, &expressions);
        let input_snapshot = json!({
            "inputs": job.inputs.iter().map(|i| i.value.clone()).collect::<Vec<_>>(),
            "parameters": Value::Object(config.clone()),
        });

        let Some(capability) = self.registry.get(&job.node.node_type) else {
            let err = NodeError::Configuration(format!("Unknown node type: {}", job.node.node_type));
            return self
                .fail_node(&job, input_snapshot, NodeResult::failure(&err), started)
                .await;
        };

        let definition = capability.definition();
        let policy = self.config.retry.resolve(
            &job.node.node_type,
            definition.retry_class,
            &job.node.data,
            job.options.max_retries,
        );

        self.persist_node(
            execution_id,
            &node_id,
            NodeUpdate {
                start_time: Some(Utc::now()),
                input: Some(input_snapshot.clone()),
                ..NodeUpdate::status(NodeStatus::Running)
            },
        )
        .await;
        self.events.emit(ExecutionEvent::NodeStarted {
            execution_id,
            node_id: node_id.clone(),
            node_type: job.node.node_type.clone(),
            attempt: 1,
            timestamp: Utc::now(),
        });
        debug!(execution_id = %execution_id, node_id = %node_id, node_type = %job.node.node_type, "Executing node");

        let result = self
            .attempt_with_retry(&job, capability, &config, &policy)
            .await;

        let Some(result) = result else {
            debug!(execution_id = %execution_id, node_id = %node_id, "Node interrupted by cancellation");
            return NodeOutcome {
                node_id,
                status: NodeStatus::Cancelled,
                input: input_snapshot,
                output: None,
                branch: None,
                error: Some(NodeError::Cancelled.to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
            };
        };

        if !result.success {
            return self.fail_node(&job, input_snapshot, result, started).await;
        }

        let mut output = result.output;
        if let Some(transform) = job.node.data.get(TRANSFORM_OUTPUT_KEY) {
            let mut ctx = expressions;
            ctx.output = Some(output);
            output = evaluate(transform, &ctx);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        self.persist_node(
            execution_id,
            &node_id,
            NodeUpdate {
                output: Some(output.clone()),
                end_time: Some(Utc::now()),
                duration_ms: Some(duration_ms),
                ..NodeUpdate::status(NodeStatus::Success)
            },
        )
        .await;
        self.append_result_logs(execution_id, &node_id, &result.logs).await;
        self.events.emit(ExecutionEvent::NodeCompleted {
            execution_id,
            node_id: node_id.clone(),
            output: output.clone(),
            duration_ms,
            timestamp: Utc::now(),
        });
        info!(execution_id = %execution_id, node_id = %node_id, duration_ms, "Node completed");

        NodeOutcome {
            node_id,
            status: NodeStatus::Success,
            input: input_snapshot,
            output: Some(output),
            branch: result.branch,
            error: None,
            duration_ms,
        }
    }

    /// Invoke the capability until it succeeds or its retries run out.
    /// `None` means the run was cancelled in the meantime. Only the backoff
    /// sleep is interrupted by cancellation.
    async fn attempt_with_retry(
        &self,
        job: &NodeJob,
        capability: Arc<dyn Node>,
        config: &Map<String, Value>,
        policy: &RetryPolicy,
    ) -> Option<NodeResult> {
        let execution_id = job.execution_id;
        let node_id = &job.node.id;
        let mut retry_count: u32 = 0;

        loop {
            let ctx = NodeContext {
                execution_id,
                workflow_id: job.workflow_id.clone(),
                node_id: node_id.clone(),
                node_name: job.node.display_name.clone(),
                node_type: job.node.node_type.clone(),
                inputs: job.inputs.clone(),
                config: config.clone(),
                trigger_data: job.trigger.clone(),
                retry_count,
                events: self.events.create_emitter(execution_id, node_id.clone()),
                cancellation: job.token.child_token(),
            };

            // In-flight work is never dropped; capabilities observe the
            // token themselves and the result is discarded after a cancel.
            let result = invoke(capability.as_ref(), ctx).await;

            if job.token.is_cancelled() {
                return None;
            }
            if result.success {
                return Some(result);
            }
            if !job.options.retry_failed_nodes || retry_count >= policy.max_retries {
                return Some(result);
            }

            let delay = policy.backoff_delay(retry_count);
            retry_count += 1;
            let error = result.error.clone().unwrap_or_default();
            warn!(
                execution_id = %execution_id,
                node_id = %node_id,
                attempt = retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Node failed, retrying"
            );

            self.persist_node(
                execution_id,
                node_id,
                NodeUpdate {
                    retry_count: Some(retry_count),
                    ..Default::default()
                },
            )
            .await;
            self.append_node_log(
                execution_id,
                node_id,
                LogEntry::warn(format!(
                    "Attempt {} failed: {}. Retrying in {}ms",
                    retry_count,
                    error,
                    delay.as_millis()
                )),
            )
            .await;
            self.events.emit(ExecutionEvent::NodeRetrying {
                execution_id,
                node_id: node_id.clone(),
                attempt: retry_count,
                delay_ms: delay.as_millis() as u64,
                error,
                timestamp: Utc::now(),
            });

            tokio::select! {
                biased;
                _ = job.token.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn fail_node(&self, job: &NodeJob, input: Value, result: NodeResult, started: Instant) -> NodeOutcome {
        let execution_id = job.execution_id;
        let node_id = job.node.id.clone();
        let message = result.error.clone().unwrap_or_else(|| "unknown error".to_string());
        let duration_ms = started.elapsed().as_millis() as u64;

        error!(execution_id = %execution_id, node_id = %node_id, error = %message, "Node failed");
        self.persist_node(
            execution_id,
            &node_id,
            NodeUpdate {
                end_time: Some(Utc::now()),
                duration_ms: Some(duration_ms),
                input: Some(input.clone()),
                error: Some(message.clone()),
                error_stack: result.error_stack.clone(),
                ..NodeUpdate::status(NodeStatus::Failed)
            },
        )
        .await;
        self.append_result_logs(execution_id, &node_id, &result.logs).await;
        self.events.emit(ExecutionEvent::NodeFailed {
            execution_id,
            node_id: node_id.clone(),
            error: message.clone(),
            timestamp: Utc::now(),
        });

        NodeOutcome {
            node_id,
            status: NodeStatus::Failed,
            input,
            output: None,
            branch: None,
            error: Some(message),
            duration_ms,
        }
    }

    async fn append_result_logs(&self, execution_id: ExecutionId, node_id: &NodeId, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        let entries = lines
            .iter()
            .map(|line| LogEntry::info(line.clone()).for_node(node_id))
            .collect();
        if let Err(e) = self.store.append_node_logs(execution_id, node_id, entries).await {
            debug!(execution_id = %execution_id, node_id = %node_id, error = %e, "Dropped node log entries");
        }
    }

    async fn append_node_log(&self, execution_id: ExecutionId, node_id: &NodeId, entry: LogEntry) {
        let entry = entry.for_node(node_id);
        if let Err(e) = self.store.append_node_logs(execution_id, node_id, vec![entry]).await {
            debug!(execution_id = %execution_id, node_id = %node_id, error = %e, "Dropped node log entry");
        }
    }
}

/// Run one attempt, converting a panic inside the capability into a failed
/// result.
async fn invoke(capability: &dyn Node, ctx: NodeContext) -> NodeResult {
    match AssertUnwindSafe(capability.execute_with_context(ctx))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => NodeResult::failure(&NodeError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "node panicked".to_string()
    }
}
