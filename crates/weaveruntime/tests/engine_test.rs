use async_trait::async_trait;
use serde_json::{json, Map};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use weavecore::{
    EngineError, ExecutionEvent, ExecutionOptions, ExecutionStatus, Node, NodeContext,
    NodeDefinition, NodeError, NodeResult, NodeSpec, NodeStatus, Value, Workflow, WorkflowError,
};
use weaveruntime::{NodeRegistry, RetryPolicy, RuntimeConfig, WeaveRuntime};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn numbers(inputs: &[Value], config: &Map<String, Value>) -> Vec<f64> {
    let operands = config
        .get("operands")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    inputs.iter().chain(operands.iter()).filter_map(Value::as_f64).collect()
}

/// Emits its `value` config entry.
struct Const;

#[async_trait]
impl Node for Const {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("test.const", "test")
    }

    async fn execute(&self, _inputs: &[Value], config: &Map<String, Value>) -> Result<Value, NodeError> {
        Ok(config.get("value").cloned().unwrap_or(Value::Null))
    }
}

struct Add;

#[async_trait]
impl Node for Add {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("test.add", "test")
    }

    async fn execute(&self, inputs: &[Value], config: &Map<String, Value>) -> Result<Value, NodeError> {
        Ok(json!(numbers(inputs, config).iter().sum::<f64>() as i64))
    }
}

struct Multiply;

#[async_trait]
impl Node for Multiply {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("test.multiply", "test")
    }

    async fn execute(&self, inputs: &[Value], config: &Map<String, Value>) -> Result<Value, NodeError> {
        Ok(json!(numbers(inputs, config).iter().product::<f64>() as i64))
    }
}

/// Emits its inputs as an array.
struct Collect;

#[async_trait]
impl Node for Collect {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("test.collect", "test")
    }

    async fn execute(&self, inputs: &[Value], _config: &Map<String, Value>) -> Result<Value, NodeError> {
        Ok(Value::Array(inputs.to_vec()))
    }
}

/// Fails until it has been called `succeedAfter` times.
struct Flaky {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Node for Flaky {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("test.flaky", "test")
    }

    async fn execute(&self, _inputs: &[Value], config: &Map<String, Value>) -> Result<Value, NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let succeed_after = config.get("succeedAfter").and_then(Value::as_u64).unwrap_or(u64::MAX);
        if u64::from(call) >= succeed_after {
            Ok(json!(call))
        } else {
            Err(NodeError::ExecutionFailed(format!("call {} failed", call)))
        }
    }
}

/// Sleeps for `ms` unless cancelled first.
struct Sleep;

#[async_trait]
impl Node for Sleep {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("test.sleep", "test")
    }

    async fn execute(&self, _inputs: &[Value], _config: &Map<String, Value>) -> Result<Value, NodeError> {
        unreachable!("driven through execute_with_context")
    }

    async fn execute_with_context(&self, ctx: NodeContext) -> NodeResult {
        let ms = ctx.config.get("ms").and_then(Value::as_u64).unwrap_or(0);
        tokio::select! {
            _ = ctx.cancellation.cancelled() => NodeResult::failure(&NodeError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(ms)) => NodeResult::success(json!(ms)),
        }
    }
}

/// Sleeps for `ms` without looking at the cancellation token, then raises
/// its flag.
struct Stubborn {
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl Node for Stubborn {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("test.stubborn", "test")
    }

    async fn execute(&self, _inputs: &[Value], config: &Map<String, Value>) -> Result<Value, NodeError> {
        let ms = config.get("ms").and_then(Value::as_u64).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(json!("done"))
    }
}

/// Routes to the handle named by its `branch` config entry.
struct Branch;

#[async_trait]
impl Node for Branch {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("test.branch", "test")
    }

    async fn execute(&self, inputs: &[Value], _config: &Map<String, Value>) -> Result<Value, NodeError> {
        Ok(inputs.first().cloned().unwrap_or(Value::Null))
    }

    async fn execute_with_context(&self, ctx: NodeContext) -> NodeResult {
        let branch = ctx.get_config_or("branch", json!("true"));
        NodeResult::success(json!({"routed": branch.clone()}))
            .with_branch(branch.as_str().unwrap_or("true"))
    }
}

struct Panics;

#[async_trait]
impl Node for Panics {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("test.panic", "test")
    }

    async fn execute(&self, _inputs: &[Value], _config: &Map<String, Value>) -> Result<Value, NodeError> {
        panic!("capability blew up")
    }
}

fn registry(flaky_calls: Arc<AtomicU32>) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(Const));
    registry.register(Arc::new(Add));
    registry.register(Arc::new(Multiply));
    registry.register(Arc::new(Collect));
    registry.register(Arc::new(Flaky { calls: flaky_calls }));
    registry.register(Arc::new(Sleep));
    registry.register(Arc::new(Branch));
    registry.register(Arc::new(Panics));
    registry
}

/// Runtime whose retries back off for a few milliseconds only.
fn fast_runtime() -> WeaveRuntime {
    init_tracing();
    let mut config = RuntimeConfig::default();
    config.retry.standard = RetryPolicy {
        max_retries: 2,
        base_delay_ms: 5,
        max_delay_ms: 20,
        jitter: 0.0,
    };
    WeaveRuntime::with_config(registry(Arc::new(AtomicU32::new(0))), config)
}

fn constant(id: &str, value: Value) -> NodeSpec {
    NodeSpec::new(id, "test.const").with_data("value", value)
}

fn no_retries() -> ExecutionOptions {
    ExecutionOptions {
        max_retries: Some(0),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_zero_edge_workflow_runs_every_node() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("independent");
    wf.add_node(constant("a", json!(1)).with_name("A"));
    wf.add_node(constant("b", json!(2)).with_name("B"));
    wf.add_node(constant("c", json!(3)).with_name("C"));

    let record = runtime.execute(wf, ExecutionOptions::default(), Value::Null).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert!(record.nodes.iter().all(|n| n.status == NodeStatus::Success));
    assert_eq!(record.result, Some(json!({"A": 1, "B": 2, "C": 3})));
    assert_eq!(record.metrics.total_nodes, 3);
    assert_eq!(record.metrics.completed_nodes, 3);
    assert_eq!(record.execution_number, 1);
}

#[tokio::test]
async fn test_add_then_multiply() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("arithmetic");
    wf.add_node(constant("two", json!(2)));
    wf.add_node(constant("three", json!(3)));
    wf.add_node(NodeSpec::new("sum", "test.add"));
    wf.add_node(NodeSpec::new("product", "test.multiply").with_data("operands", json!([10])));
    wf.connect("two", "sum");
    wf.connect("three", "sum");
    wf.connect("sum", "product");

    let record = runtime.execute(wf, ExecutionOptions::default(), Value::Null).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.node("sum").unwrap().output, Some(json!(5)));
    assert_eq!(record.result, Some(json!(50)));
}

#[tokio::test]
async fn test_diamond_joins_both_branches() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("diamond");
    wf.add_node(constant("a", json!(1)));
    wf.add_node(NodeSpec::new("b", "test.add").with_data("operands", json!([10])));
    wf.add_node(NodeSpec::new("c", "test.add").with_data("operands", json!([20])));
    wf.add_node(NodeSpec::new("d", "test.collect"));
    wf.connect("a", "b");
    wf.connect("a", "c");
    wf.connect("b", "d");
    wf.connect("c", "d");

    let record = runtime.execute(wf, ExecutionOptions::default(), Value::Null).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    let d = record.node("d").unwrap();
    assert_eq!(d.output, Some(json!([11, 21])));
    assert_eq!(d.input.as_ref().unwrap()["inputs"], json!([11, 21]));
}

#[tokio::test]
async fn test_cycle_is_rejected_before_a_record_exists() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("loop").with_id("loop");
    wf.add_node(constant("a", json!(1)));
    wf.add_node(NodeSpec::new("b", "test.add"));
    wf.add_node(NodeSpec::new("c", "test.add"));
    wf.connect("a", "b");
    wf.connect("b", "c");
    wf.connect("c", "b");

    let err = runtime
        .start_execution(wf, ExecutionOptions::default(), Value::Null)
        .await
        .unwrap_err();

    match err {
        EngineError::Workflow(WorkflowError::ValidationFailed { code, .. }) => {
            assert_eq!(code, "CIRCULAR_DEPENDENCY")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(runtime.store().count_executions("loop").await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_node_type_is_rejected() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("unknown");
    wf.add_node(NodeSpec::new("a", "test.nope"));

    let err = runtime
        .start_execution(wf, ExecutionOptions::default(), Value::Null)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("UNKNOWN_NODE_TYPE"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_backs_off() {
    init_tracing();
    let calls = Arc::new(AtomicU32::new(0));
    let runtime = WeaveRuntime::with_config(registry(calls.clone()), RuntimeConfig::default());
    let mut events = runtime.subscribe_events();

    let mut wf = Workflow::new("flaky");
    wf.add_node(NodeSpec::new("f", "test.flaky"));

    let started = tokio::time::Instant::now();
    let record = runtime
        .execute(
            wf,
            ExecutionOptions {
                max_retries: Some(2),
                ..Default::default()
            },
            Value::Null,
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.error_node_id.as_deref(), Some("f"));
    let node = record.node("f").unwrap();
    assert_eq!(node.status, NodeStatus::Failed);
    assert_eq!(node.retry_count, 2);
    assert!(node.error.as_ref().unwrap().contains("call 3 failed"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // 1000ms then 2000ms, each with up to 10% jitter
    assert!(elapsed >= Duration::from_millis(3000), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(3400), "elapsed {elapsed:?}");

    let mut retries = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeRetrying { attempt, delay_ms, .. } = event {
            retries.push((attempt, delay_ms));
        }
    }
    assert_eq!(retries.len(), 2);
    assert_eq!(retries[0].0, 1);
    assert!(retries[0].1 >= 1000 && retries[1].1 >= 2000);
}

#[tokio::test]
async fn test_retry_recovers() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("recovering");
    wf.add_node(NodeSpec::new("f", "test.flaky").with_data("succeedAfter", json!(2)));

    let record = runtime.execute(wf, ExecutionOptions::default(), Value::Null).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    let node = record.node("f").unwrap();
    assert_eq!(node.retry_count, 1);
    assert_eq!(node.output, Some(json!(2)));
}

#[tokio::test]
async fn test_expressions_read_upstream_outputs() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("expressions");
    wf.add_node(constant("src", json!({"total": 42, "items": ["x", "y"]})).with_name("Source"));
    wf.add_node(
        constant("fmt", json!("Total: {{Source.total}} for {{$trigger.customer}}"))
            .with_name("Format"),
    );
    wf.add_node(
        constant("raw", json!("{{Source.items}}"))
            .with_name("Raw")
            .with_data("transformOutput", json!("{{$output[1]}}")),
    );
    wf.connect("src", "fmt");
    wf.connect("src", "raw");

    let record = runtime
        .execute(wf, ExecutionOptions::default(), json!({"customer": "acme"}))
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(
        record.result,
        Some(json!({"Format": "Total: 42 for acme", "Raw": "y"}))
    );
    let fmt = record.node("fmt").unwrap();
    assert_eq!(fmt.input.as_ref().unwrap()["parameters"]["value"], json!("Total: 42 for acme"));
}

#[tokio::test]
async fn test_failure_skips_dependents_but_not_siblings() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("partial");
    wf.add_node(constant("root", json!(1)));
    wf.add_node(NodeSpec::new("bad", "test.flaky"));
    wf.add_node(NodeSpec::new("after_bad", "test.collect"));
    wf.add_node(NodeSpec::new("good", "test.add").with_data("operands", json!([1])));
    wf.connect("root", "bad");
    wf.connect("bad", "after_bad");
    wf.connect("root", "good");

    let record = runtime.execute(wf, no_retries(), Value::Null).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.error_node_id.as_deref(), Some("bad"));
    assert_eq!(record.node("bad").unwrap().status, NodeStatus::Failed);
    assert_eq!(record.node("after_bad").unwrap().status, NodeStatus::Skipped);
    assert_eq!(record.node("good").unwrap().status, NodeStatus::Success);
    assert_eq!(record.metrics.failed_nodes, 1);
    assert_eq!(record.metrics.skipped_nodes, 1);
}

#[tokio::test]
async fn test_continue_on_error() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("tolerant");
    wf.add_node(NodeSpec::new("bad", "test.flaky"));
    wf.add_node(NodeSpec::new("after", "test.collect"));
    wf.connect("bad", "after");

    let record = runtime
        .execute(
            wf,
            ExecutionOptions {
                max_retries: Some(0),
                continue_on_error: Some(true),
                ..Default::default()
            },
            Value::Null,
        )
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.node("bad").unwrap().status, NodeStatus::Failed);
    let after = record.node("after").unwrap();
    assert_eq!(after.status, NodeStatus::Success);
    assert_eq!(after.output, Some(json!([null])));
}

#[tokio::test]
async fn test_failed_branch_keeps_its_input_slot() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("lossy diamond");
    wf.add_node(constant("a", json!(1)));
    wf.add_node(NodeSpec::new("b", "test.flaky"));
    wf.add_node(NodeSpec::new("c", "test.add").with_data("operands", json!([2])));
    wf.add_node(NodeSpec::new("d", "test.collect"));
    wf.connect("a", "b");
    wf.connect("a", "c");
    wf.connect("b", "d");
    wf.connect("c", "d");

    let record = runtime
        .execute(
            wf,
            ExecutionOptions {
                max_retries: Some(0),
                continue_on_error: Some(true),
                ..Default::default()
            },
            Value::Null,
        )
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.node("b").unwrap().status, NodeStatus::Failed);
    let d = record.node("d").unwrap();
    assert_eq!(d.status, NodeStatus::Success);
    assert_eq!(d.input.as_ref().unwrap()["inputs"], json!([null, 3]));
    assert_eq!(d.output, Some(json!([null, 3])));
}

#[tokio::test]
async fn test_branch_routing() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("branching");
    wf.add_node(NodeSpec::new("check", "test.branch").with_data("branch", "false"));
    wf.add_node(constant("yes", json!("took true")).with_name("Yes"));
    wf.add_node(constant("no", json!("took false")).with_name("No"));
    wf.add_node(NodeSpec::new("after_yes", "test.collect").with_name("AfterYes"));
    wf.connect_handle("check", "true", "yes");
    wf.connect_handle("check", "false", "no");
    wf.connect("yes", "after_yes");

    let record = runtime.execute(wf, ExecutionOptions::default(), Value::Null).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.node("no").unwrap().status, NodeStatus::Success);
    assert_eq!(record.node("yes").unwrap().status, NodeStatus::Skipped);
    assert_eq!(record.node("after_yes").unwrap().status, NodeStatus::Skipped);
    assert_eq!(record.result, Some(json!({"No": "took false", "AfterYes": null})));
}

#[tokio::test]
async fn test_panicking_node_fails_the_run() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("panics");
    wf.add_node(NodeSpec::new("p", "test.panic"));

    let record = runtime.execute(wf, no_retries(), Value::Null).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Failed);
    let node = record.node("p").unwrap();
    assert_eq!(node.status, NodeStatus::Failed);
    assert!(node.error.as_ref().unwrap().contains("capability blew up"));
}

#[tokio::test]
async fn test_cancel_running_execution() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("slow");
    wf.add_node(NodeSpec::new("wait", "test.sleep").with_data("ms", 10_000));
    wf.add_node(NodeSpec::new("after", "test.collect"));
    wf.connect("wait", "after");

    let id = runtime
        .start_execution(wf, ExecutionOptions::default(), Value::Null)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(runtime.cancel_execution(id, "tester", "no longer needed").await);
    assert!(!runtime.cancel_execution(id, "tester", "again").await);

    let record = runtime.wait_for_completion(id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    let cancellation = record.cancellation.as_ref().unwrap();
    assert_eq!(cancellation.cancelled_by, "tester");
    assert_eq!(cancellation.reason, "no longer needed");
    assert_eq!(record.node("wait").unwrap().status, NodeStatus::Cancelled);
    assert_eq!(record.node("after").unwrap().status, NodeStatus::Cancelled);
    assert!(!runtime.is_execution_active(id).await);
}

#[tokio::test]
async fn test_cancel_lets_running_work_finish() {
    init_tracing();
    let finished = Arc::new(AtomicBool::new(false));
    let mut registry = registry(Arc::new(AtomicU32::new(0)));
    registry.register(Arc::new(Stubborn {
        finished: finished.clone(),
    }));
    let runtime = WeaveRuntime::with_config(registry, RuntimeConfig::default());

    let mut wf = Workflow::new("stubborn");
    wf.add_node(NodeSpec::new("slow", "test.stubborn").with_data("ms", 200));
    wf.add_node(NodeSpec::new("after", "test.collect"));
    wf.connect("slow", "after");

    let id = runtime
        .start_execution(wf, ExecutionOptions::default(), Value::Null)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(runtime.cancel_execution(id, "tester", "stop").await);

    let record = runtime.wait_for_completion(id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Cancelled);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(finished.load(Ordering::SeqCst));

    let record = runtime.get_execution(id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert_eq!(record.node("slow").unwrap().status, NodeStatus::Cancelled);
    assert_eq!(record.node("slow").unwrap().output, None);
    assert_eq!(record.node("after").unwrap().status, NodeStatus::Cancelled);
}

#[tokio::test]
async fn test_timeout_cancels_execution() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("too slow");
    wf.add_node(NodeSpec::new("wait", "test.sleep").with_data("ms", 10_000));

    let record = runtime
        .execute(
            wf,
            ExecutionOptions {
                timeout_ms: Some(50),
                ..Default::default()
            },
            Value::Null,
        )
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Cancelled);
    let cancellation = record.cancellation.unwrap();
    assert_eq!(cancellation.cancelled_by, "system");
    assert!(cancellation.reason.contains("timed out"));
}

#[tokio::test]
async fn test_concurrency_limit_queues_then_promotes() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("serial").with_id("serial");
    wf.settings.max_concurrency = Some(1);
    wf.add_node(NodeSpec::new("wait", "test.sleep").with_data("ms", 100));

    let first = runtime
        .start_execution(wf.clone(), ExecutionOptions::default(), Value::Null)
        .await
        .unwrap();
    let second = runtime
        .start_execution(wf, ExecutionOptions::default(), Value::Null)
        .await
        .unwrap();

    let queued = runtime.get_execution(second).await.unwrap().unwrap();
    assert_eq!(queued.status, ExecutionStatus::Queued);
    assert_eq!(queued.execution_number, 2);

    let first = runtime.wait_for_completion(first).await.unwrap();
    let second = runtime.wait_for_completion(second).await.unwrap();
    assert_eq!(first.status, ExecutionStatus::Completed);
    assert_eq!(second.status, ExecutionStatus::Completed);
    assert!(second.start_time.unwrap() >= first.end_time.unwrap());
}

#[tokio::test]
async fn test_cancel_queued_execution() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("serial").with_id("serial-cancel");
    wf.settings.max_concurrency = Some(1);
    wf.add_node(NodeSpec::new("wait", "test.sleep").with_data("ms", 100));

    let first = runtime
        .start_execution(wf.clone(), ExecutionOptions::default(), Value::Null)
        .await
        .unwrap();
    let second = runtime
        .start_execution(wf, ExecutionOptions::default(), Value::Null)
        .await
        .unwrap();

    assert!(runtime.cancel_execution(second, "tester", "changed my mind").await);
    let second = runtime.wait_for_completion(second).await.unwrap();
    assert_eq!(second.status, ExecutionStatus::Cancelled);
    assert!(second.start_time.is_none());
    assert_eq!(second.node("wait").unwrap().status, NodeStatus::Cancelled);

    let first = runtime.wait_for_completion(first).await.unwrap();
    assert_eq!(first.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_registered_workflow_by_id() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("stored").with_id("stored");
    wf.add_node(constant("a", json!("hello")));
    runtime.register_workflow(wf).await;

    let id = runtime
        .start_workflow("stored", ExecutionOptions::default(), Value::Null)
        .await
        .unwrap();
    let record = runtime.wait_for_completion(id).await.unwrap();
    assert_eq!(record.result, Some(json!("hello")));

    let missing = runtime
        .start_workflow("missing", ExecutionOptions::default(), Value::Null)
        .await;
    assert!(matches!(
        missing,
        Err(EngineError::Workflow(WorkflowError::NotFound(_)))
    ));

    let mut paused = Workflow::new("paused").with_id("paused");
    paused.is_active = false;
    paused.add_node(constant("a", json!(1)));
    runtime.register_workflow(paused).await;
    let refused = runtime
        .start_workflow("paused", ExecutionOptions::default(), Value::Null)
        .await;
    assert!(matches!(
        refused,
        Err(EngineError::Workflow(WorkflowError::Invalid(_)))
    ));
}

#[tokio::test]
async fn test_execution_numbers_increase_per_workflow() {
    let runtime = fast_runtime();
    let mut wf = Workflow::new("numbered").with_id("numbered");
    wf.add_node(constant("a", json!(1)));

    for _ in 0..2 {
        runtime
            .execute(wf.clone(), ExecutionOptions::default(), Value::Null)
            .await
            .unwrap();
    }

    let numbers: Vec<_> = runtime
        .list_executions("numbered")
        .await
        .unwrap()
        .iter()
        .map(|r| (r.execution_number, r.status))
        .collect();
    assert_eq!(
        numbers,
        vec![(1, ExecutionStatus::Completed), (2, ExecutionStatus::Completed)]
    );
}
