use super::graph::ExecutionGraph;
use super::node_runner::{NodeJob, NodeOutcome};
use super::{EngineInner, PendingRun};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Map;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};
use weavecore::{
    CancellationInfo, ExecutionEvent, ExecutionId, ExecutionMetrics, ExecutionStatus, ExecutionUpdate,
    ExpressionContext, LogEntry, NodeId, NodeInput, NodeSnapshot, NodeSpec, NodeStatus,
    NodeUpdate, Value,
};

/// How the scheduling loop ended.
enum RunOutcome {
    Exhausted,
    Cancelled,
    /// Unprocessed nodes remain but none can become ready
    Stalled(String),
}

/// Scheduler-side view of a run.
#[derive(Default)]
struct RunState {
    status: HashMap<NodeId, NodeStatus>,
    outputs: HashMap<NodeId, Value>,
    snapshots: HashMap<NodeId, NodeSnapshot>,
    /// Output handle chosen by branching nodes
    branches: HashMap<NodeId, String>,
    /// Nodes skipped because no branch led to them. Their dependents are
    /// skipped the same way rather than treated as failed.
    inactive: HashSet<NodeId>,
    durations: Vec<u64>,
    first_failure: Option<(NodeId, String)>,
}

/// Whether a ready node runs, and with which inputs.
enum Gate {
    Run(Vec<NodeInput>),
    Skip { reason: String, inactive: bool },
}

impl EngineInner {
    pub(crate) async fn run_execution(self: &Arc<Self>, run: PendingRun) {
        let execution_id = run.execution_id;
        let workflow = run.workflow.clone();
        let started_at = Utc::now();

        self.persist_execution(
            execution_id,
            ExecutionUpdate {
                start_time: Some(started_at),
                ..ExecutionUpdate::status(ExecutionStatus::Running)
            },
        )
        .await;
        self.log(execution_id, LogEntry::info(format!("Execution started: {}", workflow.name)))
            .await;
        self.events.emit(ExecutionEvent::ExecutionStarted {
            execution_id,
            workflow_id: workflow.id.clone(),
            timestamp: started_at,
        });
        info!(execution_id = %execution_id, workflow_id = %workflow.id, "Starting workflow execution");

        let graph = ExecutionGraph::build(&workflow);
        let mut state = RunState::default();
        let outcome = self.schedule(&run, &graph, &mut state).await;

        self.finalize(&run, &graph, state, outcome, started_at).await;
    }

    async fn schedule(
        self: &Arc<Self>,
        run: &PendingRun,
        graph: &ExecutionGraph<'_>,
        state: &mut RunState,
    ) -> RunOutcome {
        let execution_id = run.execution_id;
        let names: HashMap<String, NodeId> = run
            .workflow
            .nodes
            .iter()
            .map(|n| (n.display_name.clone(), n.id.clone()))
            .collect();
        let mut processed: HashSet<NodeId> = HashSet::new();
        let max_iterations = 2 * graph.node_count();

        for _ in 0..max_iterations {
            if run.token.is_cancelled() {
                return RunOutcome::Cancelled;
            }
            if processed.len() == graph.node_count() {
                return RunOutcome::Exhausted;
            }

            let ready = graph.ready_nodes(|id| processed.contains(id), &state.status);
            if ready.is_empty() {
                return RunOutcome::Stalled(format!(
                    "No runnable nodes left but {} node(s) were never processed",
                    graph.node_count() - processed.len()
                ));
            }

            let mut dispatch = Vec::new();
            for node in ready {
                processed.insert(node.id.clone());
                match gate(graph, node, state, run.options.continue_on_error) {
                    Gate::Run(inputs) => dispatch.push((node, inputs)),
                    Gate::Skip { reason, inactive } => {
                        self.skip_node(execution_id, node, &reason).await;
                        state.status.insert(node.id.clone(), NodeStatus::Skipped);
                        if inactive {
                            state.inactive.insert(node.id.clone());
                        }
                    }
                }
            }

            let expressions = ExpressionContext {
                execution_id,
                workflow_id: run.workflow.id.clone(),
                nodes: state.snapshots.clone(),
                names: names.clone(),
                trigger: run.trigger.clone(),
                variables: run.workflow.settings.variables.clone(),
                allow_env: self.config.allow_env_access,
                ..Default::default()
            };

            let mut running = FuturesUnordered::new();
            for (node, inputs) in dispatch {
                state.status.insert(node.id.clone(), NodeStatus::Running);
                let job = NodeJob {
                    execution_id,
                    workflow_id: run.workflow.id.clone(),
                    node: node.clone(),
                    inputs,
                    expressions: expressions.clone(),
                    trigger: run.trigger.clone(),
                    options: run.options.clone(),
                    token: run.token.clone(),
                };
                let node_id = node.id.clone();
                let handle = tokio::spawn(self.clone().run_node(job));
                running.push(async move { (node_id, handle.await) });
            }

            loop {
                tokio::select! {
                    biased;
                    _ = run.token.cancelled() => return RunOutcome::Cancelled,
                    next = running.next() => match next {
                        None => break,
                        Some((_, Ok(outcome))) => apply(state, outcome),
                        Some((node_id, Err(e))) => {
                            error!(execution_id = %execution_id, node_id = %node_id, error = %e, "Node task aborted");
                            let message = format!("Node task aborted: {}", e);
                            self.persist_node(
                                execution_id,
                                &node_id,
                                NodeUpdate {
                                    error: Some(message.clone()),
                                    end_time: Some(Utc::now()),
                                    ..NodeUpdate::status(NodeStatus::Failed)
                                },
                            )
                            .await;
                            state.status.insert(node_id.clone(), NodeStatus::Failed);
                            state.first_failure.get_or_insert((node_id, message));
                        }
                    },
                }
            }
        }

        if processed.len() == graph.node_count() && !run.token.is_cancelled() {
            return RunOutcome::Exhausted;
        }
        RunOutcome::Stalled(format!(
            "Scheduling did not converge within {} iterations",
            max_iterations
        ))
    }

    async fn skip_node(&self, execution_id: ExecutionId, node: &NodeSpec, reason: &str) {
        info!(execution_id = %execution_id, node_id = %node.id, reason, "Skipping node");
        let now = Utc::now();
        self.persist_node(
            execution_id,
            &node.id,
            NodeUpdate {
                start_time: Some(now),
                end_time: Some(now),
                duration_ms: Some(0),
                ..NodeUpdate::status(NodeStatus::Skipped)
            },
        )
        .await;
        if let Err(e) = self
            .store
            .append_node_logs(execution_id, &node.id, vec![LogEntry::info(reason).for_node(&node.id)])
            .await
        {
            warn!(execution_id = %execution_id, node_id = %node.id, error = %e, "Failed to append node log");
        }
        self.events.emit(ExecutionEvent::NodeSkipped {
            execution_id,
            node_id: node.id.clone(),
            reason: reason.to_string(),
            timestamp: now,
        });
    }

    async fn finalize(
        &self,
        run: &PendingRun,
        graph: &ExecutionGraph<'_>,
        state: RunState,
        outcome: RunOutcome,
        started_at: DateTime<Utc>,
    ) {
        let execution_id = run.execution_id;
        let ended_at = Utc::now();
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;

        let mut update = ExecutionUpdate {
            end_time: Some(ended_at),
            duration_ms: Some(duration_ms),
            ..Default::default()
        };

        let status = match outcome {
            RunOutcome::Cancelled => {
                let info = self.cancellation_info(execution_id).await.unwrap_or_else(|| CancellationInfo {
                    cancelled_by: "system".to_string(),
                    reason: "Execution cancelled".to_string(),
                    cancelled_at: ended_at,
                });
                self.settle_unfinished(run, &state, NodeStatus::Cancelled).await;
                self.log(execution_id, LogEntry::warn(format!("Execution cancelled: {}", info.reason)))
                    .await;
                update.error_message = Some(info.reason.clone());
                update.cancellation = Some(info);
                ExecutionStatus::Cancelled
            }
            RunOutcome::Stalled(message) => {
                error!(execution_id = %execution_id, "{}", message);
                self.settle_unfinished(run, &state, NodeStatus::Skipped).await;
                self.log(execution_id, LogEntry::error(message.clone())).await;
                update.error_message = Some(message);
                ExecutionStatus::Failed
            }
            RunOutcome::Exhausted => {
                update.result = Some(terminal_result(graph, &state));
                match &state.first_failure {
                    Some((node_id, message)) if !run.options.continue_on_error => {
                        update.error_message = Some(format!("Node {} failed: {}", node_id, message));
                        update.error_node_id = Some(node_id.clone());
                        ExecutionStatus::Failed
                    }
                    _ => ExecutionStatus::Completed,
                }
            }
        };

        let metrics = metrics(graph.node_count(), &state, status);
        self.log(
            execution_id,
            LogEntry::info(format!(
                "Execution finished with status {:?}: {}/{} nodes succeeded, {} failed, {} skipped",
                status, metrics.completed_nodes, metrics.total_nodes, metrics.failed_nodes, metrics.skipped_nodes
            )),
        )
        .await;

        update.status = Some(status);
        update.metrics = Some(metrics);
        self.persist_execution(execution_id, update).await;

        info!(
            execution_id = %execution_id,
            status = ?status,
            duration_ms,
            "Workflow execution finished"
        );
        self.events.emit(ExecutionEvent::ExecutionFinished {
            execution_id,
            workflow_id: run.workflow.id.clone(),
            status,
            duration_ms,
            timestamp: ended_at,
        });
    }

    /// Move every node that never settled to `status`.
    async fn settle_unfinished(&self, run: &PendingRun, state: &RunState, status: NodeStatus) {
        for node in &run.workflow.nodes {
            let settled = state.status.get(&node.id).is_some_and(|s| s.is_terminal());
            if !settled {
                self.persist_node(
                    run.execution_id,
                    &node.id,
                    NodeUpdate {
                        end_time: Some(Utc::now()),
                        ..NodeUpdate::status(status)
                    },
                )
                .await;
            }
        }
    }
}

/// Decide whether `node` runs. Failed or skipped sources keep their slot in
/// the input list as `null` so that inputs line up with incoming edges.
fn gate(graph: &ExecutionGraph<'_>, node: &NodeSpec, state: &RunState, continue_on_error: bool) -> Gate {
    let incoming = graph.incoming(&node.id);
    if incoming.is_empty() {
        return Gate::Run(Vec::new());
    }

    let mut inputs = Vec::new();
    let mut failed = Vec::new();
    let mut dead = 0;

    for edge in incoming {
        match state.status.get(&edge.source) {
            Some(NodeStatus::Success) => {
                let chosen = state.branches.get(&edge.source);
                let taken = match (chosen, &edge.source_handle) {
                    (Some(branch), Some(handle)) => branch == handle,
                    _ => true,
                };
                if taken {
                    inputs.push(NodeInput {
                        source_node_id: edge.source.clone(),
                        source_handle: edge.source_handle.clone(),
                        target_handle: edge.target_handle.clone(),
                        value: state.outputs.get(&edge.source).cloned().unwrap_or(Value::Null),
                    });
                } else {
                    dead += 1;
                }
            }
            Some(NodeStatus::Skipped) if state.inactive.contains(&edge.source) => dead += 1,
            _ => {
                failed.push(edge.source.as_str());
                inputs.push(NodeInput {
                    source_node_id: edge.source.clone(),
                    source_handle: edge.source_handle.clone(),
                    target_handle: edge.target_handle.clone(),
                    value: Value::Null,
                });
            }
        }
    }

    if !failed.is_empty() && !continue_on_error {
        return Gate::Skip {
            reason: format!("Skipped: upstream node(s) {} did not succeed", failed.join(", ")),
            inactive: false,
        };
    }
    if inputs.is_empty() && dead > 0 {
        return Gate::Skip {
            reason: "Skipped: no active branch leads to this node".to_string(),
            inactive: true,
        };
    }
    Gate::Run(inputs)
}

fn apply(state: &mut RunState, outcome: NodeOutcome) {
    let NodeOutcome {
        node_id,
        status,
        input,
        output,
        branch,
        error,
        duration_ms,
    } = outcome;

    match status {
        NodeStatus::Success => {
            let output = output.unwrap_or(Value::Null);
            state.snapshots.insert(
                node_id.clone(),
                NodeSnapshot {
                    input,
                    output: Some(output.clone()),
                },
            );
            state.outputs.insert(node_id.clone(), output);
            if let Some(branch) = branch {
                state.branches.insert(node_id.clone(), branch);
            }
            state.durations.push(duration_ms);
        }
        NodeStatus::Failed => {
            state.snapshots.insert(node_id.clone(), NodeSnapshot { input, output: None });
            let message = error.unwrap_or_else(|| "unknown error".to_string());
            state.first_failure.get_or_insert((node_id.clone(), message));
        }
        _ => {}
    }
    state.status.insert(node_id, status);
}

/// Output of the single terminal node, or display name -> output when
/// there are several.
fn terminal_result(graph: &ExecutionGraph<'_>, state: &RunState) -> Value {
    let terminal = graph.terminal_nodes();
    if let [only] = terminal.as_slice() {
        return state.outputs.get(&only.id).cloned().unwrap_or(Value::Null);
    }
    let map: Map<String, Value> = terminal
        .iter()
        .map(|node| {
            (
                node.display_name.clone(),
                state.outputs.get(&node.id).cloned().unwrap_or(Value::Null),
            )
        })
        .collect();
    Value::Object(map)
}

fn metrics(total: usize, state: &RunState, status: ExecutionStatus) -> ExecutionMetrics {
    let count = |wanted: NodeStatus| state.status.values().filter(|s| **s == wanted).count();
    let mut skipped = count(NodeStatus::Skipped);
    if status == ExecutionStatus::Failed {
        // Nodes that were never reached after a stall were settled as skipped.
        skipped += total - state.status.len();
    }
    let average_node_duration_ms = if state.durations.is_empty() {
        0
    } else {
        state.durations.iter().sum::<u64>() / state.durations.len() as u64
    };

    ExecutionMetrics {
        total_nodes: total,
        completed_nodes: count(NodeStatus::Success),
        failed_nodes: count(NodeStatus::Failed),
        skipped_nodes: skipped,
        average_node_duration_ms,
    }
}
