//! Execution engine: admission, concurrency limits, cancellation and
//! timeouts. The per-run scheduling loop lives in [`scheduler`], the per-node
//! retry loop in [`node_runner`].

mod graph;
mod node_runner;
mod scheduler;

use crate::config::RuntimeConfig;
use crate::registry::NodeRegistry;
use crate::validator::WorkflowValidator;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use weavecore::{
    CancellationInfo, EngineError, EventBus, ExecutionEvent, ExecutionId, ExecutionOptions,
    ExecutionRecord, ExecutionStatus, ExecutionStore, ExecutionUpdate, LogEntry, NodeId,
    NodeStatus, NodeUpdate, ResolvedOptions, Value, Workflow, WorkflowId,
};

/// Runs workflows against a node registry, recording progress in an
/// [`ExecutionStore`].
///
/// Cloning is cheap; all clones share the same active-execution table and
/// admission queues.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    registry: Arc<NodeRegistry>,
    store: Arc<dyn ExecutionStore>,
    events: Arc<EventBus>,
    config: RuntimeConfig,
    active: Mutex<HashMap<ExecutionId, ActiveExecution>>,
    admission: Mutex<HashMap<WorkflowId, AdmissionSlot>>,
    /// Serialises execution numbering per engine
    numbering: Mutex<()>,
}

/// In-memory handle for a run that has not reached a terminal state.
struct ActiveExecution {
    token: CancellationToken,
    timeout: Option<JoinHandle<()>>,
    cancellation: Option<CancellationInfo>,
}

#[derive(Default)]
struct AdmissionSlot {
    running: usize,
    queue: VecDeque<PendingRun>,
}

/// A run that has been admitted (or is waiting for admission).
pub(crate) struct PendingRun {
    pub execution_id: ExecutionId,
    pub workflow: Arc<Workflow>,
    pub options: ResolvedOptions,
    pub trigger: Value,
    pub token: CancellationToken,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<NodeRegistry>,
        store: Arc<dyn ExecutionStore>,
        events: Arc<EventBus>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry,
                store,
                events,
                config,
                active: Mutex::new(HashMap::new()),
                admission: Mutex::new(HashMap::new()),
                numbering: Mutex::new(()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Validate, persist and admit a run.
    ///
    /// Only failures before the execution record exists are returned as
    /// errors. Everything afterwards is recorded on the record.
    pub async fn start_execution(
        &self,
        workflow: Workflow,
        options: ExecutionOptions,
        trigger: Value,
    ) -> Result<ExecutionId, EngineError> {
        let inner = &self.inner;
        if let Err(e) = WorkflowValidator::new(&inner.registry).validate_and_throw(&workflow) {
            warn!(workflow_id = %workflow.id, error = %e, "Rejected workflow");
            return Err(e.into());
        }

        let resolved = inner.config.resolve_options(&workflow, &options);
        let record = {
            let _numbering = inner.numbering.lock().await;
            let number = inner.store.count_executions(&workflow.id).await? + 1;
            let record = ExecutionRecord::new(&workflow, number, resolved.clone(), trigger.clone());
            inner.store.create_execution(record.clone()).await?;
            record
        };
        let execution_id = record.id;

        info!(
            execution_id = %execution_id,
            workflow_id = %workflow.id,
            execution_number = record.execution_number,
            "Execution created"
        );

        let token = CancellationToken::new();
        let timeout = inner.arm_timeout(execution_id, resolved.timeout_ms);
        inner.active.lock().await.insert(
            execution_id,
            ActiveExecution {
                token: token.clone(),
                timeout,
                cancellation: None,
            },
        );

        inner
            .clone()
            .admit(PendingRun {
                execution_id,
                workflow: Arc::new(workflow),
                options: resolved,
                trigger,
                token,
            })
            .await;

        Ok(execution_id)
    }

    /// Request cooperative cancellation. Returns false if the execution is
    /// not active or is already being cancelled.
    pub async fn cancel_execution(&self, execution_id: ExecutionId, actor: &str, reason: &str) -> bool {
        self.inner.cancel(execution_id, actor, reason, false).await
    }

    pub async fn is_execution_active(&self, execution_id: ExecutionId) -> bool {
        self.inner.active.lock().await.contains_key(&execution_id)
    }

    pub async fn get_execution(&self, execution_id: ExecutionId) -> Result<Option<ExecutionRecord>, EngineError> {
        Ok(self.inner.store.get_execution(execution_id).await?)
    }

    /// Wait until the execution reaches a terminal state and return its record.
    pub async fn wait_for_completion(&self, execution_id: ExecutionId) -> Result<ExecutionRecord, EngineError> {
        let mut events = self.inner.events.subscribe();
        loop {
            let record = self
                .inner
                .store
                .get_execution(execution_id)
                .await?
                .ok_or(EngineError::ExecutionNotFound(execution_id))?;
            if record.status.is_terminal() {
                return Ok(record);
            }

            loop {
                match events.recv().await {
                    Ok(ExecutionEvent::ExecutionFinished { execution_id: id, .. }) if id == execution_id => break,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => break,
                    Err(broadcast::error::RecvError::Closed) => return Ok(record),
                }
            }
        }
    }
}

impl EngineInner {
    /// Spawn a sleeper that cancels the run once its time budget is spent.
    fn arm_timeout(self: &Arc<Self>, execution_id: ExecutionId, timeout_ms: u64) -> Option<JoinHandle<()>> {
        if timeout_ms == 0 {
            return None;
        }
        let engine: Weak<EngineInner> = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            if let Some(engine) = engine.upgrade() {
                warn!(execution_id = %execution_id, timeout_ms, "Execution timed out");
                engine
                    .cancel(
                        execution_id,
                        "system",
                        &format!("Execution timed out after {}ms", timeout_ms),
                        true,
                    )
                    .await;
            }
        }))
    }

    /// Run now if the workflow has a free slot, otherwise enqueue.
    async fn admit(self: Arc<Self>, run: PendingRun) {
        let mut admission = self.admission.lock().await;
        let slot = admission.entry(run.workflow.id.clone()).or_default();

        if slot.running < run.options.max_concurrency {
            slot.running += 1;
            drop(admission);
            self.spawn_run(run);
            return;
        }

        let execution_id = run.execution_id;
        let workflow_id = run.workflow.id.clone();
        slot.queue.push_back(run);
        let position = slot.queue.len();

        // Still holding the admission lock: the run cannot be promoted
        // before it is recorded as queued.
        self.persist_execution(execution_id, ExecutionUpdate::status(ExecutionStatus::Queued))
            .await;
        self.log(
            execution_id,
            LogEntry::info(format!("Queued behind concurrency limit (position {})", position)),
        )
        .await;
        info!(execution_id = %execution_id, workflow_id = %workflow_id, position, "Execution queued");
        self.events.emit(ExecutionEvent::ExecutionQueued {
            execution_id,
            workflow_id,
            position,
            timestamp: Utc::now(),
        });
    }

    fn spawn_run(self: &Arc<Self>, run: PendingRun) {
        let engine = self.clone();
        tokio::spawn(async move {
            let execution_id = run.execution_id;
            let workflow_id = run.workflow.id.clone();
            engine.run_execution(run).await;
            engine.release(execution_id).await;
            engine.promote_next(&workflow_id).await;
        });
    }

    /// Hand the freed slot to the next queued run of the workflow, if any.
    async fn promote_next(self: &Arc<Self>, workflow_id: &str) {
        let mut admission = self.admission.lock().await;
        let Some(slot) = admission.get_mut(workflow_id) else {
            return;
        };

        match slot.queue.pop_front() {
            Some(next) => {
                debug!(execution_id = %next.execution_id, "Promoting queued execution");
                drop(admission);
                self.spawn_run(next);
            }
            None => {
                slot.running = slot.running.saturating_sub(1);
                if slot.running == 0 {
                    admission.remove(workflow_id);
                }
            }
        }
    }

    /// Drop the active handle and its pending timeout.
    async fn release(&self, execution_id: ExecutionId) {
        if let Some(handle) = self.active.lock().await.remove(&execution_id) {
            if let Some(timeout) = handle.timeout {
                timeout.abort();
            }
        }
    }

    async fn cancellation_info(&self, execution_id: ExecutionId) -> Option<CancellationInfo> {
        self.active
            .lock()
            .await
            .get(&execution_id)
            .and_then(|h| h.cancellation.clone())
    }

    async fn cancel(self: &Arc<Self>, execution_id: ExecutionId, actor: &str, reason: &str, from_timer: bool) -> bool {
        let info = CancellationInfo {
            cancelled_by: actor.to_string(),
            reason: reason.to_string(),
            cancelled_at: Utc::now(),
        };

        {
            let mut active = self.active.lock().await;
            let Some(handle) = active.get_mut(&execution_id) else {
                return false;
            };
            if handle.token.is_cancelled() {
                return false;
            }
            handle.cancellation = Some(info.clone());
            // The timer task must not abort itself while it is cancelling.
            if let Some(timeout) = handle.timeout.take() {
                if !from_timer {
                    timeout.abort();
                }
            }
            handle.token.cancel();
        }

        info!(execution_id = %execution_id, actor, reason, "Cancellation requested");

        let queued = {
            let mut admission = self.admission.lock().await;
            admission.values_mut().find_map(|slot| {
                let pos = slot.queue.iter().position(|r| r.execution_id == execution_id)?;
                slot.queue.remove(pos)
            })
        };
        if let Some(run) = queued {
            self.finish_unstarted(run, info).await;
        }
        true
    }

    /// Finalize a run that was cancelled while still waiting for admission.
    async fn finish_unstarted(&self, run: PendingRun, info: CancellationInfo) {
        let execution_id = run.execution_id;
        for node in &run.workflow.nodes {
            self.persist_node(execution_id, &node.id, NodeUpdate::status(NodeStatus::Cancelled))
                .await;
        }
        self.log(
            execution_id,
            LogEntry::warn(format!("Cancelled before start: {}", info.reason)),
        )
        .await;
        let now = Utc::now();
        self.persist_execution(
            execution_id,
            ExecutionUpdate {
                end_time: Some(now),
                duration_ms: Some(0),
                error_message: Some(info.reason.clone()),
                cancellation: Some(info),
                ..ExecutionUpdate::status(ExecutionStatus::Cancelled)
            },
        )
        .await;
        self.events.emit(ExecutionEvent::ExecutionFinished {
            execution_id,
            workflow_id: run.workflow.id.clone(),
            status: ExecutionStatus::Cancelled,
            duration_ms: 0,
            timestamp: now,
        });
        self.release(execution_id).await;
    }

    async fn persist_execution(&self, execution_id: ExecutionId, update: ExecutionUpdate) {
        if let Err(e) = self.store.update_execution(execution_id, update).await {
            warn!(execution_id = %execution_id, error = %e, "Failed to update execution");
        }
    }

    async fn persist_node(&self, execution_id: ExecutionId, node_id: &NodeId, update: NodeUpdate) {
        if let Err(e) = self.store.update_node(execution_id, node_id, update).await {
            warn!(execution_id = %execution_id, node_id = %node_id, error = %e, "Failed to update node");
        }
    }

    async fn log(&self, execution_id: ExecutionId, entry: LogEntry) {
        if let Err(e) = self.store.append_log(execution_id, entry).await {
            debug!(execution_id = %execution_id, error = %e, "Dropped execution log entry");
        }
    }
}
