use crate::engine::ExecutionEngine;
use crate::registry::NodeRegistry;
use crate::store::InMemoryExecutionStore;
use crate::validator::{ValidationResult, WorkflowValidator};
use crate::RuntimeConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use weavecore::{
    EngineError, EventBus, ExecutionEvent, ExecutionId, ExecutionOptions, ExecutionRecord,
    ExecutionStore, Value, Workflow, WorkflowError, WorkflowId,
};

/// Main entry point: a node registry, an execution engine and the
/// workflows registered with it.
pub struct WeaveRuntime {
    engine: ExecutionEngine,
    event_bus: Arc<EventBus>,
    workflows: Arc<RwLock<HashMap<WorkflowId, Workflow>>>,
}

impl WeaveRuntime {
    /// Create a runtime with an empty registry and default settings
    pub fn new() -> Self {
        Self::with_config(NodeRegistry::new(), RuntimeConfig::default())
    }

    pub fn with_config(registry: NodeRegistry, config: RuntimeConfig) -> Self {
        Self::with_store(registry, Arc::new(InMemoryExecutionStore::new()), config)
    }

    /// Create a runtime that records executions in `store`
    pub fn with_store(registry: NodeRegistry, store: Arc<dyn ExecutionStore>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let engine = ExecutionEngine::new(Arc::new(registry), store, event_bus.clone(), config);

        Self {
            engine,
            event_bus,
            workflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        self.engine.registry()
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        self.engine.store()
    }

    /// Check a workflow against the registered node types without running it
    pub fn validate(&self, workflow: &Workflow) -> ValidationResult {
        WorkflowValidator::new(self.engine.registry()).validate(workflow)
    }

    /// Register a workflow so it can be started by id
    pub async fn register_workflow(&self, workflow: Workflow) {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id.clone(), workflow);
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    /// Start a registered workflow by id. Inactive workflows are refused.
    pub async fn start_workflow(
        &self,
        workflow_id: &str,
        options: ExecutionOptions,
        trigger: Value,
    ) -> Result<ExecutionId, EngineError> {
        let workflow = self
            .get_workflow(workflow_id)
            .await
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;
        if !workflow.is_active {
            return Err(WorkflowError::Invalid(format!("Workflow {} is inactive", workflow_id)).into());
        }
        self.engine.start_execution(workflow, options, trigger).await
    }

    pub async fn start_execution(
        &self,
        workflow: Workflow,
        options: ExecutionOptions,
        trigger: Value,
    ) -> Result<ExecutionId, EngineError> {
        self.engine.start_execution(workflow, options, trigger).await
    }

    /// Start a workflow and wait for its terminal record
    pub async fn execute(
        &self,
        workflow: Workflow,
        options: ExecutionOptions,
        trigger: Value,
    ) -> Result<ExecutionRecord, EngineError> {
        let execution_id = self.engine.start_execution(workflow, options, trigger).await?;
        self.engine.wait_for_completion(execution_id).await
    }

    pub async fn cancel_execution(&self, execution_id: ExecutionId, actor: &str, reason: &str) -> bool {
        self.engine.cancel_execution(execution_id, actor, reason).await
    }

    pub async fn is_execution_active(&self, execution_id: ExecutionId) -> bool {
        self.engine.is_execution_active(execution_id).await
    }

    pub async fn get_execution(&self, execution_id: ExecutionId) -> Result<Option<ExecutionRecord>, EngineError> {
        self.engine.get_execution(execution_id).await
    }

    /// Executions of one workflow, oldest first
    pub async fn list_executions(&self, workflow_id: &str) -> Result<Vec<ExecutionRecord>, EngineError> {
        Ok(self.engine.store().list_executions(workflow_id).await?)
    }

    pub async fn wait_for_completion(&self, execution_id: ExecutionId) -> Result<ExecutionRecord, EngineError> {
        self.engine.wait_for_completion(execution_id).await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for WeaveRuntime {
    fn default() -> Self {
        Self::new()
    }
}
