use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use weavecore::{
    ExecutionId, ExecutionRecord, ExecutionStore, ExecutionUpdate, LogEntry, NodeUpdate, StoreError,
};

/// Process-local execution store.
///
/// Records become read-only once they reach a terminal status; late writes
/// (e.g. from a node that finished after its run was cancelled) are
/// rejected with [`StoreError::Finalized`].
#[derive(Default)]
pub struct InMemoryExecutionStore {
    records: RwLock<HashMap<ExecutionId, ExecutionRecord>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_open_record<F>(&self, id: ExecutionId, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut ExecutionRecord) -> Result<(), StoreError>,
    {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if record.status.is_terminal() {
            return Err(StoreError::Finalized(id));
        }
        f(record)
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_execution(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn get_execution(&self, id: ExecutionId) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn count_executions(&self, workflow_id: &str) -> Result<u64, StoreError> {
        let records = self.records.read().await;
        Ok(records.values().filter(|r| r.workflow_id == workflow_id).count() as u64)
    }

    async fn list_executions(&self, workflow_id: &str) -> Result<Vec<ExecutionRecord>, StoreError> {
        let records = self.records.read().await;
        let mut list: Vec<_> = records
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect();
        list.sort_by_key(|r| r.execution_number);
        Ok(list)
    }

    async fn update_execution(&self, id: ExecutionId, update: ExecutionUpdate) -> Result<(), StoreError> {
        self.with_open_record(id, |record| {
            if let Some(status) = update.status {
                record.status = status;
            }
            if let Some(t) = update.start_time {
                record.start_time = Some(t);
            }
            if let Some(t) = update.end_time {
                record.end_time = Some(t);
            }
            if let Some(d) = update.duration_ms {
                record.duration_ms = Some(d);
            }
            if let Some(metrics) = update.metrics {
                record.metrics = metrics;
            }
            if let Some(result) = update.result {
                record.result = Some(result);
            }
            if let Some(message) = update.error_message {
                record.error_message = Some(message);
            }
            if let Some(node_id) = update.error_node_id {
                record.error_node_id = Some(node_id);
            }
            if let Some(cancellation) = update.cancellation {
                record.cancellation = Some(cancellation);
            }
            Ok(())
        })
        .await
    }

    async fn update_node(&self, id: ExecutionId, node_id: &str, update: NodeUpdate) -> Result<(), StoreError> {
        self.with_open_record(id, |record| {
            let entry = record.node_mut(node_id).ok_or_else(|| StoreError::NodeNotFound {
                execution_id: id,
                node_id: node_id.to_string(),
            })?;
            if let Some(status) = update.status {
                entry.status = status;
            }
            if let Some(t) = update.start_time {
                entry.start_time = Some(t);
            }
            if let Some(t) = update.end_time {
                entry.end_time = Some(t);
            }
            if let Some(d) = update.duration_ms {
                entry.duration_ms = Some(d);
            }
            if let Some(input) = update.input {
                entry.input = Some(input);
            }
            if let Some(output) = update.output {
                entry.output = Some(output);
            }
            if let Some(error) = update.error {
                entry.error = Some(error);
            }
            if let Some(stack) = update.error_stack {
                entry.error_stack = Some(stack);
            }
            if let Some(count) = update.retry_count {
                entry.retry_count = count;
            }
            Ok(())
        })
        .await
    }

    async fn append_log(&self, id: ExecutionId, entry: LogEntry) -> Result<(), StoreError> {
        self.with_open_record(id, |record| {
            record.logs.push(entry);
            Ok(())
        })
        .await
    }

    async fn append_node_logs(
        &self,
        id: ExecutionId,
        node_id: &str,
        entries: Vec<LogEntry>,
    ) -> Result<(), StoreError> {
        self.with_open_record(id, |record| {
            let node = record.node_mut(node_id).ok_or_else(|| StoreError::NodeNotFound {
                execution_id: id,
                node_id: node_id.to_string(),
            })?;
            node.logs.extend(entries);
            Ok(())
        })
        .await
    }
}
