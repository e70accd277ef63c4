//! Workflow execution runtime
//!
//! This crate provides the engine that runs workflows: the node registry,
//! graph validation, retry policies, the in-memory execution store and
//! dependency-ordered parallel scheduling.

mod config;
mod engine;
mod registry;
mod retry;
mod runtime;
mod store;
mod validator;

pub use config::{EngineDefaults, RuntimeConfig};
pub use engine::ExecutionEngine;
pub use registry::NodeRegistry;
pub use retry::{RetryDefaults, RetryPolicy, RETRY_CONFIG_KEY};
pub use runtime::WeaveRuntime;
pub use store::InMemoryExecutionStore;
pub use validator::{ValidationCode, ValidationIssue, ValidationResult, WorkflowValidator};
