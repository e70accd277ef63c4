use crate::retry::RetryDefaults;
use serde::{Deserialize, Serialize};
use std::path::Path;
use weavecore::{ExecutionOptions, FlowError, ResolvedOptions, Workflow};

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    /// Lets expressions read process environment variables through `$env`
    pub allow_env_access: bool,
    pub defaults: EngineDefaults,
    pub retry: RetryDefaults,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            allow_env_access: false,
            defaults: EngineDefaults::default(),
            retry: RetryDefaults::default(),
        }
    }
}

/// Fallbacks for run options that neither the submission nor the workflow
/// settings specify.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineDefaults {
    /// Zero disables the run timeout
    pub timeout_ms: u64,
    pub retry_failed_nodes: bool,
    pub continue_on_error: bool,
    pub max_concurrency: usize,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: 300_000,
            retry_failed_nodes: true,
            continue_on_error: false,
            max_concurrency: 5,
        }
    }
}

impl RuntimeConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Run options > workflow settings > engine defaults.
    pub fn resolve_options(&self, workflow: &Workflow, options: &ExecutionOptions) -> ResolvedOptions {
        let settings = &workflow.settings;
        ResolvedOptions {
            timeout_ms: options
                .timeout_ms
                .or(settings.timeout_ms)
                .unwrap_or(self.defaults.timeout_ms),
            max_retries: options.max_retries.or(settings.max_retries),
            retry_failed_nodes: options
                .retry_failed_nodes
                .unwrap_or(self.defaults.retry_failed_nodes),
            continue_on_error: options
                .continue_on_error
                .or(settings.continue_on_error)
                .unwrap_or(self.defaults.continue_on_error),
            max_concurrency: options
                .max_concurrency
                .or(settings.max_concurrency)
                .unwrap_or(self.defaults.max_concurrency)
                .max(1),
        }
    }
}
