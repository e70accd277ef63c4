//! Per-node retry policy and backoff.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use weavecore::RetryClass;

/// Key inside a node's `data` holding an explicit retry override.
pub const RETRY_CONFIG_KEY: &str = "retry";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Proportional jitter, e.g. 0.1 adds up to 10% on top of each delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: exponential from the base
    /// delay plus jitter. `max_delay_ms` bounds the jittered value too.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = if self.jitter > 0.0 {
            (base as f64 * self.jitter * rand::random::<f64>()) as u64
        } else {
            0
        };
        Duration::from_millis(base.saturating_add(jitter).min(self.max_delay_ms))
    }

    /// Capped exponential delay without jitter.
    pub fn base_delay(&self, attempt: u32) -> u64 {
        let factor = 2u64.saturating_pow(attempt);
        self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms)
    }

    /// Sum of the un-jittered delays over a full retry budget.
    pub fn total_backoff(&self) -> Duration {
        Duration::from_millis((0..self.max_retries).map(|a| self.base_delay(a)).sum())
    }

    /// Overlay fields present in a node's `retry` config object.
    fn overlay(mut self, config: &Map<String, Value>) -> Self {
        if let Some(v) = config.get("maxRetries").and_then(Value::as_u64) {
            self.max_retries = v as u32;
        }
        if let Some(v) = config.get("baseDelayMs").and_then(Value::as_u64) {
            self.base_delay_ms = v;
        }
        if let Some(v) = config.get("maxDelayMs").and_then(Value::as_u64) {
            self.max_delay_ms = v;
        }
        if let Some(v) = config.get("jitter").and_then(Value::as_f64) {
            self.jitter = v.max(0.0);
        }
        self
    }
}

/// Default policies. Precedence when resolving a node's policy:
/// explicit node config > per-type override > retry class default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryDefaults {
    pub standard: RetryPolicy,
    pub local: RetryPolicy,
    pub external: RetryPolicy,
    pub per_type: HashMap<String, RetryPolicy>,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            standard: RetryPolicy::default(),
            local: RetryPolicy {
                max_retries: 1,
                base_delay_ms: 200,
                max_delay_ms: 1_000,
                jitter: 0.0,
            },
            external: RetryPolicy {
                max_retries: 5,
                base_delay_ms: 2_000,
                max_delay_ms: 60_000,
                jitter: 0.2,
            },
            per_type: HashMap::new(),
        }
    }
}

impl RetryDefaults {
    /// Resolve the policy for one node.
    ///
    /// `run_max_retries` is the run-level `maxRetries` option; it replaces
    /// the ceiling of the standard policy only.
    pub fn resolve(
        &self,
        node_type: &str,
        class: RetryClass,
        node_data: &Map<String, Value>,
        run_max_retries: Option<u32>,
    ) -> RetryPolicy {
        let mut policy = match self.per_type.get(node_type) {
            Some(policy) => policy.clone(),
            None => match class {
                RetryClass::Local => self.local.clone(),
                RetryClass::External => self.external.clone(),
                RetryClass::Standard => {
                    let mut policy = self.standard.clone();
                    if let Some(max) = run_max_retries {
                        policy.max_retries = max;
                    }
                    policy
                }
            },
        };

        if let Some(Value::Object(explicit)) = node_data.get(RETRY_CONFIG_KEY) {
            policy = policy.overlay(explicit);
        }
        policy
    }
}
