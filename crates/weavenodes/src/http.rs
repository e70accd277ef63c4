use async_trait::async_trait;
use serde_json::{json, Map};
use std::time::Duration;
use tracing::debug;
use weavecore::{Node, NodeContext, NodeDefinition, NodeError, NodeResult, RetryClass, Value};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// HTTP request node
///
/// Config: `url` (required), `method` (default GET), `headers` (object of
/// strings), `body` (sent as JSON unless it is a string), `timeoutMs`, and
/// `failOnStatus` (default true) which turns 4xx/5xx answers into errors so
/// the engine retries them.
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn build(&self, config: &Map<String, Value>) -> Result<reqwest::RequestBuilder, NodeError> {
        let url = config
            .get("url")
            .ok_or_else(|| NodeError::Configuration("Missing config: url".to_string()))?
            .as_str()
            .ok_or_else(|| NodeError::InvalidInputType {
                field: "url".to_string(),
                expected: "string".to_string(),
                actual: crate::type_name(&config["url"]).to_string(),
            })?;
        let method = config.get("method").and_then(Value::as_str).unwrap_or("GET");

        let mut request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            "HEAD" => self.client.head(url),
            _ => return Err(NodeError::Configuration(format!("Unsupported method: {}", method))),
        };

        if let Some(Value::Object(headers)) = config.get("headers") {
            for (key, value) in headers {
                if let Some(val_str) = value.as_str() {
                    request = request.header(key, val_str);
                }
            }
        }

        request = match config.get("body") {
            None | Some(Value::Null) => request,
            Some(Value::String(text)) => request.body(text.clone()),
            Some(json) => request.json(json),
        };

        let timeout_ms = config
            .get("timeoutMs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        Ok(request.timeout(Duration::from_millis(timeout_ms)))
    }

    async fn send(&self, config: &Map<String, Value>) -> Result<Value, NodeError> {
        let request = self.build(config)?;
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                NodeError::Timeout {
                    millis: config.get("timeoutMs").and_then(Value::as_u64).unwrap_or(DEFAULT_TIMEOUT_MS),
                }
            } else {
                NodeError::ExecutionFailed(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();

        let body_text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;
        let body = serde_json::from_str(&body_text).unwrap_or(Value::String(body_text));

        let fail_on_status = config.get("failOnStatus").and_then(Value::as_bool).unwrap_or(true);
        if fail_on_status && (status.is_client_error() || status.is_server_error()) {
            return Err(NodeError::ExecutionFailed(format!(
                "HTTP {} from server: {}",
                status.as_u16(),
                body
            )));
        }

        Ok(json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
        }))
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for HttpRequestNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("http.request", "http")
            .with_display_name("HTTP Request")
            .with_description("Make HTTP requests")
            .with_retry_class(RetryClass::External)
    }

    async fn execute(&self, _inputs: &[Value], config: &Map<String, Value>) -> Result<Value, NodeError> {
        self.send(config).await
    }

    async fn execute_with_context(&self, ctx: NodeContext) -> NodeResult {
        let method = ctx.get_config_or("method", json!("GET"));
        let url = ctx.get_config_or("url", Value::Null);
        ctx.events.info(format!("{} {}", method.as_str().unwrap_or("GET"), url));
        debug!(node_id = %ctx.node_id, attempt = ctx.retry_count + 1, "Sending HTTP request");

        tokio::select! {
            _ = ctx.cancellation.cancelled() => NodeResult::failure(&NodeError::Cancelled),
            result = self.send(&ctx.config) => match result {
                Ok(output) => {
                    ctx.events.info(format!("Response status: {}", output["status"]));
                    NodeResult::success(output)
                }
                Err(e) => NodeResult::failure(&e),
            },
        }
    }
}
