use crate::{config_or_input, type_name};
use async_trait::async_trait;
use serde_json::Map;
use weavecore::{Node, NodeDefinition, NodeError, RetryClass, Value};

/// Parse a JSON string (the `json` config entry or the first input)
pub struct JsonParseNode;

#[async_trait]
impl Node for JsonParseNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("transform.json_parse", "transform")
            .with_display_name("Parse JSON")
            .with_description("Parse JSON string")
            .with_retry_class(RetryClass::Local)
    }

    async fn execute(&self, inputs: &[Value], config: &Map<String, Value>) -> Result<Value, NodeError> {
        let input = config_or_input(config, "json", inputs)
            .ok_or_else(|| NodeError::MissingInput("json".to_string()))?;
        let text = input.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: "json".to_string(),
            expected: "string".to_string(),
            actual: type_name(input).to_string(),
        })?;

        serde_json::from_str(text).map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))
    }
}

/// Stringify a value (the `value` config entry or the first input)
pub struct JsonStringifyNode;

#[async_trait]
impl Node for JsonStringifyNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("transform.json_stringify", "transform")
            .with_display_name("Stringify JSON")
            .with_description("Convert value to JSON string")
            .with_retry_class(RetryClass::Local)
    }

    async fn execute(&self, inputs: &[Value], config: &Map<String, Value>) -> Result<Value, NodeError> {
        let value = config_or_input(config, "value", inputs)
            .ok_or_else(|| NodeError::MissingInput("value".to_string()))?;
        let pretty = config.get("pretty").and_then(Value::as_bool).unwrap_or(false);

        let text = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(Value::String(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_parse() {
        let out = JsonParseNode
            .execute(&[json!(r#"{"a": [1, 2]}"#)], &Map::new())
            .await
            .unwrap();
        assert_eq!(out, json!({"a": [1, 2]}));

        let err = JsonParseNode.execute(&[json!(5)], &Map::new()).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidInputType { .. }));

        let err = JsonParseNode.execute(&[json!("{oops")], &Map::new()).await.unwrap_err();
        assert!(err.to_string().contains("JSON parse error"));

        assert!(matches!(
            JsonParseNode.execute(&[], &Map::new()).await,
            Err(NodeError::MissingInput(_))
        ));
    }

    #[tokio::test]
    async fn test_stringify() {
        let out = JsonStringifyNode
            .execute(&[json!({"a": 1})], &Map::new())
            .await
            .unwrap();
        assert_eq!(out, json!(r#"{"a":1}"#));

        let mut config = Map::new();
        config.insert("value".into(), json!([true]));
        config.insert("pretty".into(), json!(true));
        let out = JsonStringifyNode.execute(&[json!("ignored")], &config).await.unwrap();
        assert_eq!(out, json!("[\n  true\n]"));
    }
}
