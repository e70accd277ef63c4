use crate::config_or_input;
use async_trait::async_trait;
use serde_json::{json, Map};
use weavecore::{execute_timed, Node, NodeContext, NodeDefinition, NodeError, NodeResult, RetryClass, Value};

/// Compares `left` with `right` and routes through the `"true"` or
/// `"false"` output handle.
///
/// `left` defaults to the first input. Both sides usually come from
/// expressions such as `{{Fetch.status}}`.
pub struct ConditionNode;

#[async_trait]
impl Node for ConditionNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("logic.condition", "logic")
            .with_display_name("Condition")
            .with_description("Routes to the true or false branch depending on a comparison")
            .with_retry_class(RetryClass::Local)
    }

    async fn execute(&self, inputs: &[Value], config: &Map<String, Value>) -> Result<Value, NodeError> {
        let result = evaluate(inputs, config)?;
        Ok(json!({
            "result": result,
            "input": inputs.first().cloned().unwrap_or(Value::Null),
        }))
    }

    async fn execute_with_context(&self, ctx: NodeContext) -> NodeResult {
        let result = execute_timed(self, &ctx).await;
        if !result.success {
            return result;
        }
        let branch = if result.output["result"] == Value::Bool(true) { "true" } else { "false" };
        result
            .with_branch(branch)
            .with_log(format!("Condition evaluated to {}", branch))
    }
}

fn evaluate(inputs: &[Value], config: &Map<String, Value>) -> Result<bool, NodeError> {
    let left = config_or_input(config, "left", inputs).cloned().unwrap_or(Value::Null);
    let right = config.get("right").cloned().unwrap_or(Value::Null);
    let operator = config.get("operator").and_then(Value::as_str).unwrap_or("equals");

    let result = match operator {
        "equals" | "==" => loose_eq(&left, &right),
        "notEquals" | "!=" => !loose_eq(&left, &right),
        "gt" | ">" => compare(&left, &right)? > 0.0,
        "gte" | ">=" => compare(&left, &right)? >= 0.0,
        "lt" | "<" => compare(&left, &right)? < 0.0,
        "lte" | "<=" => compare(&left, &right)? <= 0.0,
        "contains" => match (&left, &right) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|item| loose_eq(item, needle)),
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            _ => false,
        },
        "isEmpty" => is_empty(&left),
        "isNotEmpty" => !is_empty(&left),
        "isTrue" => truthy(&left),
        other => {
            return Err(NodeError::Configuration(format!("Unsupported operator: {}", other)));
        }
    };
    Ok(result)
}

/// Numbers compare numerically even when one side is a numeric string.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Result<f64, NodeError> {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => Ok(x - y),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => Ok(x.cmp(y) as i8 as f64),
            _ => Err(NodeError::InvalidInputType {
                field: "left/right".to_string(),
                expected: "two numbers or two strings".to_string(),
                actual: format!("{} and {}", crate::type_name(a), crate::type_name(b)),
            }),
        },
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty() && s != "false",
        _ => !is_empty(value),
    }
}
