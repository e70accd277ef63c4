use crate::type_name;
use async_trait::async_trait;
use serde_json::{Map, Number};
use weavecore::{Node, NodeDefinition, NodeError, RetryClass, Value};

/// Sum of all numeric inputs and the `operands` config list
pub struct AddNode;

/// Product of all numeric inputs and the `operands` config list
pub struct MultiplyNode;

#[async_trait]
impl Node for AddNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("math.add", "math")
            .with_display_name("Add")
            .with_description("Adds the incoming numbers and any configured operands")
            .with_retry_class(RetryClass::Local)
    }

    async fn execute(&self, inputs: &[Value], config: &Map<String, Value>) -> Result<Value, NodeError> {
        let values = operands(inputs, config)?;
        number(values.iter().sum())
    }
}

#[async_trait]
impl Node for MultiplyNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("math.multiply", "math")
            .with_display_name("Multiply")
            .with_description("Multiplies the incoming numbers and any configured operands")
            .with_retry_class(RetryClass::Local)
    }

    async fn execute(&self, inputs: &[Value], config: &Map<String, Value>) -> Result<Value, NodeError> {
        let values = operands(inputs, config)?;
        if values.is_empty() {
            return Err(NodeError::MissingInput("operands".to_string()));
        }
        number(values.iter().product())
    }
}

/// Numeric inputs first, then configured operands. Arrays are flattened
/// one level. Inputs that are not numbers (such as a trigger payload
/// object) are passed over; configured operands must all be numbers.
fn operands(inputs: &[Value], config: &Map<String, Value>) -> Result<Vec<f64>, NodeError> {
    let mut values: Vec<f64> = inputs
        .iter()
        .flat_map(|value| match value {
            Value::Array(items) => items.iter().filter_map(numeric).collect(),
            other => numeric(other).into_iter().collect::<Vec<_>>(),
        })
        .collect();

    let configured = match config.get("operands") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(single) => vec![single.clone()],
    };
    for (i, value) in configured.iter().enumerate() {
        values.push(numeric(value).ok_or_else(|| mismatch(value, i))?);
    }
    Ok(values)
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn mismatch(value: &Value, position: usize) -> NodeError {
    NodeError::InvalidInputType {
        field: format!("operand {}", position),
        expected: "number".to_string(),
        actual: type_name(value).to_string(),
    }
}

/// Integral results are emitted as JSON integers.
fn number(n: f64) -> Result<Value, NodeError> {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Ok(Value::from(n as i64));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| NodeError::ExecutionFailed(format!("result is not a finite number: {}", n)))
}
