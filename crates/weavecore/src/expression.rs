//! `{{ ... }}` templates for passing data between nodes.
//!
//! A string that is exactly one token evaluates to the referenced value with
//! its type intact. A token embedded in surrounding text is interpolated as
//! a string. Tokens starting with `$` address built-ins; anything else is
//! `NodeName.path.to[0].field`, resolved against recorded node outputs.

use crate::{ExecutionId, NodeId, Value, WorkflowId};
use chrono::Utc;
use serde_json::{json, Map};
use std::collections::{BTreeSet, HashMap};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Recorded input/output of a node that already ran in this execution.
#[derive(Debug, Clone, Default)]
pub struct NodeSnapshot {
    pub input: Value,
    pub output: Option<Value>,
}

/// Everything an expression may reference while evaluating one node.
#[derive(Debug, Clone, Default)]
pub struct ExpressionContext {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
    pub node_name: String,
    /// Aggregated input of the current node
    pub input: Value,
    /// Output of the current node, once it has been computed
    pub output: Option<Value>,
    pub nodes: HashMap<NodeId, NodeSnapshot>,
    /// Display name -> node id
    pub names: HashMap<String, NodeId>,
    pub trigger: Value,
    pub variables: Map<String, Value>,
    /// Whether `$env` may read process environment variables
    pub allow_env: bool,
}

impl ExpressionContext {
    pub fn new(execution_id: ExecutionId, workflow_id: impl Into<WorkflowId>) -> Self {
        Self {
            execution_id,
            workflow_id: workflow_id.into(),
            ..Default::default()
        }
    }

    /// Record a node snapshot and make it addressable by display name.
    pub fn with_node(
        mut self,
        node_id: impl Into<NodeId>,
        display_name: impl Into<String>,
        input: Value,
        output: Option<Value>,
    ) -> Self {
        let node_id = node_id.into();
        self.names.insert(display_name.into(), node_id.clone());
        self.nodes.insert(node_id, NodeSnapshot { input, output });
        self
    }

    pub fn with_trigger(mut self, trigger: Value) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Point the context at the node being evaluated.
    pub fn for_node(mut self, node_id: impl Into<NodeId>, node_name: impl Into<String>, input: Value) -> Self {
        self.node_id = node_id.into();
        self.node_name = node_name.into();
        self.input = input;
        self.output = None;
        self
    }

    fn node_outputs_by_name(&self) -> Value {
        let map = self
            .names
            .iter()
            .filter_map(|(name, id)| {
                let snapshot = self.nodes.get(id)?;
                Some((name.clone(), snapshot.output.clone().unwrap_or(Value::Null)))
            })
            .collect();
        Value::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Evaluate every template in `value`, recursing through arrays and objects.
pub fn evaluate(value: &Value, ctx: &ExpressionContext) -> Value {
    match value {
        Value::String(s) => evaluate_str(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| evaluate(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), evaluate(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Evaluate each entry of a configuration map.
pub fn evaluate_map(map: &Map<String, Value>, ctx: &ExpressionContext) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), evaluate(v, ctx)))
        .collect()
}

fn evaluate_str(s: &str, ctx: &ExpressionContext) -> Value {
    let tokens = find_tokens(s);
    if tokens.is_empty() {
        return Value::String(s.to_string());
    }

    let trimmed = s.trim();
    if let [only] = find_tokens(trimmed).as_slice() {
        if only.start == 0 && only.end == trimmed.len() {
            return resolve(only.body, ctx).unwrap_or(Value::Null);
        }
    }

    let mut out = String::with_capacity(s.len());
    let mut cursor = 0;
    for token in &tokens {
        out.push_str(&s[cursor..token.start]);
        out.push_str(&stringify(resolve(token.body, ctx)));
        cursor = token.end;
    }
    out.push_str(&s[cursor..]);
    Value::String(out)
}

/// True if any string inside `value` contains a template token.
pub fn has_expressions(value: &Value) -> bool {
    match value {
        Value::String(s) => !find_tokens(s).is_empty(),
        Value::Array(items) => items.iter().any(has_expressions),
        Value::Object(map) => map.values().any(has_expressions),
        _ => false,
    }
}

/// Display names of the nodes referenced by templates inside `value`.
pub fn extract_node_references(value: &Value) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    collect_references(value, &mut refs);
    refs
}

fn collect_references(value: &Value, refs: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            for token in find_tokens(s) {
                let segments = parse_path(token.body);
                match segments.as_slice() {
                    [Segment::Key(head), Segment::Key(name), ..] if head == "$nodes" => {
                        refs.insert(name.clone());
                    }
                    [Segment::Key(head), ..] if !head.starts_with('$') => {
                        refs.insert(head.clone());
                    }
                    _ => {}
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, refs)),
        Value::Object(map) => map.values().for_each(|v| collect_references(v, refs)),
        _ => {}
    }
}

struct Token<'a> {
    start: usize,
    end: usize,
    body: &'a str,
}

fn find_tokens(s: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut cursor = 0;
    while let Some(open) = s[cursor..].find(OPEN) {
        let start = cursor + open;
        let body_start = start + OPEN.len();
        let Some(close) = s[body_start..].find(CLOSE) else {
            break;
        };
        let end = body_start + close + CLOSE.len();
        tokens.push(Token {
            start,
            end,
            body: s[body_start..body_start + close].trim(),
        });
        cursor = end;
    }
    tokens
}

/// Split `head.key[0]["quoted key"]` into segments.
fn parse_path(body: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
                let mut inner = String::new();
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    inner.push(c);
                }
                let inner = inner.trim();
                match inner.parse::<usize>() {
                    Ok(index) => segments.push(Segment::Index(index)),
                    Err(_) => segments.push(Segment::Key(
                        inner.trim_matches(|c| c == '"' || c == '\'').to_string(),
                    )),
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        segments.push(Segment::Key(current));
    }
    segments
}

fn resolve(body: &str, ctx: &ExpressionContext) -> Option<Value> {
    let segments = parse_path(body);
    let (Segment::Key(head), rest) = segments.split_first()? else {
        return None;
    };

    if head.starts_with('$') {
        return resolve_builtin(head, rest, ctx);
    }

    let node_id = ctx
        .names
        .get(head.as_str())
        .or_else(|| ctx.nodes.get_key_value(head.as_str()).map(|(k, _)| k))?;
    let snapshot = ctx.nodes.get(node_id)?;

    match rest.first() {
        Some(Segment::Key(k)) if k == "output" => walk(snapshot.output.clone()?, &rest[1..]),
        Some(Segment::Key(k)) if k == "input" => walk(snapshot.input.clone(), &rest[1..]),
        _ => walk(snapshot.output.clone()?, rest),
    }
}

fn resolve_builtin(head: &str, rest: &[Segment], ctx: &ExpressionContext) -> Option<Value> {
    let root = match head {
        "$input" => ctx.input.clone(),
        "$output" => ctx.output.clone()?,
        "$now" => Value::String(Utc::now().to_rfc3339()),
        "$execution" => json!({ "id": ctx.execution_id.to_string() }),
        "$workflow" => json!({ "id": ctx.workflow_id }),
        "$node" => json!({ "id": ctx.node_id, "name": ctx.node_name }),
        "$trigger" => ctx.trigger.clone(),
        "$nodes" => ctx.node_outputs_by_name(),
        "$vars" => Value::Object(ctx.variables.clone()),
        "$env" => {
            if !ctx.allow_env {
                return None;
            }
            let Some(Segment::Key(name)) = rest.first() else {
                return None;
            };
            let value = std::env::var(name).ok()?;
            return walk(Value::String(value), &rest[1..]);
        }
        _ => return None,
    };
    walk(root, rest)
}

fn walk(mut value: Value, path: &[Segment]) -> Option<Value> {
    for segment in path {
        value = match (segment, value) {
            (Segment::Key(key), Value::Object(mut map)) => map.remove(key)?,
            (Segment::Index(index), Value::Array(mut items)) if *index < items.len() => {
                items.swap_remove(*index)
            }
            _ => return None,
        };
    }
    Some(value)
}

fn stringify(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}
