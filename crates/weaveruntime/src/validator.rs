//! Structural validation of workflow definitions.
//!
//! Every run goes through [`WorkflowValidator::validate_and_throw`] before an
//! execution record is created.

use crate::registry::NodeRegistry;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::Bfs;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use weavecore::{Workflow, WorkflowError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    MissingName,
    NoNodes,
    DuplicateNodeId,
    UnknownNodeType,
    MissingDisplayName,
    DuplicateEdgeId,
    InvalidEdgeSource,
    InvalidEdgeTarget,
    SelfLoop,
    CircularDependency,
    DisconnectedGraph,
    DuplicateDisplayName,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingName => "MISSING_NAME",
            Self::NoNodes => "NO_NODES",
            Self::DuplicateNodeId => "DUPLICATE_NODE_ID",
            Self::UnknownNodeType => "UNKNOWN_NODE_TYPE",
            Self::MissingDisplayName => "MISSING_DISPLAY_NAME",
            Self::DuplicateEdgeId => "DUPLICATE_EDGE_ID",
            Self::InvalidEdgeSource => "INVALID_EDGE_SOURCE",
            Self::InvalidEdgeTarget => "INVALID_EDGE_TARGET",
            Self::SelfLoop => "SELF_LOOP",
            Self::CircularDependency => "CIRCULAR_DEPENDENCY",
            Self::DisconnectedGraph => "DISCONNECTED_GRAPH",
            Self::DuplicateDisplayName => "DUPLICATE_DISPLAY_NAME",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub code: ValidationCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
    /// Ordered node ids forming the cycle, first node repeated at the end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<Vec<String>>,
}

impl ValidationIssue {
    fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            node_id: None,
            edge_id: None,
            cycle: None,
        }
    }

    fn node(mut self, id: &str) -> Self {
        self.node_id = Some(id.to_string());
        self
    }

    fn edge(mut self, id: &str) -> Self {
        self.edge_id = Some(id.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn has_error(&self, code: ValidationCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn has_warning(&self, code: ValidationCode) -> bool {
        self.warnings.iter().any(|e| e.code == code)
    }
}

pub struct WorkflowValidator<'a> {
    registry: &'a NodeRegistry,
}

impl<'a> WorkflowValidator<'a> {
    pub fn new(registry: &'a NodeRegistry) -> Self {
        Self { registry }
    }

    pub fn validate(&self, workflow: &Workflow) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if workflow.name.trim().is_empty() {
            errors.push(ValidationIssue::new(
                ValidationCode::MissingName,
                "Workflow name is required",
            ));
        }

        if workflow.nodes.is_empty() {
            errors.push(ValidationIssue::new(
                ValidationCode::NoNodes,
                "Workflow must contain at least one node",
            ));
        }

        self.check_nodes(workflow, &mut errors, &mut warnings);
        let edges_sound = check_edges(workflow, &mut errors);

        // Cycle and connectivity analysis only make sense over sound edges.
        if edges_sound {
            if let Some(cycle) = find_cycle(workflow) {
                let mut issue = ValidationIssue::new(
                    ValidationCode::CircularDependency,
                    format!("Circular dependency detected: {}", cycle.join(" -> ")),
                )
                .node(&cycle[0]);
                issue.cycle = Some(cycle);
                errors.push(issue);
            }

            let components = connected_components(workflow);
            if components.len() > 1 {
                warnings.push(ValidationIssue::new(
                    ValidationCode::DisconnectedGraph,
                    format!(
                        "Workflow has {} disconnected parts: {}",
                        components.len(),
                        components
                            .iter()
                            .map(|c| format!("[{}]", c.join(", ")))
                            .collect::<Vec<_>>()
                            .join(" ")
                    ),
                ));
            }
        }

        ValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Validate, failing with the first error found.
    pub fn validate_and_throw(&self, workflow: &Workflow) -> Result<ValidationResult, WorkflowError> {
        let result = self.validate(workflow);
        match result.errors.first() {
            Some(first) => Err(WorkflowError::ValidationFailed {
                code: first.code.as_str().to_string(),
                message: first.message.clone(),
            }),
            None => Ok(result),
        }
    }

    fn check_nodes(
        &self,
        workflow: &Workflow,
        errors: &mut Vec<ValidationIssue>,
        warnings: &mut Vec<ValidationIssue>,
    ) {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();

        for node in &workflow.nodes {
            if !ids.insert(node.id.as_str()) {
                errors.push(
                    ValidationIssue::new(
                        ValidationCode::DuplicateNodeId,
                        format!("Duplicate node id: {}", node.id),
                    )
                    .node(&node.id),
                );
            }

            if !self.registry.contains(&node.node_type) {
                errors.push(
                    ValidationIssue::new(
                        ValidationCode::UnknownNodeType,
                        format!("Node {} has unknown type: {}", node.id, node.node_type),
                    )
                    .node(&node.id),
                );
            }

            if node.display_name.trim().is_empty() {
                errors.push(
                    ValidationIssue::new(
                        ValidationCode::MissingDisplayName,
                        format!("Node {} has no display name", node.id),
                    )
                    .node(&node.id),
                );
            } else if !names.insert(node.display_name.as_str()) {
                warnings.push(
                    ValidationIssue::new(
                        ValidationCode::DuplicateDisplayName,
                        format!(
                            "Display name '{}' is used by more than one node; expressions will resolve to one of them",
                            node.display_name
                        ),
                    )
                    .node(&node.id),
                );
            }
        }
    }
}

/// Returns false if any edge is unusable for graph analysis.
fn check_edges(workflow: &Workflow, errors: &mut Vec<ValidationIssue>) -> bool {
    let node_ids: HashSet<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut edge_ids = HashSet::new();
    let mut sound = true;

    for edge in &workflow.edges {
        if !edge_ids.insert(edge.id.as_str()) {
            errors.push(
                ValidationIssue::new(
                    ValidationCode::DuplicateEdgeId,
                    format!("Duplicate edge id: {}", edge.id),
                )
                .edge(&edge.id),
            );
        }

        if !node_ids.contains(edge.source.as_str()) {
            sound = false;
            errors.push(
                ValidationIssue::new(
                    ValidationCode::InvalidEdgeSource,
                    format!("Edge {} references missing source node {}", edge.id, edge.source),
                )
                .edge(&edge.id),
            );
        }

        if !node_ids.contains(edge.target.as_str()) {
            sound = false;
            errors.push(
                ValidationIssue::new(
                    ValidationCode::InvalidEdgeTarget,
                    format!("Edge {} references missing target node {}", edge.id, edge.target),
                )
                .edge(&edge.id),
            );
        }

        if edge.source == edge.target {
            sound = false;
            errors.push(
                ValidationIssue::new(
                    ValidationCode::SelfLoop,
                    format!("Edge {} connects node {} to itself", edge.id, edge.source),
                )
                .edge(&edge.id)
                .node(&edge.source),
            );
        }
    }

    sound
}

/// Depth-first search with an explicit recursion stack. Returns the first
/// cycle found, as node ids with the entry node repeated at the end.
fn find_cycle(workflow: &Workflow) -> Option<Vec<String>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &workflow.edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut visited = HashSet::new();
    let mut stack = Vec::new();

    for node in &workflow.nodes {
        if visited.contains(node.id.as_str()) {
            continue;
        }
        if let Some(cycle) = visit(node.id.as_str(), &adjacency, &mut visited, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

fn visit<'a>(
    node: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    stack.push(node);

    for &next in adjacency.get(node).into_iter().flatten() {
        if let Some(pos) = stack.iter().position(|&n| n == next) {
            let mut cycle: Vec<String> = stack[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(next.to_string());
            return Some(cycle);
        }
        if !visited.contains(next) {
            if let Some(cycle) = visit(next, adjacency, visited, stack) {
                return Some(cycle);
            }
        }
    }

    stack.pop();
    None
}

/// Breadth-first traversal over the undirected view of the graph.
fn connected_components(workflow: &Workflow) -> Vec<Vec<String>> {
    let mut graph = UnGraph::<&str, ()>::new_undirected();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for node in &workflow.nodes {
        index
            .entry(node.id.as_str())
            .or_insert_with(|| graph.add_node(node.id.as_str()));
    }
    for edge in &workflow.edges {
        if let (Some(&a), Some(&b)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str())) {
            graph.add_edge(a, b, ());
        }
    }

    let mut seen = HashSet::new();
    let mut components = Vec::new();
    for start in graph.node_indices() {
        if seen.contains(&start) {
            continue;
        }
        let mut component = Vec::new();
        let mut bfs = Bfs::new(&graph, start);
        while let Some(nx) = bfs.next(&graph) {
            seen.insert(nx);
            component.push(graph[nx].to_string());
        }
        components.push(component);
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::Arc;
    use weavecore::{Edge, Node, NodeDefinition, NodeError, NodeSpec};

    struct Noop;

    #[async_trait]
    impl Node for Noop {
        fn definition(&self) -> NodeDefinition {
            NodeDefinition::new("test.noop", "test")
        }

        async fn execute(&self, _inputs: &[Value], _config: &Map<String, Value>) -> Result<Value, NodeError> {
            Ok(Value::Null)
        }
    }

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(Noop));
        registry
    }

    fn workflow(nodes: &[&str], edges: &[(&str, &str)]) -> Workflow {
        let mut wf = Workflow::new("test");
        for id in nodes {
            wf.add_node(NodeSpec::new(*id, "test.noop"));
        }
        for (a, b) in edges {
            wf.connect(*a, *b);
        }
        wf
    }

    #[test]
    fn test_valid_linear_graph() {
        let registry = registry();
        let result = WorkflowValidator::new(&registry).validate(&workflow(&["a", "b", "c"], &[("a", "b"), ("b", "c")]));
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_missing_name_and_no_nodes() {
        let registry = registry();
        let mut wf = workflow(&[], &[]);
        wf.name = "  ".into();

        let result = WorkflowValidator::new(&registry).validate(&wf);
        assert!(!result.valid);
        assert!(result.has_error(ValidationCode::MissingName));
        assert!(result.has_error(ValidationCode::NoNodes));
    }

    #[test]
    fn test_node_checks() {
        let registry = registry();
        let mut wf = workflow(&["a", "a"], &[]);
        wf.add_node(NodeSpec::new("x", "ocr.scan"));
        wf.add_node(NodeSpec::new("y", "test.noop").with_name(""));

        let result = WorkflowValidator::new(&registry).validate(&wf);
        assert!(result.has_error(ValidationCode::DuplicateNodeId));
        assert!(result.has_error(ValidationCode::UnknownNodeType));
        assert!(result.has_error(ValidationCode::MissingDisplayName));
        assert!(result.has_warning(ValidationCode::DuplicateDisplayName));
    }

    #[test]
    fn test_edge_checks() {
        let registry = registry();
        let mut wf = workflow(&["a", "b"], &[("a", "b")]);
        let mut dup = Edge::new("a", "b");
        dup.id = wf.edges[0].id.clone();
        wf.edges.push(dup);
        wf.edges.push(Edge::new("ghost", "b"));
        wf.edges.push(Edge::new("a", "nowhere"));
        wf.edges.push(Edge::new("b", "b"));

        let result = WorkflowValidator::new(&registry).validate(&wf);
        assert!(result.has_error(ValidationCode::DuplicateEdgeId));
        assert!(result.has_error(ValidationCode::InvalidEdgeSource));
        assert!(result.has_error(ValidationCode::InvalidEdgeTarget));
        assert!(result.has_error(ValidationCode::SelfLoop));
    }

    #[test]
    fn test_cycle_reports_path() {
        let registry = registry();
        let wf = workflow(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("c", "d"), ("d", "b")]);

        let result = WorkflowValidator::new(&registry).validate(&wf);
        assert!(result.has_error(ValidationCode::CircularDependency));
        let issue = result
            .errors
            .iter()
            .find(|e| e.code == ValidationCode::CircularDependency)
            .unwrap();
        assert_eq!(issue.cycle.as_deref().unwrap(), ["b", "c", "d", "b"]);
    }

    #[test]
    fn test_disconnected_is_warning() {
        let registry = registry();
        let wf = workflow(&["a", "b", "c", "d"], &[("a", "b"), ("c", "d")]);

        let result = WorkflowValidator::new(&registry).validate(&wf);
        assert!(result.valid);
        assert!(result.has_warning(ValidationCode::DisconnectedGraph));
    }

    #[test]
    fn test_diamond_is_connected() {
        let registry = registry();
        let wf = workflow(&["a", "b", "c", "d"], &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]);

        let result = WorkflowValidator::new(&registry).validate(&wf);
        assert!(result.valid);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_validate_and_throw() {
        let registry = registry();
        let wf = workflow(&["a", "b"], &[("a", "b"), ("b", "a")]);

        let err = WorkflowValidator::new(&registry).validate_and_throw(&wf).unwrap_err();
        match err {
            WorkflowError::ValidationFailed { code, .. } => assert_eq!(code, "CIRCULAR_DEPENDENCY"),
            other => panic!("unexpected error: {}", other),
        }
    }
}
