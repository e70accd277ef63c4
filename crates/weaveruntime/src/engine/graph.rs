use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;
use weavecore::{Edge, NodeId, NodeSpec, NodeStatus, Workflow};

/// Dependency graph of one run. Edge weights index into `workflow.edges`.
pub(crate) struct ExecutionGraph<'a> {
    workflow: &'a Workflow,
    graph: DiGraph<&'a str, usize>,
    index: HashMap<&'a str, NodeIndex>,
}

impl<'a> ExecutionGraph<'a> {
    /// Expects a validated workflow; edges with unknown endpoints are ignored.
    pub fn build(workflow: &'a Workflow) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for node in &workflow.nodes {
            let idx = graph.add_node(node.id.as_str());
            index.insert(node.id.as_str(), idx);
        }

        for (i, edge) in workflow.edges.iter().enumerate() {
            if let (Some(&from), Some(&to)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str())) {
                graph.add_edge(from, to, i);
            }
        }

        Self {
            workflow,
            graph,
            index,
        }
    }

    pub fn node_count(&self) -> usize {
        self.workflow.nodes.len()
    }

    /// Incoming edges of a node, in declaration order.
    pub fn incoming(&self, node_id: &str) -> Vec<&'a Edge> {
        let Some(&idx) = self.index.get(node_id) else {
            return Vec::new();
        };
        let mut edges: Vec<usize> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| *e.weight())
            .collect();
        edges.sort_unstable();
        edges.into_iter().map(|i| &self.workflow.edges[i]).collect()
    }

    /// Unprocessed nodes whose every upstream source has settled, in
    /// definition order.
    pub fn ready_nodes(
        &self,
        is_processed: impl Fn(&str) -> bool,
        status: &HashMap<NodeId, NodeStatus>,
    ) -> Vec<&'a NodeSpec> {
        self.workflow
            .nodes
            .iter()
            .filter(|node| !is_processed(&node.id))
            .filter(|node| {
                let idx = self.index[node.id.as_str()];
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .all(|dep| {
                        status
                            .get(self.graph[dep])
                            .is_some_and(|s| s.is_terminal())
                    })
            })
            .collect()
    }

    /// Nodes without outgoing edges
    pub fn terminal_nodes(&self) -> Vec<&'a NodeSpec> {
        self.workflow
            .nodes
            .iter()
            .filter(|node| {
                let idx = self.index[node.id.as_str()];
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .collect()
    }
}
