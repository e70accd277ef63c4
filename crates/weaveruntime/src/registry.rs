use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use weavecore::{Node, NodeDefinition};

/// Registry of available node types
///
/// Capabilities are registered explicitly at startup and shared across all
/// executions.
pub struct NodeRegistry {
    nodes: HashMap<String, Arc<dyn Node>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Register a node capability under its declared type.
    /// A later registration for the same type replaces the earlier one.
    pub fn register(&mut self, node: Arc<dyn Node>) {
        let node_type = node.definition().node_type;
        tracing::info!("Registering node type: {}", node_type);
        if self.nodes.insert(node_type.clone(), node).is_some() {
            tracing::warn!("Node type {} was already registered, replacing", node_type);
        }
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn Node>> {
        self.nodes.get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.nodes.contains_key(node_type)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All registered node types, sorted by type id
    pub fn list_definitions(&self) -> Vec<NodeDefinition> {
        let mut defs: Vec<_> = self.nodes.values().map(|n| n.definition()).collect();
        defs.sort_by(|a, b| a.node_type.cmp(&b.node_type));
        defs
    }

    /// Definitions grouped by category
    pub fn by_category(&self) -> BTreeMap<String, Vec<NodeDefinition>> {
        let mut grouped: BTreeMap<String, Vec<NodeDefinition>> = BTreeMap::new();
        for def in self.list_definitions() {
            grouped.entry(def.category.clone()).or_default().push(def);
        }
        grouped
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use weavecore::NodeError;

    struct Fixed(&'static str, &'static str);

    #[async_trait]
    impl Node for Fixed {
        fn definition(&self) -> NodeDefinition {
            NodeDefinition::new(self.0, self.1)
        }

        async fn execute(&self, _inputs: &[Value], _config: &Map<String, Value>) -> Result<Value, NodeError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_lookup_and_listing() {
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(Fixed("math.add", "math")));
        registry.register(Arc::new(Fixed("math.multiply", "math")));
        registry.register(Arc::new(Fixed("debug.log", "debug")));

        assert!(registry.contains("math.add"));
        assert!(!registry.contains("ocr.scan"));
        assert!(registry.get("ocr.scan").is_none());
        assert_eq!(registry.len(), 3);

        let types: Vec<_> = registry
            .list_definitions()
            .into_iter()
            .map(|d| d.node_type)
            .collect();
        assert_eq!(types, vec!["debug.log", "math.add", "math.multiply"]);

        let grouped = registry.by_category();
        assert_eq!(grouped["math"].len(), 2);
        assert_eq!(grouped["debug"].len(), 1);
    }

    #[test]
    fn test_reregistration_replaces() {
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(Fixed("math.add", "math")));
        registry.register(Arc::new(Fixed("math.add", "arithmetic")));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list_definitions()[0].category, "arithmetic");
    }
}
