use crate::NodeWrapper;
use flowcore::{Node, NodeError, NodeExecutor, Params};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating node executors
pub trait NodeFactory: Send + Sync {
    /// Create an executor for a node with the given parameters
    fn create(&self, params: &Params) -> Result<Arc<dyn NodeExecutor>, NodeError>;

    /// Get node type identifier
    fn node_type(&self) -> &str;

    /// Optional: Get node metadata (description, parameters)
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub params: Vec<ParamDefinition>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            params: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl ParamDefinition {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: false,
        }
    }
}

/// Registry of available node types
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a node factory
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    /// Create a wrapped node of `node_type` with id `node_id`
    pub fn create_node(
        &self,
        node_type: &str,
        node_id: &str,
        params: Params,
    ) -> Result<Arc<dyn Node>, NodeError> {
        let factory = self
            .factories
            .get(node_type)
            .ok_or_else(|| NodeError::configuration(format!("unknown node type: {}", node_type)))?;

        let executor = factory.create(&params)?;
        Ok(Arc::new(NodeWrapper::new(node_id, executor).with_params(params)))
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
