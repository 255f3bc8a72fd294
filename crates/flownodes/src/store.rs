use async_trait::async_trait;
use flowcore::{require_str, NodeError, NodeExecutor, NodeInput, Params};
use flowruntime::{NodeFactory, NodeMetadata, ParamDefinition};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Key-value store private to one node instance
///
/// Unlike the storage providers, deleting an absent key succeeds.
#[derive(Default)]
pub struct StoreNode {
    entries: Mutex<HashMap<String, Value>>,
}

impl StoreNode {
    pub fn new() -> Self {
        Self::default()
    }

    fn key<'a>(params: &'a Params, operation: &str) -> Result<&'a str, NodeError> {
        params.get("key").and_then(Value::as_str).ok_or_else(|| {
            NodeError::configuration(format!("key parameter is required for {} operation", operation))
        })
    }
}

#[async_trait]
impl NodeExecutor for StoreNode {
    fn node_type(&self) -> &str {
        "store"
    }

    async fn execute(&self, input: NodeInput) -> Result<Value, NodeError> {
        let params = &input.params;
        let operation = require_str(params, "operation")?;

        match operation {
            "get" => {
                let key = Self::key(params, operation)?;
                self.entries
                    .lock()
                    .get(key)
                    .cloned()
                    .ok_or_else(|| NodeError::execution(format!("key not found: {}", key)))
            }
            "set" => {
                let key = Self::key(params, operation)?;
                let value = params.get("value").cloned().ok_or_else(|| {
                    NodeError::configuration("value parameter is required for set operation")
                })?;
                self.entries.lock().insert(key.to_string(), value.clone());
                Ok(value)
            }
            "delete" => {
                let key = Self::key(params, operation)?;
                self.entries.lock().remove(key);
                Ok(Value::Null)
            }
            "list" => {
                let mut keys: Vec<Value> = self
                    .entries
                    .lock()
                    .keys()
                    .cloned()
                    .map(Value::String)
                    .collect();
                keys.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
                Ok(Value::Array(keys))
            }
            other => Err(NodeError::configuration(format!("unknown operation: {}", other))),
        }
    }
}

pub struct StoreNodeFactory;

impl NodeFactory for StoreNodeFactory {
    fn create(&self, _params: &Params) -> Result<Arc<dyn NodeExecutor>, NodeError> {
        Ok(Arc::new(StoreNode::new()))
    }

    fn node_type(&self) -> &str {
        "store"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Node-local key-value store".to_string(),
            category: "data".to_string(),
            params: vec![
                ParamDefinition::required("operation", "get, set, delete or list"),
                ParamDefinition::optional("key", "Entry key, required except for list"),
                ParamDefinition::optional("value", "Value to store with set"),
            ],
        }
    }
}
