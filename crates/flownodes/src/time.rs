use async_trait::async_trait;
use flowcore::{parse_duration, require_str, NodeError, NodeExecutor, NodeInput, Params};
use flowruntime::{NodeFactory, NodeMetadata, ParamDefinition};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::sleep;

/// Delay execution for a duration string such as "500ms" or "1m30s"
pub struct DelayNode;

#[async_trait]
impl NodeExecutor for DelayNode {
    fn node_type(&self) -> &str {
        "delay"
    }

    async fn execute(&self, input: NodeInput) -> Result<Value, NodeError> {
        let duration = parse_duration(require_str(&input.params, "duration")?)?;

        tracing::debug!("Delaying for {}ms", duration.as_millis());

        tokio::select! {
            _ = input.cancellation.cancelled() => Err(NodeError::Cancelled),
            _ = sleep(duration) => Ok(input.to_value()),
        }
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn create(&self, _params: &Params) -> Result<Arc<dyn NodeExecutor>, NodeError> {
        Ok(Arc::new(DelayNode))
    }

    fn node_type(&self) -> &str {
        "delay"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay execution for a duration".to_string(),
            category: "time".to_string(),
            params: vec![ParamDefinition::required("duration", "Duration string, e.g. 1m30s")],
        }
    }
}
