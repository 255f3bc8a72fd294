use crate::LuaScriptEvaluator;
use async_trait::async_trait;
use flowcore::{
    param_str, Action, NodeError, NodeExecutor, NodeInput, Params, ScriptEvaluator, SharedState,
};
use flowruntime::{NodeFactory, NodeMetadata, ParamDefinition};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Runs a script against the flow input and branches on its result
pub struct ConditionNode {
    evaluator: Arc<dyn ScriptEvaluator>,
}

impl ConditionNode {
    pub fn new(evaluator: Arc<dyn ScriptEvaluator>) -> Self {
        Self { evaluator }
    }
}

impl Default for ConditionNode {
    fn default() -> Self {
        Self::new(Arc::new(LuaScriptEvaluator::new()))
    }
}

#[async_trait]
impl NodeExecutor for ConditionNode {
    fn node_type(&self) -> &str {
        "condition"
    }

    async fn execute(&self, input: NodeInput) -> Result<Value, NodeError> {
        let script = param_str(&input.params, "condition_script")
            .or_else(|| param_str(&input.params, "script"))
            .ok_or_else(|| NodeError::configuration("condition_script parameter is required"))?
            .to_string();

        let mut bindings = Map::new();
        bindings.insert("input".to_string(), Value::Object(input.input_map()));
        bindings.insert("context".to_string(), Value::Object(input.context));

        tracing::debug!(script_len = script.len(), "Evaluating condition");

        // Interpreters are synchronous; keep them off the async workers.
        let evaluator = self.evaluator.clone();
        let result = tokio::task::spawn_blocking(move || evaluator.evaluate(&script, &bindings))
            .await
            .map_err(|e| NodeError::execution(format!("condition task failed: {}", e)))??;

        tracing::debug!(result = %result, "Condition evaluated");
        Ok(result)
    }

    /// Strings route verbatim, booleans to "true"/"false", anything else by
    /// its JSON text.
    fn route(&self, _shared: &SharedState, _params: &Params, result: &Value) -> Option<Action> {
        let action = match result {
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            other => other.to_string(),
        };
        Some(action)
    }
}

pub struct ConditionNodeFactory {
    evaluator: Arc<dyn ScriptEvaluator>,
}

impl ConditionNodeFactory {
    pub fn new(evaluator: Arc<dyn ScriptEvaluator>) -> Self {
        Self { evaluator }
    }
}

impl Default for ConditionNodeFactory {
    fn default() -> Self {
        Self::new(Arc::new(LuaScriptEvaluator::new()))
    }
}

impl NodeFactory for ConditionNodeFactory {
    fn create(&self, _params: &Params) -> Result<Arc<dyn NodeExecutor>, NodeError> {
        Ok(Arc::new(ConditionNode::new(self.evaluator.clone())))
    }

    fn node_type(&self) -> &str {
        "condition"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Branch on the result of a sandboxed script".to_string(),
            category: "control".to_string(),
            params: vec![ParamDefinition::required(
                "condition_script",
                "Script body; its return value picks the next action",
            )],
        }
    }
}
