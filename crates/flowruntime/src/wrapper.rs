use crate::context::FlowContext;
use crate::template;
use async_trait::async_trait;
use flowcore::{
    param_str, Action, ExecutionLog, Node, NodeError, NodeExecutor, NodeInput, Params,
    SharedState, DEFAULT_ACTION,
};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Key every successful node writes its result under
pub const RESULT_KEY: &str = "result";

/// Infer a result type from parameter shape, checked in the order `url`,
/// `smtp_host`, `model`, `operation`. Only used when neither a `type`
/// parameter nor an executor tag is available.
pub fn infer_result_type(params: &Params) -> &'static str {
    const SHAPES: [(&str, &str); 4] = [
        ("url", "http"),
        ("smtp_host", "email"),
        ("model", "llm"),
        ("operation", "store"),
    ];
    SHAPES
        .iter()
        .find(|(key, _)| params.contains_key(*key))
        .map(|(_, kind)| *kind)
        .unwrap_or(RESULT_KEY)
}

/// Binds one node type's executor to the graph engine's node contract
pub struct NodeWrapper {
    id: String,
    executor: Arc<dyn NodeExecutor>,
    params: RwLock<Params>,
    successors: RwLock<HashMap<Action, Arc<dyn Node>>>,
}

impl NodeWrapper {
    pub fn new(id: impl Into<String>, executor: Arc<dyn NodeExecutor>) -> Self {
        Self {
            id: id.into(),
            executor,
            params: RwLock::new(Params::new()),
            successors: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_params(self, params: Params) -> Self {
        *self.params.write() = params;
        self
    }

    /// Type key for the `<type>_result` entry: an explicit `type` parameter,
    /// then the executor's tag, then the parameter shape.
    pub fn result_type(&self, params: &Params) -> String {
        if let Some(kind) = param_str(params, "type").filter(|t| !t.is_empty()) {
            return kind.to_string();
        }
        let tag = self.executor.node_type();
        if !tag.is_empty() {
            return tag.to_string();
        }
        infer_result_type(params).to_string()
    }

    /// Resolve templates in `params`, falling back to them unchanged when a
    /// reference cannot be resolved.
    async fn resolve(&self, shared: &mut SharedState, params: &Params) -> (Params, Map<String, Value>) {
        let visible: Map<String, Value> = shared
            .visible()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let outcome = match shared.context_mut() {
            Some(ctx) => {
                ctx.shared_data.extend(visible);
                let flow_ctx = FlowContext::new(ctx);
                let snapshot = flow_ctx.evaluation_context();
                (template::resolve_params(&flow_ctx, params).await, snapshot)
            }
            None => {
                let flow_ctx = FlowContext::detached(&visible);
                (template::resolve_params(&flow_ctx, params).await, Map::new())
            }
        };

        match outcome {
            (Ok(resolved), snapshot) => (resolved, snapshot),
            (Err(error), snapshot) => {
                tracing::warn!(
                    node_id = %self.id,
                    error = %error,
                    "Template resolution failed, continuing with unresolved parameters"
                );
                let log = ExecutionLog::new(&self.id, "warn", "Template resolution failed")
                    .with_data("error", error.to_string());
                shared.record_resolution_failure(&self.id, error);
                append_log(shared, log).await;
                (params.clone(), snapshot)
            }
        }
    }
}

/// Append a log line to the execution store, if one is attached.
/// Failures are logged and swallowed; they never fail the node.
async fn append_log(shared: &SharedState, log: ExecutionLog) {
    let Some(ctx) = shared.context() else {
        return;
    };
    let Some(store) = &ctx.executions else {
        return;
    };
    if let Err(e) = store.save_execution_log(&ctx.execution_id, log).await {
        tracing::warn!(execution_id = %ctx.execution_id, error = %e, "Failed to append execution log");
    }
}

#[async_trait]
impl Node for NodeWrapper {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_params(&self, params: Params) {
        *self.params.write() = params;
    }

    fn params(&self) -> Params {
        self.params.read().clone()
    }

    fn next(&self, action: &str, node: Arc<dyn Node>) {
        self.successors.write().insert(action.to_string(), node);
    }

    fn successors(&self) -> HashMap<Action, Arc<dyn Node>> {
        self.successors.read().clone()
    }

    async fn run(&self, shared: &mut SharedState) -> Result<Action, NodeError> {
        let params = self.params();
        let (resolved, snapshot) = self.resolve(shared, &params).await;

        let input = shared
            .flow_input()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let cancellation = shared
            .context()
            .map(|ctx| ctx.cancellation.clone())
            .unwrap_or_else(CancellationToken::new);
        let node_input = NodeInput::new(resolved.clone())
            .with_input(input)
            .with_context(snapshot)
            .with_cancellation(cancellation);

        tracing::debug!(node_id = %self.id, node_type = %self.executor.node_type(), "Executing node");

        let result = match self.executor.execute(node_input).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(node_id = %self.id, error = %e, "Node execution failed");
                append_log(
                    shared,
                    ExecutionLog::new(&self.id, "error", "Node execution failed")
                        .with_data("error", e.to_string()),
                )
                .await;
                return Err(e);
            }
        };

        let kind = self.result_type(&resolved);
        shared.insert(format!("{}_result", kind), result.clone());
        shared.insert(RESULT_KEY, result.clone());
        if let Some(ctx) = shared.context_mut() {
            ctx.record_node_result(kind.clone(), result.clone());
            ctx.record_node_result(self.id.clone(), result.clone());
        }

        let action = self
            .executor
            .route(shared, &resolved, &result)
            .unwrap_or_else(|| DEFAULT_ACTION.to_string());

        tracing::info!(node_id = %self.id, action = %action, "Node completed");
        append_log(
            shared,
            ExecutionLog::new(&self.id, "info", "Node completed")
                .with_data("type", kind)
                .with_data("action", action.clone()),
        )
        .await;

        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn shape_inference_precedence() {
        assert_eq!(infer_result_type(&params(json!({"url": "x", "model": "m"}))), "http");
        assert_eq!(infer_result_type(&params(json!({"smtp_host": "h", "model": "m"}))), "email");
        assert_eq!(infer_result_type(&params(json!({"model": "m", "operation": "get"}))), "llm");
        assert_eq!(infer_result_type(&params(json!({"operation": "get"}))), "store");
        assert_eq!(infer_result_type(&params(json!({"duration": "1s"}))), "result");
    }
}
