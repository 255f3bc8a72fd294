#![allow(dead_code)]

use async_trait::async_trait;
use flowcore::{
    Action, ExecutionContext, NodeError, NodeExecutor, NodeInput, Params, Secret, SharedState,
    StorageProvider,
};
use flowstore::{MemoryProvider, StoreSecretVault};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn params(value: Value) -> Params {
    serde_json::from_value(value).unwrap()
}

/// Returns what it was given; routes to the `next` parameter when present.
pub struct Echo {
    pub tag: &'static str,
}

#[async_trait]
impl NodeExecutor for Echo {
    fn node_type(&self) -> &str {
        self.tag
    }

    async fn execute(&self, input: NodeInput) -> Result<Value, NodeError> {
        Ok(json!({
            "params": input.params,
            "input": input.input,
            "context": input.context,
        }))
    }

    fn route(&self, _shared: &SharedState, params: &Params, _result: &Value) -> Option<Action> {
        params.get("next").and_then(Value::as_str).map(str::to_string)
    }
}

/// Always fails with an execution error
pub struct Boom;

#[async_trait]
impl NodeExecutor for Boom {
    fn node_type(&self) -> &str {
        "boom"
    }

    async fn execute(&self, _input: NodeInput) -> Result<Value, NodeError> {
        Err(NodeError::execution("exploded"))
    }
}

/// Memory storage plus an execution context wired to it
pub async fn execution(
    execution_id: &str,
    account_id: &str,
) -> (Arc<MemoryProvider>, ExecutionContext) {
    init_tracing();
    let provider = Arc::new(MemoryProvider::new());
    provider.initialize().await.unwrap();
    provider
        .secret_store()
        .save_secret(Secret::new(account_id, "API_KEY", "sk-test"))
        .await
        .unwrap();

    let vault = Arc::new(StoreSecretVault::new(provider.secret_store()));
    let ctx = ExecutionContext::new(execution_id, "flow-1", account_id, vault)
        .with_execution_store(provider.execution_store());
    (provider, ctx)
}
