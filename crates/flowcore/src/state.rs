use crate::{ExecutionStore, ResolutionError, SecretVault};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Keys the wrapper treats as user-supplied flow input
const FLOW_INPUT_KEYS: [&str; 4] = ["question", "input", "context", "data"];

/// Reserved keys never flow into template scope or flow input.
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with('_') || key == "accountID"
}

/// The mutable aggregate threaded through every node of one execution
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    values: Map<String, Value>,
    context: Option<ExecutionContext>,
    resolution_failures: Vec<ResolutionFailure>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: Map<String, Value>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Entries that are not reserved
    pub fn visible(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter().filter(|(k, _)| !is_reserved_key(k))
    }

    pub fn context(&self) -> Option<&ExecutionContext> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut ExecutionContext> {
        self.context.as_mut()
    }

    pub fn resolution_failures(&self) -> &[ResolutionFailure] {
        &self.resolution_failures
    }

    pub fn record_resolution_failure(&mut self, node_id: impl Into<String>, error: ResolutionError) {
        self.resolution_failures.push(ResolutionFailure {
            node_id: node_id.into(),
            error,
        });
    }

    /// Visible entries as flow input, or `None` when the state does not look
    /// like a flow invocation.
    ///
    /// The test is a heuristic: one of `question`, `input`, `context` or
    /// `data` must hold a non-empty string or an object. Flow input under
    /// other names is classified as a direct invocation.
    pub fn flow_input(&self) -> Option<Value> {
        let has_flow_input = FLOW_INPUT_KEYS.iter().any(|key| match self.values.get(*key) {
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Object(_)) => true,
            _ => false,
        });

        has_flow_input.then(|| {
            Value::Object(
                self.visible()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )
        })
    }
}

/// A template resolution that failed and was recovered from
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionFailure {
    pub node_id: String,
    pub error: ResolutionError,
}

/// Strongly typed per-execution context carried next to the shared state
#[derive(Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub flow_id: String,
    pub account_id: String,
    pub vault: Arc<dyn SecretVault>,
    /// Where node results and log lines are recorded, if anywhere
    pub executions: Option<Arc<dyn ExecutionStore>>,
    pub cancellation: CancellationToken,
    /// Results recorded by earlier nodes, keyed by node id and by type key
    pub node_results: Map<String, Value>,
    /// Data written by earlier nodes
    pub shared_data: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(
        execution_id: impl Into<String>,
        flow_id: impl Into<String>,
        account_id: impl Into<String>,
        vault: Arc<dyn SecretVault>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            flow_id: flow_id.into(),
            account_id: account_id.into(),
            vault,
            executions: None,
            cancellation: CancellationToken::new(),
            node_results: Map::new(),
            shared_data: Map::new(),
        }
    }

    pub fn with_execution_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.executions = Some(store);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn record_node_result(&mut self, key: impl Into<String>, result: Value) {
        self.node_results.insert(key.into(), result);
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("execution_id", &self.execution_id)
            .field("flow_id", &self.flow_id)
            .field("account_id", &self.account_id)
            .field("has_execution_store", &self.executions.is_some())
            .field("node_results", &self.node_results.len())
            .field("shared_data", &self.shared_data.len())
            .finish()
    }
}
