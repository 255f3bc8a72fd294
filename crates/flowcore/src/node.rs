use crate::{NodeError, Params, SharedState};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Routing label produced by a node, used to pick the next node
pub type Action = String;

/// Action emitted when a node type declares no routing of its own
pub const DEFAULT_ACTION: &str = "default";

/// Graph engine boundary: what the flow walker sees of a node
#[async_trait]
pub trait Node: Send + Sync {
    /// Stable node id within its flow
    fn id(&self) -> &str;

    fn set_params(&self, params: Params);

    fn params(&self) -> Params;

    /// Register `node` as the successor for `action`
    fn next(&self, action: &str, node: Arc<dyn Node>);

    fn successors(&self) -> HashMap<Action, Arc<dyn Node>>;

    /// Execute against the shared state and return the routing action
    async fn run(&self, shared: &mut SharedState) -> Result<Action, NodeError>;
}

/// Core trait that every node type implements
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Type tag, e.g. "http" or "store". Also names the `<tag>_result` key.
    fn node_type(&self) -> &str;

    /// Execute with resolved parameters and the flow input
    async fn execute(&self, input: NodeInput) -> Result<Value, NodeError>;

    /// Optional: derive a routing action from the result. Must depend only on
    /// its arguments. `None` means the default action.
    fn route(&self, _shared: &SharedState, _params: &Params, _result: &Value) -> Option<Action> {
        None
    }
}

/// Combined input every node type receives
#[derive(Debug, Clone)]
pub struct NodeInput {
    /// Parameters with templates already resolved
    pub params: Params,

    /// Externally supplied flow input, an empty object for direct invocation
    pub input: Value,

    /// Read-only snapshot of earlier results and shared data. Empty for
    /// direct invocation; never carries secret values.
    pub context: Map<String, Value>,

    /// Cancellation signal of the owning execution
    pub cancellation: CancellationToken,
}

impl NodeInput {
    pub fn new(params: Params) -> Self {
        Self {
            params,
            input: Value::Object(Map::new()),
            context: Map::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Accept either `{"params": {...}, "input": {...}}` or, for direct
    /// callers, a bare parameter map.
    pub fn from_value(value: Value) -> Result<Self, NodeError> {
        let Value::Object(mut map) = value else {
            return Err(NodeError::configuration(format!(
                "expected an object input, got {}",
                type_name(&value)
            )));
        };

        match map.remove("params") {
            Some(Value::Object(params)) => {
                let input = map
                    .remove("input")
                    .filter(Value::is_object)
                    .unwrap_or_else(|| Value::Object(Map::new()));
                Ok(Self::new(params).with_input(input))
            }
            Some(other) => Err(NodeError::configuration(format!(
                "expected params to be an object, got {}",
                type_name(&other)
            ))),
            None => Ok(Self::new(map)),
        }
    }

    /// The combined shape as a single value
    pub fn to_value(&self) -> Value {
        json!({
            "params": self.params,
            "input": self.input,
        })
    }

    /// Flow input as an object map, empty when absent
    pub fn input_map(&self) -> Map<String, Value> {
        self.input.as_object().cloned().unwrap_or_default()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
