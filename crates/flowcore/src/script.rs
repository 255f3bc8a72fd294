use crate::ScriptError;
use serde_json::{Map, Value};

/// Pluggable script engine behind the condition node
///
/// A script receives read-only `bindings` (each entry becomes a global) and
/// returns exactly one value.
pub trait ScriptEvaluator: Send + Sync {
    fn evaluate(&self, script: &str, bindings: &Map<String, Value>) -> Result<Value, ScriptError>;
}
