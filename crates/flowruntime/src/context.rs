use flowcore::{ExecutionContext, ResolutionError, SecretVault, ValueExt};
use serde_json::{Map, Value};

/// Namespace prefixes that pin a lookup to one layer
const RESULTS_NS: &str = "results";
const SHARED_NS: &str = "shared";
const SECRETS_NS: &str = "secrets";

/// Read-only view over the three template layers of one execution
///
/// Lookups try node results first, then shared data, then the secret vault.
pub struct FlowContext<'a> {
    node_results: Option<&'a Map<String, Value>>,
    shared_data: &'a Map<String, Value>,
    secrets: Option<SecretScope<'a>>,
}

struct SecretScope<'a> {
    vault: &'a dyn SecretVault,
    account_id: &'a str,
}

impl<'a> FlowContext<'a> {
    pub fn new(ctx: &'a ExecutionContext) -> Self {
        Self {
            node_results: Some(&ctx.node_results),
            shared_data: &ctx.shared_data,
            secrets: Some(SecretScope {
                vault: ctx.vault.as_ref(),
                account_id: &ctx.account_id,
            }),
        }
    }

    /// Shared data only, for nodes invoked outside an execution.
    pub fn detached(shared_data: &'a Map<String, Value>) -> Self {
        Self {
            node_results: None,
            shared_data,
            secrets: None,
        }
    }

    /// Snapshot of results and shared data, the read-only scope handed to
    /// scripts. Secret values are never part of it.
    pub fn evaluation_context(&self) -> Map<String, Value> {
        let mut merged = self.shared_data.clone();
        let results = self.node_results.cloned().unwrap_or_default();
        for (key, value) in &results {
            merged.insert(key.clone(), value.clone());
        }
        merged.insert(RESULTS_NS.to_string(), Value::Object(results));
        merged.insert(SHARED_NS.to_string(), Value::Object(self.shared_data.clone()));
        merged
    }

    /// Resolve one dotted path against the layers.
    pub async fn lookup(&self, path: &str) -> Result<Value, ResolutionError> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ResolutionError::Malformed(format!("invalid path '{}'", path)));
        }
        let undefined = || ResolutionError::Undefined(path.to_string());

        match segments.as_slice() {
            [RESULTS_NS, rest @ ..] if !rest.is_empty() => self
                .node_results
                .and_then(|layer| lookup_in(layer, rest))
                .ok_or_else(undefined),
            [SHARED_NS, rest @ ..] if !rest.is_empty() => {
                lookup_in(self.shared_data, rest).ok_or_else(undefined)
            }
            [SECRETS_NS, rest @ ..] if !rest.is_empty() => self.secret(&rest.join(".")).await,
            _ => {
                let layered = self
                    .node_results
                    .and_then(|layer| lookup_in(layer, &segments))
                    .or_else(|| lookup_in(self.shared_data, &segments));
                if let Some(value) = layered {
                    return Ok(value);
                }
                // A bare name that is not a secret either is simply undefined.
                self.secret(path).await.map_err(|_| undefined())
            }
        }
    }

    async fn secret(&self, key: &str) -> Result<Value, ResolutionError> {
        let Some(scope) = &self.secrets else {
            return Err(ResolutionError::Secret {
                key: key.to_string(),
                reason: "no secret vault in scope".to_string(),
            });
        };
        scope
            .vault
            .get_secret(scope.account_id, key)
            .await
            .map(Value::String)
            .map_err(|e| ResolutionError::Secret {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }
}

fn lookup_in(layer: &Map<String, Value>, segments: &[&str]) -> Option<Value> {
    let (first, rest) = segments.split_first()?;
    layer.get(*first)?.lookup_path(rest).cloned()
}
