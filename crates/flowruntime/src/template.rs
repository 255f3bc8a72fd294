//! `${path}` template expressions inside node parameters
//!
//! A string that is exactly one expression resolves to the referenced value
//! with its JSON type intact. Expressions embedded in longer text are
//! rendered as text. Objects and arrays are walked recursively; keys are
//! never templated.

use crate::FlowContext;
use flowcore::{Params, ResolutionError, ValueExt};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};

const OPEN: &str = "${";
const CLOSE: char = '}';

#[derive(Debug, PartialEq)]
enum Piece<'s> {
    Text(&'s str),
    Expr(&'s str),
}

fn parse(template: &str) -> Result<Vec<Piece<'_>>, ResolutionError> {
    let mut pieces = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        if start > 0 {
            pieces.push(Piece::Text(&rest[..start]));
        }
        let after = &rest[start + OPEN.len()..];
        let end = after.find(CLOSE).ok_or_else(|| {
            ResolutionError::Malformed(format!("unterminated expression in '{}'", template))
        })?;
        let path = after[..end].trim();
        if path.is_empty() {
            return Err(ResolutionError::Malformed(format!(
                "empty expression in '{}'",
                template
            )));
        }
        pieces.push(Piece::Expr(path));
        rest = &after[end + 1..];
    }

    if !rest.is_empty() {
        pieces.push(Piece::Text(rest));
    }
    Ok(pieces)
}

/// True if `value` holds at least one template expression anywhere.
pub fn has_templates(value: &Value) -> bool {
    match value {
        Value::String(s) => s.contains(OPEN),
        Value::Array(items) => items.iter().any(has_templates),
        Value::Object(map) => map.values().any(has_templates),
        _ => false,
    }
}

/// Resolve every parameter. The first failing reference fails the whole set.
pub async fn resolve_params(ctx: &FlowContext<'_>, params: &Params) -> Result<Params, ResolutionError> {
    if !params.values().any(has_templates) {
        return Ok(params.clone());
    }

    let mut resolved = Params::new();
    for (key, value) in params {
        resolved.insert(key.clone(), resolve_value(ctx, value).await?);
    }
    Ok(resolved)
}

pub fn resolve_value<'a>(
    ctx: &'a FlowContext<'a>,
    value: &'a Value,
) -> BoxFuture<'a, Result<Value, ResolutionError>> {
    async move {
        match value {
            Value::String(s) => resolve_string(ctx, s).await,
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(resolve_value(ctx, item).await?);
                }
                Ok(Value::Array(out))
            }
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, item) in map {
                    out.insert(key.clone(), resolve_value(ctx, item).await?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }
    .boxed()
}

async fn resolve_string(ctx: &FlowContext<'_>, text: &str) -> Result<Value, ResolutionError> {
    if !text.contains(OPEN) {
        return Ok(Value::String(text.to_string()));
    }

    let pieces = parse(text)?;
    if let [Piece::Expr(path)] = pieces.as_slice() {
        return ctx.lookup(path).await;
    }

    let mut out = String::with_capacity(text.len());
    for piece in &pieces {
        match piece {
            Piece::Text(t) => out.push_str(t),
            Piece::Expr(path) => out.push_str(&ctx.lookup(path).await?.to_display_string()),
        }
    }
    Ok(Value::String(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowcore::{ExecutionContext, SecretVault, StoreError};
    use serde_json::json;
    use std::sync::Arc;

    struct OneSecret;

    #[async_trait]
    impl SecretVault for OneSecret {
        async fn get_secret(&self, account_id: &str, key: &str) -> Result<String, StoreError> {
            match (account_id, key) {
                ("acct", "API_KEY") => Ok("sk-123".to_string()),
                _ => Err(StoreError::not_found("secret", key)),
            }
        }
    }

    fn execution() -> ExecutionContext {
        let mut ctx = ExecutionContext::new("exec", "flow", "acct", Arc::new(OneSecret));
        ctx.record_node_result("http", json!({"status_code": 200, "body": {"items": [{"id": 7}]}}));
        ctx.shared_data.insert("user".into(), json!("ada"));
        ctx.shared_data.insert("status_code".into(), json!(999));
        ctx
    }

    #[test]
    fn parse_splits_text_and_expressions() {
        assert_eq!(
            parse("Hi ${ user }!").unwrap(),
            vec![Piece::Text("Hi "), Piece::Expr("user"), Piece::Text("!")]
        );
        assert!(matches!(parse("${user"), Err(ResolutionError::Malformed(_))));
        assert!(matches!(parse("${ }"), Err(ResolutionError::Malformed(_))));
    }

    #[tokio::test]
    async fn whole_expressions_keep_their_type() {
        let exec = execution();
        let ctx = FlowContext::new(&exec);

        let id = resolve_value(&ctx, &json!("${http.body.items.0.id}")).await.unwrap();
        assert_eq!(id, json!(7));

        let text = resolve_value(&ctx, &json!("id=${http.body.items.0.id} user=${user}"))
            .await
            .unwrap();
        assert_eq!(text, json!("id=7 user=ada"));
    }

    #[tokio::test]
    async fn results_shadow_shared_data() {
        let mut exec = execution();
        exec.record_node_result("status_code", json!(200));
        let ctx = FlowContext::new(&exec);

        assert_eq!(ctx.lookup("status_code").await.unwrap(), json!(200));
        assert_eq!(ctx.lookup("shared.status_code").await.unwrap(), json!(999));
        assert_eq!(ctx.lookup("results.http.status_code").await.unwrap(), json!(200));
    }

    #[tokio::test]
    async fn secrets_resolve_last() {
        let exec = execution();
        let ctx = FlowContext::new(&exec);

        let params: Params = serde_json::from_value(json!({
            "headers": {"Authorization": "Bearer ${API_KEY}"},
            "token": "${secrets.API_KEY}",
            "count": 3
        }))
        .unwrap();
        let resolved = resolve_params(&ctx, &params).await.unwrap();
        assert_eq!(resolved["headers"]["Authorization"], "Bearer sk-123");
        assert_eq!(resolved["token"], "sk-123");
        assert_eq!(resolved["count"], 3);

        assert!(!ctx.evaluation_context().values().any(|v| v.to_string().contains("sk-123")));
    }

    #[tokio::test]
    async fn unknown_references_fail() {
        let exec = execution();
        let ctx = FlowContext::new(&exec);

        assert_eq!(
            ctx.lookup("nope.field").await.unwrap_err(),
            ResolutionError::Undefined("nope.field".into())
        );
        assert!(matches!(
            ctx.lookup("secrets.MISSING").await.unwrap_err(),
            ResolutionError::Secret { .. }
        ));

        let detached_data = Map::new();
        let detached = FlowContext::detached(&detached_data);
        assert!(detached.lookup("API_KEY").await.is_err());
    }

    #[test]
    fn detects_templates() {
        assert!(has_templates(&json!({"a": ["x", "${y}"]})));
        assert!(!has_templates(&json!({"a": ["x", 1]})));
    }

    #[tokio::test]
    async fn plain_parameter_sets_pass_through() {
        let data = Map::new();
        let ctx = FlowContext::detached(&data);
        let params: Params = serde_json::from_value(json!({
            "url": "http://example.test",
            "headers": {"accept": "text/plain"},
            "retries": [1, 2]
        }))
        .unwrap();
        assert_eq!(resolve_params(&ctx, &params).await.unwrap(), params);

        let templated: Params = serde_json::from_value(json!({"key": "${missing}"})).unwrap();
        assert!(resolve_params(&ctx, &templated).await.is_err());
    }
}
