mod common;

use common::{execution, params, Boom, Echo};
use flowcore::{
    ExecutionStatus, Node, ResolutionError, SharedState, StorageProvider, DEFAULT_ACTION,
};
use flowruntime::NodeWrapper;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn unresolvable_template_falls_back_to_original_params() {
    let (provider, ctx) = execution("exec-fallback", "acct").await;
    provider
        .execution_store()
        .save_execution(ExecutionStatus::new("exec-fallback", "flow-1", "acct"))
        .await
        .unwrap();

    let node = NodeWrapper::new("fetch", Arc::new(Echo { tag: "echo" }))
        .with_params(params(json!({"url": "https://example.com/${missing.field}"})));
    let mut shared = SharedState::new().with_context(ctx);

    let action = node.run(&mut shared).await.unwrap();
    assert_eq!(action, DEFAULT_ACTION);

    let result = shared.get("result").unwrap();
    assert_eq!(result["params"]["url"], "https://example.com/${missing.field}");

    let failures = shared.resolution_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].node_id, "fetch");
    assert_eq!(
        failures[0].error,
        ResolutionError::Undefined("missing.field".into())
    );

    let logs = provider
        .execution_store()
        .get_execution_logs("exec-fallback")
        .await
        .unwrap();
    assert!(logs.iter().any(|l| l.level == "warn" && l.node_id == "fetch"));
    assert!(logs.iter().any(|l| l.level == "info" && l.node_id == "fetch"));
}

#[tokio::test]
async fn results_are_written_under_type_key_and_generic_key() {
    let node = NodeWrapper::new("n1", Arc::new(Echo { tag: "echo" }))
        .with_params(params(json!({"value": 1})));
    let mut shared = SharedState::new();

    node.run(&mut shared).await.unwrap();
    assert_eq!(shared.get("echo_result"), shared.get("result"));
    assert_eq!(shared.get("result").unwrap()["params"]["value"], 1);
}

#[tokio::test]
async fn explicit_type_parameter_wins_over_tag_and_shape() {
    let node = NodeWrapper::new("n1", Arc::new(Echo { tag: "echo" }))
        .with_params(params(json!({"type": "custom", "url": "http://x", "model": "m"})));
    let mut shared = SharedState::new();

    node.run(&mut shared).await.unwrap();
    assert!(shared.get("custom_result").is_some());
    assert!(shared.get("echo_result").is_none());
    assert!(shared.get("http_result").is_none());
}

#[tokio::test]
async fn untagged_executors_fall_back_to_shape_inference() {
    let node = NodeWrapper::new("n1", Arc::new(Echo { tag: "" }))
        .with_params(params(json!({"url": "http://x", "model": "m"})));
    let mut shared = SharedState::new();

    node.run(&mut shared).await.unwrap();
    assert!(shared.get("http_result").is_some());
    assert!(shared.get("llm_result").is_none());
}

#[tokio::test]
async fn secrets_and_earlier_results_resolve_into_params() {
    let (_provider, ctx) = execution("exec-resolve", "acct").await;
    let mut shared = SharedState::new().with_context(ctx);

    let first = NodeWrapper::new("first", Arc::new(Echo { tag: "echo" }))
        .with_params(params(json!({"id": 42})));
    first.run(&mut shared).await.unwrap();

    let second = NodeWrapper::new("second", Arc::new(Echo { tag: "echo" })).with_params(params(json!({
        "id": "${first.params.id}",
        "auth": "Bearer ${API_KEY}",
        "label": "item-${results.echo.params.id}"
    })));
    second.run(&mut shared).await.unwrap();

    let resolved = &shared.get("result").unwrap()["params"];
    assert_eq!(resolved["id"], 42);
    assert_eq!(resolved["auth"], "Bearer sk-test");
    assert_eq!(resolved["label"], "item-42");
    assert!(shared.resolution_failures().is_empty());

    // The script snapshot carries earlier results but never secrets.
    let snapshot = &shared.get("result").unwrap()["context"];
    assert_eq!(snapshot["first"]["params"]["id"], 42);
    assert!(!snapshot.to_string().contains("sk-test"));
}

#[tokio::test]
async fn shared_state_is_merged_but_reserved_keys_are_not() {
    let (_provider, ctx) = execution("exec-merge", "acct").await;
    let mut shared = SharedState::new().with_context(ctx);
    shared.insert("greeting", "hello");
    shared.insert("_internal", "hidden");

    let node = NodeWrapper::new("n", Arc::new(Echo { tag: "echo" })).with_params(params(json!({
        "text": "${greeting} world"
    })));
    node.run(&mut shared).await.unwrap();
    assert_eq!(shared.get("result").unwrap()["params"]["text"], "hello world");

    let ctx = shared.context().unwrap();
    assert_eq!(ctx.shared_data["greeting"], "hello");
    assert!(!ctx.shared_data.contains_key("_internal"));
}

#[tokio::test]
async fn flow_input_is_passed_only_for_flow_invocations() {
    let node = NodeWrapper::new("n", Arc::new(Echo { tag: "echo" }));

    let mut direct = SharedState::new();
    direct.insert("other", 1);
    node.run(&mut direct).await.unwrap();
    assert_eq!(direct.get("result").unwrap()["input"], json!({}));

    let mut flow = SharedState::new();
    flow.insert("question", "why?");
    flow.insert("accountID", "acct");
    node.run(&mut flow).await.unwrap();
    assert_eq!(flow.get("result").unwrap()["input"], json!({"question": "why?"}));
}

#[tokio::test]
async fn routing_comes_from_the_executor() {
    let node = NodeWrapper::new("n", Arc::new(Echo { tag: "echo" }))
        .with_params(params(json!({"next": "left"})));
    let mut shared = SharedState::new();
    assert_eq!(node.run(&mut shared).await.unwrap(), "left");
}

#[tokio::test]
async fn executor_failures_propagate_and_leave_earlier_results() {
    let mut shared = SharedState::new();
    shared.insert("result", "from before");

    let node = NodeWrapper::new("bad", Arc::new(Boom));
    let err = node.run(&mut shared).await.unwrap_err();
    assert!(err.is_execution());
    assert_eq!(shared.get("result").unwrap(), "from before");
    assert!(shared.get("boom_result").is_none());
}

#[test]
fn graph_contract_accessors() {
    let a = NodeWrapper::new("a", Arc::new(Echo { tag: "echo" }));
    let b: Arc<dyn Node> = Arc::new(NodeWrapper::new("b", Arc::new(Echo { tag: "echo" })));

    a.set_params(params(json!({"k": "v"})));
    assert_eq!(a.params()["k"], "v");

    a.next("success", b.clone());
    let successors = a.successors();
    assert_eq!(successors.len(), 1);
    assert_eq!(successors["success"].id(), "b");
}
