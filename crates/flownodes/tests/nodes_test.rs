use flowcore::{
    ExecutionContext, ExecutionState, NodeExecutor, NodeInput, Params, SharedState,
    StorageProvider,
};
use flownodes::{register_all, ConditionNode, DelayNode, StoreNode};
use flowruntime::{FlowRunner, NodeRegistry, RuntimeConfig};
use flowstore::{MemoryProvider, StoreSecretVault};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn params(value: Value) -> Params {
    serde_json::from_value(value).unwrap()
}

async fn exec(node: &dyn NodeExecutor, p: Value) -> Result<Value, flowcore::NodeError> {
    node.execute(NodeInput::new(params(p))).await
}

#[tokio::test]
async fn store_node_scenario() {
    let store = StoreNode::new();

    let set = exec(&store, json!({"operation": "set", "key": "x", "value": 42})).await.unwrap();
    assert_eq!(set, json!(42));
    assert_eq!(exec(&store, json!({"operation": "get", "key": "x"})).await.unwrap(), json!(42));

    let missing = exec(&store, json!({"operation": "get", "key": "y"})).await.unwrap_err();
    assert!(missing.is_execution());

    exec(&store, json!({"operation": "delete", "key": "y"})).await.unwrap();
    exec(&store, json!({"operation": "delete", "key": "x"})).await.unwrap();
    exec(&store, json!({"operation": "delete", "key": "x"})).await.unwrap();
    assert_eq!(exec(&store, json!({"operation": "list"})).await.unwrap(), json!([]));
}

#[tokio::test]
async fn store_node_validates_parameters() {
    let store = StoreNode::new();
    for bad in [
        json!({}),
        json!({"operation": "set", "key": "x"}),
        json!({"operation": "get"}),
        json!({"operation": "frobnicate", "key": "x"}),
    ] {
        let err = exec(&store, bad.clone()).await.unwrap_err();
        assert!(err.is_configuration(), "{} should be a configuration error", bad);
    }
}

#[tokio::test]
async fn store_nodes_do_not_share_entries() {
    let a = StoreNode::new();
    let b = StoreNode::new();
    exec(&a, json!({"operation": "set", "key": "k", "value": "v"})).await.unwrap();
    exec(&b, json!({"operation": "set", "key": "other", "value": 1})).await.unwrap();

    assert_eq!(exec(&a, json!({"operation": "list"})).await.unwrap(), json!(["k"]));
    assert!(exec(&b, json!({"operation": "get", "key": "k"})).await.is_err());
}

#[tokio::test]
async fn store_node_survives_concurrent_writers() {
    let store = Arc::new(StoreNode::new());
    let mut handles = Vec::new();
    for i in 0..32 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let p = params(json!({"operation": "set", "key": format!("k{}", i), "value": i}));
            store.execute(NodeInput::new(p)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    let keys = exec(store.as_ref(), json!({"operation": "list"})).await.unwrap();
    assert_eq!(keys.as_array().unwrap().len(), 32);
}

#[tokio::test]
async fn delay_node_waits_and_returns_its_input() {
    let started = Instant::now();
    let input = NodeInput::new(params(json!({"duration": "50ms"}))).with_input(json!({"question": "q"}));
    let result = DelayNode.execute(input).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(result["params"]["duration"], "50ms");
    assert_eq!(result["input"]["question"], "q");
}

#[tokio::test]
async fn delay_node_rejects_bad_durations() {
    assert!(exec(&DelayNode, json!({})).await.unwrap_err().is_configuration());
    assert!(exec(&DelayNode, json!({"duration": "soon"})).await.unwrap_err().is_configuration());
}

#[tokio::test]
async fn delay_node_honours_cancellation() {
    let token = CancellationToken::new();
    token.cancel();
    let input = NodeInput::new(params(json!({"duration": "1h"}))).with_cancellation(token);
    let err = DelayNode.execute(input).await.unwrap_err();
    assert!(matches!(err, flowcore::NodeError::Cancelled));
}

#[tokio::test]
async fn delays_do_not_block_other_executions() {
    let started = Instant::now();
    let slow = tokio::spawn(exec_owned(json!({"duration": "200ms"})));
    let fast = tokio::spawn(exec_owned(json!({"duration": "10ms"})));

    fast.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_millis(200));
    slow.await.unwrap().unwrap();
}

async fn exec_owned(p: Value) -> Result<Value, flowcore::NodeError> {
    DelayNode.execute(NodeInput::new(params(p))).await
}

async fn condition_action(script: &str, input: Value) -> String {
    let node = ConditionNode::default();
    let p = params(json!({"condition_script": script}));
    let result = node
        .execute(NodeInput::new(p.clone()).with_input(input))
        .await
        .unwrap();
    node.route(&SharedState::new(), &p, &result).unwrap()
}

#[tokio::test]
async fn condition_routes_on_script_results() {
    assert_eq!(condition_action("return true", json!({})).await, "true");
    assert_eq!(condition_action("return false", json!({})).await, "false");
    assert_eq!(condition_action("return \"go_left\"", json!({})).await, "go_left");
    assert_eq!(condition_action("return 42", json!({})).await, "42");
    assert_eq!(
        condition_action("return input.amount > 100", json!({"amount": 250})).await,
        "true"
    );
}

#[tokio::test]
async fn condition_failures_are_node_errors() {
    let node = ConditionNode::default();

    let err = exec(&node, json!({})).await.unwrap_err();
    assert!(err.is_configuration());

    let err = exec(&node, json!({"condition_script": "return ("})).await.unwrap_err();
    assert!(matches!(err, flowcore::NodeError::Script(flowcore::ScriptError::Parse(_))));
    assert!(err.is_execution());

    let err = exec(&node, json!({"condition_script": "error('boom')"})).await.unwrap_err();
    assert!(matches!(err, flowcore::NodeError::Script(flowcore::ScriptError::Runtime(_))));
}

#[tokio::test]
async fn legacy_direct_parameter_maps_are_accepted() {
    let input = NodeInput::from_value(json!({"operation": "set", "key": "a", "value": true})).unwrap();
    assert_eq!(StoreNode::new().execute(input).await.unwrap(), json!(true));
}

#[test]
fn registry_knows_the_builtin_types() {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry, &RuntimeConfig::default());

    assert_eq!(
        registry.list_node_types(),
        vec!["condition", "delay", "http.request", "store"]
    );
    let meta = registry.get_metadata("http.request").unwrap();
    assert!(meta.params.iter().any(|p| p.name == "url" && p.required));
    assert!(registry.create_node("smtp", "n", Params::new()).is_err());
}

#[tokio::test]
async fn registry_built_flow_runs_end_to_end() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/orders"))
        .and(header("authorization", "Bearer sk-orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total": 250})))
        .mount(&server)
        .await;

    let provider = Arc::new(MemoryProvider::new());
    provider.initialize().await?;
    provider
        .secret_store()
        .save_secret(flowcore::Secret::new("acct", "ORDERS_TOKEN", "sk-orders"))
        .await?;

    let mut registry = NodeRegistry::new();
    register_all(&mut registry, &RuntimeConfig::default());

    let fetch = registry
        .create_node(
            "http.request",
            "fetch",
            params(json!({
                "url": format!("{}/orders", server.uri()),
                "bearer_token": "${secrets.ORDERS_TOKEN}"
            })),
        )?;
    let check = registry
        .create_node(
            "condition",
            "check",
            params(json!({"condition_script": "return context.http.body.total > 100"})),
        )?;
    let remember = registry
        .create_node(
            "store",
            "remember",
            params(json!({"operation": "set", "key": "total", "value": "${http.body.total}"})),
        )?;
    let wait = registry
        .create_node("delay", "wait", params(json!({"duration": "1ms"})))?;

    fetch.next("success", check.clone());
    check.next("true", remember.clone());
    check.next("false", wait.clone());

    let vault = Arc::new(StoreSecretVault::new(provider.secret_store()));
    let ctx = ExecutionContext::new("exec-e2e", "orders-flow", "acct", vault)
        .with_execution_store(provider.execution_store());
    let mut shared = SharedState::new().with_context(ctx);
    shared.insert("question", "big order?");

    let action = FlowRunner::default().run(fetch, &mut shared).await?;
    assert_eq!(action, "default");

    assert_eq!(shared.get("http_result").unwrap()["status_code"], 200);
    assert_eq!(shared.get("condition_result").unwrap(), &json!(true));
    assert_eq!(shared.get("store_result").unwrap(), &json!(250));
    assert_eq!(shared.get("result").unwrap(), &json!(250));
    assert!(shared.resolution_failures().is_empty());

    let store = provider.execution_store();
    let record = store.get_execution("exec-e2e").await?;
    assert_eq!(record.status, ExecutionState::Succeeded);
    let logged: Vec<String> = store
        .get_execution_logs("exec-e2e")
        .await?
        .into_iter()
        .map(|l| l.node_id)
        .collect();
    assert_eq!(logged, vec!["fetch", "check", "remember"]);
    Ok(())
}
