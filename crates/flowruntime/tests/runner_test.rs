mod common;

use common::{execution, init_tracing, params, Boom, Echo};
use flowcore::{
    ExecutionState, FlowError, Node, NodeError, SharedState, StorageProvider,
};
use flowruntime::{FlowRunner, NodeWrapper, RuntimeConfig};
use serde_json::json;
use std::sync::Arc;

fn echo(id: &str, next: Option<&str>) -> Arc<dyn Node> {
    let node = NodeWrapper::new(id, Arc::new(Echo { tag: "echo" }));
    let node = match next {
        Some(action) => node.with_params(params(json!({"next": action, "node": id}))),
        None => node.with_params(params(json!({"node": id}))),
    };
    Arc::new(node)
}

#[tokio::test]
async fn follows_the_routed_action() {
    init_tracing();
    let start = echo("start", Some("left"));
    let left = echo("left", None);
    let right = echo("right", None);
    start.next("left", left.clone());
    start.next("right", right.clone());

    let mut shared = SharedState::new();
    let action = FlowRunner::default().run(start, &mut shared).await.unwrap();

    assert_eq!(action, "default");
    assert_eq!(shared.get("result").unwrap()["params"]["node"], "left");
}

#[tokio::test]
async fn unmatched_actions_fall_back_to_default_successor() {
    let start = echo("start", Some("nowhere"));
    let fallback = echo("fallback", None);
    start.next("default", fallback);

    let mut shared = SharedState::new();
    FlowRunner::default().run(start, &mut shared).await.unwrap();
    assert_eq!(shared.get("result").unwrap()["params"]["node"], "fallback");
}

#[tokio::test]
async fn action_cycles_hit_the_step_limit() {
    let looping = echo("loop", Some("again"));
    looping.next("again", looping.clone());

    let runner = FlowRunner::new(RuntimeConfig {
        max_steps: 5,
        ..RuntimeConfig::default()
    });
    let mut shared = SharedState::new();
    let err = runner.run(looping, &mut shared).await.unwrap_err();
    assert!(matches!(err, FlowError::StepLimit(5)));
}

#[tokio::test]
async fn successful_runs_record_the_execution() -> anyhow::Result<()> {
    let (provider, ctx) = execution("exec-ok", "acct").await;
    let start = echo("a", None);
    start.next("default", echo("b", None));

    let mut shared = SharedState::new().with_context(ctx);
    FlowRunner::default().run(start, &mut shared).await?;

    let store = provider.execution_store();
    let record = store.get_execution("exec-ok").await?;
    assert_eq!(record.status, ExecutionState::Succeeded);
    assert_eq!(record.account_id.as_deref(), Some("acct"));
    assert!(record.end_time.is_some());
    assert_eq!(record.results["b"]["params"]["node"], "b");

    let logs = store.get_execution_logs("exec-ok").await?;
    let nodes: Vec<&str> = logs.iter().map(|l| l.node_id.as_str()).collect();
    assert_eq!(nodes, vec!["a", "b"]);

    assert_eq!(store.list_executions("acct").await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn failing_nodes_fail_the_execution_and_keep_partial_results() {
    let (provider, ctx) = execution("exec-fail", "acct").await;
    let start = echo("a", None);
    start.next("default", Arc::new(NodeWrapper::new("b", Arc::new(Boom))));

    let mut shared = SharedState::new().with_context(ctx);
    let err = FlowRunner::default().run(start, &mut shared).await.unwrap_err();
    assert!(matches!(err, FlowError::Node(NodeError::Execution(_))));

    assert_eq!(shared.get("echo_result").unwrap()["params"]["node"], "a");

    let store = provider.execution_store();
    let record = store.get_execution("exec-fail").await.unwrap();
    assert_eq!(record.status, ExecutionState::Failed);
    assert!(record.error.unwrap().contains("exploded"));
    assert!(record.results.contains_key("a"));

    let logs = store.get_execution_logs("exec-fail").await.unwrap();
    assert!(logs.iter().any(|l| l.node_id == "b" && l.level == "error"));
}

#[tokio::test]
async fn cancelled_executions_stop_before_the_next_node() {
    let (provider, ctx) = execution("exec-cancel", "acct").await;
    let token = ctx.cancellation.clone();
    token.cancel();

    let mut shared = SharedState::new().with_context(ctx);
    let err = FlowRunner::default()
        .run(echo("a", None), &mut shared)
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Node(NodeError::Cancelled)));
    assert!(shared.get("result").is_none());

    let record = provider
        .execution_store()
        .get_execution("exec-cancel")
        .await
        .unwrap();
    assert_eq!(record.status, ExecutionState::Cancelled);
}
