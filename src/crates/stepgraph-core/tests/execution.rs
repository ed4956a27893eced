//! End-to-end execution of compiled graphs

mod common;

use common::{config, f, fast_retry, init_tracing, input, linear_graph, transform};
use futures::StreamExt;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stepgraph_core::{
    node_fn, BinaryOperatorChannel, CheckpointSaver, GraphBuilder, GraphError, LastValueChannel, NodeInput, NodeOutput,
    NodeSpec, Push, RunStatus, TaskKind, TopicChannel,
};

#[tokio::test]
async fn test_linear_graph_runs_three_supersteps() {
    init_tracing();
    let (graph, _) = linear_graph(0, 1);

    let outcome = graph
        .invoke_with_config("linear", input(&[("x", json!(1))]), config())
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(outcome.step, 3);
    assert_eq!(outcome.values["result"], json!(f(f(f(1)))));

    let ids = graph.checkpointer().list("linear").await.unwrap();
    assert_eq!(ids.len(), 4);
    let history = graph.history("linear", None).await.unwrap();
    let steps: Vec<u64> = history.iter().map(|c| c.step).collect();
    assert_eq!(steps, vec![3, 2, 1, 0]);
    assert_eq!(history[0].metadata.nodes, vec!["C".to_string()]);
}

#[tokio::test]
async fn test_failing_node_recovers_on_retry() {
    init_tracing();
    let (reference, _) = linear_graph(0, 1);
    let (flaky, b_calls) = linear_graph(1, 2);

    let expected = reference
        .invoke_with_config("r", input(&[("x", json!(1))]), config())
        .await
        .unwrap();

    let mut handle = flaky
        .stream_with_config("r", input(&[("x", json!(1))]), config())
        .await
        .unwrap();
    let mut results = Vec::new();
    while let Some(item) = handle.next().await {
        results.push(item.unwrap());
    }

    assert_eq!(b_calls.load(Ordering::SeqCst), 2);
    let b_task = results
        .iter()
        .flat_map(|r| r.tasks.iter())
        .find(|t| t.node == "B")
        .unwrap();
    assert_eq!(b_task.attempts, 2);

    let last = results.last().unwrap();
    assert_eq!(last.status, RunStatus::Done);
    assert_eq!(last.values, expected.values);
}

#[tokio::test]
async fn test_exhausted_retries_fail_run_and_keep_last_checkpoint() {
    init_tracing();
    let (graph, b_calls) = linear_graph(5, 2);

    let err = graph
        .invoke_with_config("fail", input(&[("x", json!(1))]), config())
        .await
        .unwrap_err();
    match err {
        GraphError::TaskExecution { node, attempts, .. } => {
            assert_eq!(node, "B");
            assert_eq!(attempts, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(b_calls.load(Ordering::SeqCst), 2);

    let latest = graph.get_state("fail").await.unwrap().unwrap();
    assert_eq!(latest.step, 1);
    assert_eq!(latest.channel_values.get("a"), Some(&json!(3)));
    assert!(!latest.channel_values.contains_key("b"));
}

#[tokio::test]
async fn test_last_writer_in_task_order_wins() {
    init_tracing();
    let writer = |name: &'static str| {
        NodeSpec::new(
            name,
            node_fn(move |_input: NodeInput| async move {
                if name == "D" {
                    // Finish last so completion order differs from task order
                    tokio::time::sleep(Duration::from_millis(30)).await;
                }
                Ok(NodeOutput::new().write("out", json!(name)))
            }),
        )
        .reads(["in"])
        .writes(["out"])
    };

    let mut builder = GraphBuilder::new();
    builder
        .add_channel("in", LastValueChannel::new())
        .add_channel("out", LastValueChannel::new())
        .add_node(writer("D"))
        .add_node(writer("E"))
        .set_entry_points(["D", "E"]);
    let graph = builder.compile().unwrap();

    let outcome = graph
        .invoke_with_config("de", input(&[("in", json!(0))]), config())
        .await
        .unwrap();
    assert_eq!(outcome.values["out"], json!("E"));
}

#[tokio::test]
async fn test_reducer_channel_combines_concurrent_writes() {
    let adder = |name: &str, amount: i64| {
        NodeSpec::new(
            name,
            node_fn(move |_input: NodeInput| async move { Ok(NodeOutput::new().write("total", json!(amount))) }),
        )
        .reads(["start"])
        .writes(["total"])
    };

    let mut builder = GraphBuilder::new();
    builder
        .add_channel("start", LastValueChannel::new())
        .add_channel("total", BinaryOperatorChannel::sum())
        .add_node(adder("p", 2))
        .add_node(adder("q", 5))
        .set_entry_points(["p", "q"]);
    let graph = builder.compile().unwrap();

    let outcome = graph
        .invoke_with_config("sum", input(&[("start", json!(true)), ("total", json!(10))]), config())
        .await
        .unwrap();
    assert_eq!(outcome.values["total"], json!(17));
}

#[tokio::test]
async fn test_identical_runs_produce_identical_checkpoints() {
    let (graph, _) = linear_graph(0, 1);
    for run in ["first", "second"] {
        graph
            .invoke_with_config(run, input(&[("x", json!(4))]), config())
            .await
            .unwrap();
    }

    let first = graph.history("first", None).await.unwrap();
    let second = graph.history("second", None).await.unwrap();
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert!(a.same_state(b), "checkpoints at step {} differ", a.step);
    }
}

#[tokio::test]
async fn test_push_and_pull_for_same_node_both_run() {
    init_tracing();
    let mut builder = GraphBuilder::new();
    builder
        .add_channel("start", LastValueChannel::new())
        .add_channel("trigger", LastValueChannel::new())
        .add_channel("seen", TopicChannel::new())
        .add_node(
            NodeSpec::new(
                "S",
                node_fn(|_input: NodeInput| async {
                    Ok(NodeOutput::new()
                        .write("trigger", json!(1))
                        .push(Push::new("W", json!("p0")))
                        .push(Push::new("W", json!("p1"))))
                }),
            )
            .reads(["start"])
            .writes(["trigger"]),
        )
        .add_node(
            NodeSpec::new(
                "W",
                node_fn(|input: NodeInput| async move {
                    let seen = match input.kind {
                        TaskKind::Push => format!("push:{}", input.payload.unwrap_or_default().as_str().unwrap_or("")),
                        TaskKind::Pull => "pull".to_string(),
                    };
                    Ok(NodeOutput::new().write("seen", json!(seen)))
                }),
            )
            .reads(["trigger"])
            .writes(["seen"]),
        )
        .set_entry_point("S");
    let graph = builder.compile().unwrap();

    let outcome = graph
        .invoke_with_config("pushpull", input(&[("start", json!(true))]), config())
        .await
        .unwrap();
    assert_eq!(outcome.values["seen"], json!(["push:p0", "push:p1", "pull"]));
    assert_eq!(outcome.step, 2);
}

#[tokio::test]
async fn test_halt_stops_run_after_superstep() {
    let downstream_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&downstream_calls);

    let mut builder = GraphBuilder::new();
    builder
        .add_channel("x", LastValueChannel::new())
        .add_channel("y", LastValueChannel::new())
        .add_node(
            NodeSpec::new(
                "stopper",
                node_fn(|_input: NodeInput| async { Ok(NodeOutput::new().write("y", json!("final")).halt()) }),
            )
            .reads(["x"])
            .writes(["y"]),
        )
        .add_node(
            NodeSpec::new(
                "after",
                node_fn(move |_input: NodeInput| {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(NodeOutput::new())
                    }
                }),
            )
            .reads(["y"]),
        )
        .set_entry_point("stopper");
    let graph = builder.compile().unwrap();

    let outcome = graph
        .invoke_with_config("halt", input(&[("x", json!(0))]), config())
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(outcome.values["y"], json!("final"));
    assert_eq!(downstream_calls.load(Ordering::SeqCst), 0);
    assert!(graph.get_state("halt").await.unwrap().unwrap().halted);

    // Resuming a halted run has nothing left to do
    let resumed = graph.resume_to_end("halt", None).await.unwrap();
    assert_eq!(resumed.status, RunStatus::Done);
    assert_eq!(downstream_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_entry_node_with_empty_input_is_not_scheduled() {
    let (graph, _) = linear_graph(0, 1);
    let outcome = graph
        .invoke_with_config("empty", input(&[]), config())
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(outcome.step, 0);
    assert!(outcome.values.is_empty());
}

#[tokio::test]
async fn test_undeclared_write_fails_without_retry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut builder = GraphBuilder::new();
    builder
        .add_channel("x", LastValueChannel::new())
        .add_channel("y", LastValueChannel::new())
        .add_channel("secret", LastValueChannel::new())
        .add_node(
            NodeSpec::new(
                "sneaky",
                node_fn(move |_input: NodeInput| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(NodeOutput::new().write("secret", json!(1)))
                    }
                }),
            )
            .reads(["x"])
            .writes(["y"])
            .with_retry_policy(fast_retry(3)),
        )
        .set_entry_point("sneaky");
    let graph = builder.compile().unwrap();

    let err = graph
        .invoke_with_config("sneaky", input(&[("x", json!(1))]), config())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidWrite { ref channel, .. } if channel == "secret"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(graph.get_state("sneaky").await.unwrap().unwrap().step, 0);
}

#[tokio::test]
async fn test_push_to_unknown_node_fails_run() {
    let mut builder = GraphBuilder::new();
    builder
        .add_channel("x", LastValueChannel::new())
        .add_node(
            NodeSpec::new(
                "sender",
                node_fn(|_input: NodeInput| async { Ok(NodeOutput::new().push(Push::new("nobody", json!(null)))) }),
            )
            .reads(["x"]),
        )
        .set_entry_point("sender");
    let graph = builder.compile().unwrap();

    let err = graph
        .invoke_with_config("push", input(&[("x", json!(1))]), config())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidPush { ref target, .. } if target == "nobody"));
}

#[tokio::test]
async fn test_unknown_input_channel_is_rejected() {
    let (graph, _) = linear_graph(0, 1);
    let err = graph
        .invoke_with_config("bad-input", input(&[("nope", json!(1))]), config())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidWrite { .. }));
    assert!(graph.get_state("bad-input").await.unwrap().is_none());
}

/// `n -> inc -> n` forever
fn counter_graph(delay: Duration) -> stepgraph_core::CompiledGraph {
    let mut builder = GraphBuilder::new();
    builder
        .add_channel("n", LastValueChannel::new())
        .add_node(
            NodeSpec::new(
                "inc",
                node_fn(move |input: NodeInput| async move {
                    tokio::time::sleep(delay).await;
                    let n = input.require("n")?.as_i64().unwrap_or_default();
                    Ok(NodeOutput::new().write("n", json!(n + 1)))
                }),
            )
            .reads(["n"])
            .writes(["n"]),
        )
        .set_entry_point("inc");
    builder.compile().unwrap()
}

#[tokio::test]
async fn test_recursion_limit_fails_cyclic_graph() {
    init_tracing();
    let graph = counter_graph(Duration::ZERO);

    let err = graph
        .invoke_with_config("cycle", input(&[("n", json!(0))]), config().with_recursion_limit(5))
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::RecursionLimitExceeded { limit: 5 }));

    let latest = graph.get_state("cycle").await.unwrap().unwrap();
    assert_eq!(latest.step, 5);
    assert_eq!(latest.channel_values["n"], json!(5));
}

#[tokio::test]
async fn test_step_timeout_fails_run() {
    let graph = counter_graph(Duration::from_secs(5));

    let started = std::time::Instant::now();
    let err = graph
        .invoke_with_config(
            "slow",
            input(&[("n", json!(0))]),
            config().with_step_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, GraphError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(graph.get_state("slow").await.unwrap().unwrap().step, 0);
}

#[tokio::test]
async fn test_cancel_stops_streamed_run() {
    init_tracing();
    let graph = counter_graph(Duration::from_millis(20));

    let mut handle = graph
        .stream_with_config("cancel", input(&[("n", json!(0))]), config().with_recursion_limit(10_000))
        .await
        .unwrap();

    let first = handle.next().await.unwrap().unwrap();
    assert_eq!(first.status, RunStatus::Running);
    handle.cancel();

    let mut last = None;
    while let Some(item) = handle.next().await {
        last = Some(item);
    }
    assert!(matches!(last, Some(Err(GraphError::Cancelled(_)))));

    // Nothing past the cancelled superstep was persisted
    let latest = graph.get_state("cancel").await.unwrap().unwrap();
    assert!(latest.step < 10_000);
    assert_eq!(latest.channel_values["n"], json!(latest.step));
}

#[tokio::test]
async fn test_streamed_results_follow_supersteps() {
    let (graph, _) = linear_graph(0, 1);
    let handle = graph
        .stream_with_config("stream", input(&[("x", json!(1))]), config())
        .await
        .unwrap();
    assert_eq!(handle.run_id(), "stream");

    let results: Vec<_> = handle.collect().await;
    let statuses: Vec<_> = results.iter().map(|r| r.as_ref().unwrap().status.clone()).collect();
    assert_eq!(
        statuses,
        vec![RunStatus::Running, RunStatus::Running, RunStatus::Running, RunStatus::Done]
    );
    let steps: Vec<u64> = results.iter().map(|r| r.as_ref().unwrap().step).collect();
    assert_eq!(steps, vec![1, 2, 3, 3]);
}

#[tokio::test]
async fn test_concurrent_runs_are_isolated() {
    init_tracing();
    let (graph, _) = linear_graph(0, 1);

    let runs = (0..16).map(|i| {
        let graph = graph.clone();
        tokio::spawn(async move {
            graph
                .invoke_with_config(format!("run-{i}"), input(&[("x", json!(i))]), config())
                .await
        })
    });
    let outcomes = futures::future::join_all(runs).await;

    for (i, outcome) in outcomes.into_iter().enumerate() {
        let outcome = outcome.unwrap().unwrap();
        assert_eq!(outcome.run_id, format!("run-{i}"));
        assert_eq!(outcome.values["result"], json!(f(f(f(i as i64)))));
    }
}

#[tokio::test]
async fn test_independent_nodes_share_a_superstep() {
    let mut builder = GraphBuilder::new();
    for channel in ["x", "left", "right"] {
        builder.add_channel(channel, LastValueChannel::new());
    }
    builder
        .add_node(transform("L", "x", "left"))
        .add_node(transform("R", "x", "right"))
        .set_entry_points(["L", "R"]);
    let graph = builder.compile().unwrap();

    let outcome = graph
        .invoke_with_config("fan", input(&[("x", json!(2))]), config())
        .await
        .unwrap();
    assert_eq!(outcome.step, 1);
    assert_eq!(outcome.values["left"], json!(5));
    assert_eq!(outcome.values["right"], json!(5));
}

#[tokio::test]
async fn test_dropped_stream_lets_run_task_exit() {
    let (graph, _) = linear_graph(0, 1);
    let handle = graph
        .stream_with_config("joined", input(&[("x", json!(1))]), config())
        .await
        .unwrap();
    handle.join().await.unwrap();

    // The input checkpoint is always persisted before the stream is handed out
    assert!(graph.get_state("joined").await.unwrap().is_some());
}
