//! Pausing runs before and after nodes, then resuming them

mod common;

use common::{config, f, init_tracing, input, linear_graph};
use serde_json::json;
use std::sync::atomic::Ordering;
use stepgraph_core::{
    node_fn, CancellationHandle, CheckpointSaver, GraphBuilder, InterruptWhen, LastValueChannel, NodeInput, NodeOutput,
    NodeSpec, RunStatus,
};

#[tokio::test]
async fn test_interrupt_before_then_resume() {
    init_tracing();
    let (graph, b_calls) = linear_graph(0, 1);
    let graph = graph.with_config(config().with_interrupt_before(["B"]));

    let paused = graph.invoke("review", input(&[("x", json!(1))])).await.unwrap();
    assert_eq!(paused.status, RunStatus::InterruptedBefore { nodes: vec!["B".to_string()] });
    assert_eq!(paused.step, 1);
    assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    assert!(!paused.values.contains_key("b"));

    // Pausing does not create a checkpoint
    assert_eq!(graph.checkpointer().list("review").await.unwrap().len(), 2);

    let done = graph.resume_to_end("review", None).await.unwrap();
    assert_eq!(done.status, RunStatus::Done);
    assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    assert_eq!(done.values["result"], json!(f(f(f(1)))));
}

#[tokio::test]
async fn test_interrupt_after_then_resume() {
    let (graph, b_calls) = linear_graph(0, 1);
    let graph = graph.with_config(config().with_interrupt_after(["A"]));

    let paused = graph.invoke("after", input(&[("x", json!(1))])).await.unwrap();
    assert_eq!(paused.status, RunStatus::InterruptedAfter { nodes: vec!["A".to_string()] });
    assert_eq!(paused.step, 1);
    assert_eq!(paused.values["a"], json!(f(1)));
    assert_eq!(b_calls.load(Ordering::SeqCst), 0);

    let done = graph.resume_to_end("after", None).await.unwrap();
    assert_eq!(done.status, RunStatus::Done);
    assert_eq!(done.values["result"], json!(f(f(f(1)))));
}

#[tokio::test]
async fn test_interrupt_before_entry_node() {
    let (graph, _) = linear_graph(0, 1);
    let paused = graph
        .invoke_with_config("entry", input(&[("x", json!(1))]), config().with_interrupt_before(["A"]))
        .await
        .unwrap();
    assert_eq!(paused.status, RunStatus::InterruptedBefore { nodes: vec!["A".to_string()] });
    assert_eq!(paused.step, 0);
    assert_eq!(graph.checkpointer().list("entry").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_interrupted_result_lists_planned_tasks() {
    let (graph, _) = linear_graph(0, 1);
    let mut run = graph
        .start(
            "planned",
            input(&[("x", json!(1))]),
            config().with_interrupt_before(["B"]),
            CancellationHandle::new(),
        )
        .await
        .unwrap();

    run.tick().await.unwrap();
    let paused = run.tick().await.unwrap();
    assert!(paused.status.is_interrupted());
    assert_eq!(paused.tasks.len(), 1);
    assert_eq!(paused.tasks[0].node, "B");
    assert_eq!(paused.tasks[0].attempts, 0);
    assert!(paused.updated_channels.is_empty());
}

/// `n -> inc -> n`, asking to pause before itself once `n` reaches 2 and
/// halting at 5
fn self_interrupting_graph(when: InterruptWhen) -> stepgraph_core::CompiledGraph {
    let mut builder = GraphBuilder::new();
    builder
        .add_channel("n", LastValueChannel::new())
        .add_node(
            NodeSpec::new(
                "inc",
                node_fn(move |input: NodeInput| async move {
                    let n = input.require("n")?.as_i64().unwrap_or_default();
                    let mut output = NodeOutput::new().write("n", json!(n + 1));
                    if n == 2 {
                        output = output.interrupt(when);
                    }
                    if n + 1 == 5 {
                        output = output.halt();
                    }
                    Ok(output)
                }),
            )
            .reads(["n"])
            .writes(["n"]),
        )
        .set_entry_point("inc");
    builder.compile().unwrap().with_config(config())
}

#[tokio::test]
async fn test_node_requested_interrupt_before_fires_once() {
    init_tracing();
    let graph = self_interrupting_graph(InterruptWhen::Before);

    let paused = graph.invoke("dyn-before", input(&[("n", json!(0))])).await.unwrap();
    assert_eq!(paused.status, RunStatus::InterruptedBefore { nodes: vec!["inc".to_string()] });
    assert_eq!(paused.step, 3);
    assert_eq!(paused.values["n"], json!(3));

    let latest = graph.get_state("dyn-before").await.unwrap().unwrap();
    assert!(latest.interrupts.before.contains("inc"));

    let done = graph.resume_to_end("dyn-before", None).await.unwrap();
    assert_eq!(done.status, RunStatus::Done);
    assert_eq!(done.values["n"], json!(5));

    let latest = graph.get_state("dyn-before").await.unwrap().unwrap();
    assert!(latest.interrupts.is_empty());
}

#[tokio::test]
async fn test_node_requested_interrupt_after_fires_once() {
    let graph = self_interrupting_graph(InterruptWhen::After);

    let paused = graph.invoke("dyn-after", input(&[("n", json!(0))])).await.unwrap();
    assert_eq!(paused.status, RunStatus::InterruptedAfter { nodes: vec!["inc".to_string()] });
    // Requested while n went 2 -> 3, fires when inc runs next (3 -> 4)
    assert_eq!(paused.step, 4);
    assert_eq!(paused.values["n"], json!(4));

    let done = graph.resume_to_end("dyn-after", None).await.unwrap();
    assert_eq!(done.status, RunStatus::Done);
    assert_eq!(done.values["n"], json!(5));
}

#[tokio::test]
async fn test_streamed_run_ends_at_interrupt() {
    use futures::StreamExt;

    let (graph, _) = linear_graph(0, 1);
    let handle = graph
        .stream_with_config("stream-pause", input(&[("x", json!(1))]), config().with_interrupt_after(["B"]))
        .await
        .unwrap();

    let outcome = handle.outcome().await.unwrap();
    assert_eq!(outcome.status, RunStatus::InterruptedAfter { nodes: vec!["B".to_string()] });

    let resumed = graph
        .stream_resume("stream-pause", None, config())
        .await
        .unwrap();
    let values: Vec<_> = resumed.values().collect().await;
    let last = values.last().unwrap().as_ref().unwrap();
    assert_eq!(last["result"], json!(f(f(f(1)))));
}

#[tokio::test]
async fn test_resume_latest_continues_paused_run() {
    let (graph, _) = linear_graph(0, 1);
    let graph = graph.with_config(config().with_interrupt_after(["A", "B"]));

    graph.invoke("latest", input(&[("x", json!(1))])).await.unwrap();

    let mut run = graph.resume_latest("latest").await.unwrap();
    assert_eq!(run.checkpoint().step, 1);
    let paused = run.run_to_end().await.unwrap();
    assert_eq!(paused.status, RunStatus::InterruptedAfter { nodes: vec!["B".to_string()] });

    let mut run = graph.resume_latest("latest").await.unwrap();
    let done = run.run_to_end().await.unwrap();
    assert_eq!(done.status, RunStatus::Done);
    assert_eq!(done.values["result"], json!(f(f(f(1)))));
}
