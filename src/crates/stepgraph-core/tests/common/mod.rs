//! Shared fixtures for integration tests

#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use stepgraph_core::{
    node_fn, CompiledGraph, GraphBuilder, GraphError, LastValueChannel, NodeInput, NodeOutput, NodeSpec, RetryPolicy,
    RunConfig,
};

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn input(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// Retries without waiting, so tests stay fast
pub fn fast_retry(max_attempts: usize) -> RetryPolicy {
    RetryPolicy::new(max_attempts)
        .with_initial_interval(0.001)
        .with_jitter(false)
}

pub fn config() -> RunConfig {
    RunConfig::new().with_retry_policy(fast_retry(1))
}

pub fn f(x: i64) -> i64 {
    2 * x + 1
}

/// Node applying [`f`] to one integer channel and writing another
pub fn transform(name: &str, from: &'static str, to: &'static str) -> NodeSpec {
    NodeSpec::new(
        name,
        node_fn(move |input: NodeInput| async move {
            let x = input.require(from)?.as_i64().unwrap_or_default();
            Ok(NodeOutput::new().write(to, json!(f(x))))
        }),
    )
    .reads([from])
    .writes([to])
}

/// `x -> A -> a -> B -> b -> C -> result`
///
/// B fails its first `b_failures` calls; the returned counter tracks its calls.
pub fn linear_graph(b_failures: usize, b_attempts: usize) -> (CompiledGraph, Arc<AtomicUsize>) {
    let b_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&b_calls);

    let mut builder = GraphBuilder::new();
    for channel in ["x", "a", "b", "result"] {
        builder.add_channel(channel, LastValueChannel::new());
    }
    builder
        .add_node(transform("A", "x", "a"))
        .add_node(
            NodeSpec::new(
                "B",
                node_fn(move |input: NodeInput| {
                    let calls = Arc::clone(&calls);
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < b_failures {
                            return Err(GraphError::node_execution("B", "flaky dependency"));
                        }
                        let x = input.require("a")?.as_i64().unwrap_or_default();
                        Ok(NodeOutput::new().write("b", json!(f(x))))
                    }
                }),
            )
            .reads(["a"])
            .writes(["b"])
            .with_retry_policy(fast_retry(b_attempts)),
        )
        .add_node(transform("C", "b", "result"))
        .set_entry_point("A");

    (builder.compile().expect("linear graph compiles"), b_calls)
}
