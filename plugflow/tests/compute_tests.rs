//! Integration tests for hashing, computing and caching plug values.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use plugflow::evaluation::hash::ContentHash;
use plugflow::nodes::{FrameNode, MultiplyNode, PassThroughNode};
use plugflow::{
    Computation, ComputeNode, Context, EngineError, EvalContext, Graph, PlugId, Value, ValueCache,
};

/// Helper: a graph with its own cache, so counts aren't affected by other tests.
fn private_graph() -> Graph {
    Graph::with_cache(Arc::new(ValueCache::new(64 << 20)))
}

/// Reads the frame in `compute()` but leaves it out of `hash()`.
struct FrameWithoutHash {
    out: PlugId,
    computes: AtomicUsize,
}

impl ComputeNode for FrameWithoutHash {
    fn type_name(&self) -> &'static str {
        "FrameWithoutHash"
    }

    fn hash(&self, _output: PlugId, _ctx: &EvalContext<'_>, h: &mut ContentHash) -> Result<(), EngineError> {
        h.append(self.type_name());
        Ok(())
    }

    fn compute(&self, output: PlugId, computation: &mut Computation<'_>) -> Result<(), EngineError> {
        self.computes.fetch_add(1, Ordering::Relaxed);
        let frame = computation.context().context().frame();
        computation.set_value(output, frame)
    }
}

/// Outputs the frame, counting how often it is computed.
struct CountingFrame {
    out: PlugId,
    computes: AtomicUsize,
}

impl ComputeNode for CountingFrame {
    fn type_name(&self) -> &'static str {
        "CountingFrame"
    }

    fn hash(&self, _output: PlugId, ctx: &EvalContext<'_>, h: &mut ContentHash) -> Result<(), EngineError> {
        h.append(self.type_name()).append(&ctx.context().frame().to_bits());
        Ok(())
    }

    fn compute(&self, output: PlugId, computation: &mut Computation<'_>) -> Result<(), EngineError> {
        self.computes.fetch_add(1, Ordering::Relaxed);
        let frame = computation.context().context().frame();
        computation.set_value(output, frame)
    }
}

/// Helper: `a = 3 * 3` feeding `b = a * 1`. Returns `a.op2` and `b.product`.
fn multiply_chain(graph: &mut Graph) -> (PlugId, PlugId) {
    let a = graph.add_node("a", MultiplyNode::build);
    let b = graph.add_node("b", MultiplyNode::build);
    let (a_op1, a_op2, a_product) = {
        let node = graph.node_as::<MultiplyNode>(a).unwrap();
        (node.op1, node.op2, node.product)
    };
    let (b_op1, b_op2, b_product) = {
        let node = graph.node_as::<MultiplyNode>(b).unwrap();
        (node.op1, node.op2, node.product)
    };
    graph.set_value(a_op1, 3i64).unwrap();
    graph.set_value(a_op2, 3i64).unwrap();
    graph.set_value(b_op2, 1i64).unwrap();
    graph.set_input(b_op1, Some(a_product)).unwrap();
    (a_op2, b_product)
}

/// Misbehaves in `compute()` in the way selected by `mode`.
struct BadNode {
    out: PlugId,
    other: PlugId,
    mode: BadMode,
}

#[derive(Clone, Copy)]
enum BadMode {
    SetTwice,
    SetOther,
    SetNothing,
    NoHash,
}

impl ComputeNode for BadNode {
    fn type_name(&self) -> &'static str {
        "BadNode"
    }

    fn hash(&self, output: PlugId, _ctx: &EvalContext<'_>, h: &mut ContentHash) -> Result<(), EngineError> {
        if !matches!(self.mode, BadMode::NoHash) {
            h.append(self.type_name()).append(&output);
        }
        Ok(())
    }

    fn compute(&self, output: PlugId, computation: &mut Computation<'_>) -> Result<(), EngineError> {
        match self.mode {
            BadMode::SetTwice => {
                computation.set_value(output, 1i64)?;
                computation.set_value(output, 2i64)
            }
            BadMode::SetOther => computation.set_value(self.other, 1i64),
            BadMode::SetNothing | BadMode::NoHash => Ok(()),
        }
    }
}

fn bad_graph(mode: BadMode) -> (Graph, PlugId) {
    let mut graph = private_graph();
    let id = graph.add_node("bad", |b| BadNode {
        out: b.add_output("out", 0i64),
        other: b.add_output("other", 0i64),
        mode,
    });
    let out = graph.node_as::<BadNode>(id).unwrap().out;
    (graph, out)
}

fn process_source(err: &EngineError) -> &EngineError {
    match err {
        EngineError::Process { source, .. } => source,
        other => panic!("expected a process error, got {:?}", other),
    }
}

#[test]
fn test_multiply_recomputes_only_after_input_change() {
    let mut graph = private_graph();
    let id = graph.add_node("multiply", MultiplyNode::build);
    let node = graph.node_as::<MultiplyNode>(id).unwrap();
    let (op1, op2, product) = (node.op1, node.op2, node.product);
    let ctx = Context::new();

    graph.set_value(op1, 3i64).unwrap();
    graph.set_value(op2, 3i64).unwrap();
    assert_eq!(*graph.get_value(product, &ctx).unwrap(), Value::Int(9));
    assert_eq!(*graph.get_value(product, &ctx).unwrap(), Value::Int(9));
    assert_eq!(graph.node_as::<MultiplyNode>(id).unwrap().compute_count(), 1);

    graph.set_value(op2, 4i64).unwrap();
    assert_eq!(*graph.get_value(product, &ctx).unwrap(), Value::Int(12));
    assert_eq!(graph.node_as::<MultiplyNode>(id).unwrap().compute_count(), 2);

    // Back to a value seen before: served from the cache.
    graph.set_value(op2, 3i64).unwrap();
    assert_eq!(*graph.get_value(product, &ctx).unwrap(), Value::Int(9));
    assert_eq!(graph.node_as::<MultiplyNode>(id).unwrap().compute_count(), 2);
}

#[test]
fn test_identical_graphs_share_cached_values() {
    let cache = Arc::new(ValueCache::new(64 << 20));
    let mut counts = Vec::new();
    for _ in 0..2 {
        let mut graph = Graph::with_cache(cache.clone());
        let id = graph.add_node("multiply", MultiplyNode::build);
        let node = graph.node_as::<MultiplyNode>(id).unwrap();
        let (op1, op2, product) = (node.op1, node.op2, node.product);
        graph.set_value(op1, 6i64).unwrap();
        graph.set_value(op2, 7i64).unwrap();
        assert_eq!(*graph.get_value(product, &Context::new()).unwrap(), Value::Int(42));
        counts.push(graph.node_as::<MultiplyNode>(id).unwrap().compute_count());
    }
    assert_eq!(counts, vec![1, 0]);
}

#[test]
fn test_frame_dependent_output_follows_context() {
    let mut graph = private_graph();
    let id = graph.add_node("frame", FrameNode::build);
    let node = graph.node_as::<FrameNode>(id).unwrap();
    let (scale, out) = (node.scale, node.out);
    graph.set_value(scale, 2.0).unwrap();

    let one = Context::new().with_frame(1.0);
    let two = Context::new().with_frame(2.0);
    assert_ne!(graph.hash(out, &one).unwrap(), graph.hash(out, &two).unwrap());
    assert_eq!(*graph.get_value(out, &one).unwrap(), Value::from(2.0));
    assert_eq!(*graph.get_value(out, &two).unwrap(), Value::from(4.0));
}

#[test]
fn test_ui_variables_do_not_affect_hashes() {
    let mut graph = private_graph();
    let id = graph.add_node("frame", FrameNode::build);
    let out = graph.node_as::<FrameNode>(id).unwrap().out;
    let plain = Context::new();
    let with_ui = plain.with("ui:hover", "x");
    assert_eq!(graph.hash(out, &plain).unwrap(), graph.hash(out, &with_ui).unwrap());
}

#[test]
fn test_hash_missing_a_dependency_serves_stale_values() {
    let mut graph = private_graph();
    let id = graph.add_node("frameWithoutHash", |b| FrameWithoutHash {
        out: b.add_output("out", 0.0),
        computes: AtomicUsize::new(0),
    });
    let out = graph.node_as::<FrameWithoutHash>(id).unwrap().out;

    let one = Context::new().with_frame(1.0);
    let two = Context::new().with_frame(2.0);
    assert_eq!(*graph.get_value(out, &one).unwrap(), Value::from(1.0));
    // Same hash, so the first frame's value is reused.
    assert_eq!(*graph.get_value(out, &two).unwrap(), Value::from(1.0));
    let node = graph.node_as::<FrameWithoutHash>(id).unwrap();
    assert_eq!(node.computes.load(Ordering::Relaxed), 1);
}

#[test]
fn test_pass_through_shares_the_input_hash() {
    let mut graph = private_graph();
    let multiply = graph.add_node("multiply", MultiplyNode::build);
    let pass = graph.add_node("pass", PassThroughNode::build);
    let (op1, op2, product) = {
        let node = graph.node_as::<MultiplyNode>(multiply).unwrap();
        (node.op1, node.op2, node.product)
    };
    let (input, output) = {
        let node = graph.node_as::<PassThroughNode>(pass).unwrap();
        (node.input, node.output)
    };
    graph.set_input(input, Some(product)).unwrap();
    graph.set_value(op1, 5i64).unwrap();
    graph.set_value(op2, 5i64).unwrap();

    let ctx = Context::new();
    assert_eq!(graph.hash(output, &ctx).unwrap(), graph.hash(product, &ctx).unwrap());
    assert_eq!(*graph.get_value(output, &ctx).unwrap(), Value::Int(25));
    assert_eq!(graph.node_as::<MultiplyNode>(multiply).unwrap().compute_count(), 1);
}

#[test]
fn test_result_can_only_be_set_once() {
    let (graph, out) = bad_graph(BadMode::SetTwice);
    let err = graph.get_value(out, &Context::new()).unwrap_err();
    assert!(matches!(process_source(&err), EngineError::ResultAlreadySet(_)));
    assert!(err.to_string().starts_with("bad.out : "));
}

#[test]
fn test_result_only_for_the_computed_plug() {
    let (graph, out) = bad_graph(BadMode::SetOther);
    let err = graph.get_value(out, &Context::new()).unwrap_err();
    assert!(matches!(process_source(&err), EngineError::ResultForWrongPlug { .. }));
}

#[test]
fn test_compute_must_set_a_value() {
    let (graph, out) = bad_graph(BadMode::SetNothing);
    let err = graph.get_value(out, &Context::new()).unwrap_err();
    assert!(matches!(process_source(&err), EngineError::ComputeDidNotSetValue(_)));
}

#[test]
fn test_hash_must_append_something() {
    let (graph, out) = bad_graph(BadMode::NoHash);
    let err = graph.hash(out, &Context::new()).unwrap_err();
    assert!(matches!(process_source(&err), EngineError::HashNotImplemented(_)));
}

#[test]
fn test_outputs_are_not_settable_outside_compute() {
    let mut graph = private_graph();
    let id = graph.add_node("multiply", MultiplyNode::build);
    let product = graph.node_as::<MultiplyNode>(id).unwrap().product;
    assert!(!graph.settable(product));
    assert!(matches!(
        graph.set_value(product, 1i64),
        Err(EngineError::ResultOutsideComputation(_))
    ));
}

#[test]
fn test_error_names_the_failing_upstream_plug() {
    let (mut graph, bad_out) = bad_graph(BadMode::SetNothing);
    let pass = graph.add_node("pass", PassThroughNode::build);
    let (input, output) = {
        let node = graph.node_as::<PassThroughNode>(pass).unwrap();
        (node.input, node.output)
    };
    graph.set_input(input, Some(bad_out)).unwrap();

    let err = graph.get_value(output, &Context::new()).unwrap_err();
    match err {
        EngineError::Process { plug, .. } => assert_eq!(plug, "bad.out"),
        other => panic!("expected a process error, got {:?}", other),
    }
}

#[test]
fn test_multiply_chain_follows_upstream_edits() {
    let mut graph = private_graph();
    let (a_op2, b_product) = multiply_chain(&mut graph);
    let ctx = Context::new();

    assert_eq!(*graph.get_value(b_product, &ctx).unwrap(), Value::Int(9));
    graph.set_value(a_op2, 4i64).unwrap();
    assert_eq!(*graph.get_value(b_product, &ctx).unwrap(), Value::Int(12));
    graph.set_value(a_op2, 5i64).unwrap();
    assert_eq!(*graph.get_value(b_product, &ctx).unwrap(), Value::Int(15));
}

#[test]
fn test_equal_contexts_share_one_computation() {
    let mut graph = private_graph();
    let id = graph.add_node("frame", |b| CountingFrame {
        out: b.add_output("out", 0.0),
        computes: AtomicUsize::new(0),
    });
    let out = graph.node_as::<CountingFrame>(id).unwrap().out;

    let first = Context::new().with_frame(5.0);
    let second = Context::new().with_frame(5.0);
    let before = graph.value_cache().len();
    assert_eq!(graph.get_value(out, &first).unwrap(), graph.get_value(out, &second).unwrap());
    assert_eq!(graph.value_cache().len(), before + 1);
    let node = graph.node_as::<CountingFrame>(id).unwrap();
    assert_eq!(node.computes.load(Ordering::Relaxed), 1);
}

#[test]
fn test_hash_is_stable_while_nothing_changes() {
    let mut graph = private_graph();
    let (_, b_product) = multiply_chain(&mut graph);
    let ctx = Context::new();

    let hash = graph.hash(b_product, &ctx).unwrap();
    for _ in 0..3 {
        assert_eq!(*graph.get_value(b_product, &ctx).unwrap(), Value::Int(9));
        assert_eq!(graph.hash(b_product, &ctx).unwrap(), hash);
    }
    graph.clear_hash_cache();
    assert_eq!(graph.hash(b_product, &ctx).unwrap(), hash);
}
