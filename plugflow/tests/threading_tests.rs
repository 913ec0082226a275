//! Concurrent evaluation of a shared graph.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use plugflow::graph::CachePolicy;
use plugflow::nodes::{AddNode, FrameNode, MultiplyNode};
use plugflow::{
    Canceller, Computation, ComputeNode, ContentHash, Context, EngineError, EvalContext, Graph, PlugId, Value,
    ValueCache,
};

fn frame_plus_one() -> (Graph, PlugId) {
    let mut graph = Graph::with_cache(Arc::new(ValueCache::new(64 << 20)));
    let frame = graph.add_node("frame", FrameNode::build);
    let add = graph.add_node("add", AddNode::build);
    let (scale, frame_out) = {
        let node = graph.node_as::<FrameNode>(frame).unwrap();
        (node.scale, node.out)
    };
    let (op1, op2, sum) = {
        let node = graph.node_as::<AddNode>(add).unwrap();
        (node.op1, node.op2, node.sum)
    };
    graph.set_value(scale, 2.0).unwrap();
    graph.set_value(op2, 1.0).unwrap();
    graph.set_input(op1, Some(frame_out)).unwrap();
    (graph, sum)
}

#[test]
fn test_parallel_reads_agree() {
    let (graph, sum) = frame_plus_one();
    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for frame in 1..=50 {
                    let ctx = Context::new().with_frame(frame as f64);
                    let value = graph.get_value(sum, &ctx).unwrap();
                    assert_eq!(*value, Value::from(frame as f64 * 2.0 + 1.0));
                }
            });
        }
    });
    assert!(graph.value_cache().len() >= 50);
}

#[test]
fn test_cancelled_reader_does_not_disturb_others() {
    let (graph, sum) = frame_plus_one();
    let canceller = Canceller::new();
    canceller.cancel();
    thread::scope(|scope| {
        scope.spawn(|| {
            let ctx = Context::new().with_frame(7.0);
            let result = graph.evaluator(&ctx).with_canceller(&canceller).value(sum);
            assert!(matches!(result, Err(EngineError::Cancelled)));
        });
        scope.spawn(|| {
            let ctx = Context::new().with_frame(7.0);
            assert_eq!(*graph.get_value(sum, &ctx).unwrap(), Value::from(15.0));
        });
    });
}

/// Squares `in` slowly, letting concurrent readers wait on one compute.
struct SlowSquare {
    input: PlugId,
    out: PlugId,
    computes: AtomicUsize,
}

impl ComputeNode for SlowSquare {
    fn type_name(&self) -> &'static str {
        "SlowSquare"
    }

    fn affects(&self, _graph: &Graph, input: PlugId, outputs: &mut Vec<PlugId>) -> Result<(), EngineError> {
        if input == self.input {
            outputs.push(self.out);
        }
        Ok(())
    }

    fn hash(&self, _output: PlugId, ctx: &EvalContext<'_>, h: &mut ContentHash) -> Result<(), EngineError> {
        h.append(self.type_name()).append_hash(&ctx.hash(self.input)?);
        Ok(())
    }

    fn compute(&self, output: PlugId, computation: &mut Computation<'_>) -> Result<(), EngineError> {
        self.computes.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        let value = computation.value(self.input)?.as_int().unwrap_or_default();
        computation.set_value(output, value * value)
    }

    fn compute_cache_policy(&self, _output: PlugId) -> CachePolicy {
        CachePolicy::TaskCollaboration
    }
}

#[test]
fn test_parallel_reads_follow_an_edited_multiply_chain() {
    let mut graph = Graph::with_cache(Arc::new(ValueCache::new(1 << 20)));
    let plugs = |graph: &Graph, id| {
        let node = graph.node_as::<MultiplyNode>(id).unwrap();
        (node.op1, node.op2, node.product)
    };
    let a = graph.add_node("a", MultiplyNode::build);
    let b = graph.add_node("b", MultiplyNode::build);
    let (a_op1, a_op2, a_product) = plugs(&graph, a);
    let (b_op1, b_op2, b_product) = plugs(&graph, b);
    graph.set_value(a_op1, 3i64).unwrap();
    graph.set_value(a_op2, 3i64).unwrap();
    graph.set_value(b_op2, 1i64).unwrap();
    graph.set_input(b_op1, Some(a_product)).unwrap();

    for (op2, expected) in [(3i64, 9i64), (4, 12), (5, 15)] {
        graph.set_value(a_op2, op2).unwrap();
        let graph = &graph;
        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(move || {
                    let ctx = Context::new();
                    for _ in 0..20 {
                        assert_eq!(*graph.get_value(b_product, &ctx).unwrap(), Value::Int(expected));
                    }
                });
            }
        });
    }
}

#[test]
fn test_collaborating_readers_share_one_compute() {
    let mut graph = Graph::with_cache(Arc::new(ValueCache::new(1 << 20)));
    let id = graph.add_node("square", |b| SlowSquare {
        input: b.add_input("in", 0i64),
        out: b.add_output("out", 0i64),
        computes: AtomicUsize::new(0),
    });
    let (input, out) = {
        let node = graph.node_as::<SlowSquare>(id).unwrap();
        (node.input, node.out)
    };
    graph.set_value(input, 7i64).unwrap();

    let start = Barrier::new(8);
    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                start.wait();
                let value = graph.get_value(out, &Context::new()).unwrap();
                assert_eq!(*value, Value::Int(49));
            });
        }
    });

    let node = graph.node_as::<SlowSquare>(id).unwrap();
    assert_eq!(node.computes.load(Ordering::SeqCst), 1);
    assert_eq!(graph.value_cache().len(), 1);
}
