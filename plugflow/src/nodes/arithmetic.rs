use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::EngineError;
use crate::evaluation::compute::{Computation, EvalContext};
use crate::evaluation::hash::ContentHash;
use crate::graph::{ComputeNode, Graph, NodeBuilder, PlugId};

/// `product = op1 * op2` on integers. Counts its computes, which makes it
/// handy for checking what the cache saves.
pub struct MultiplyNode {
    pub op1: PlugId,
    pub op2: PlugId,
    pub product: PlugId,
    computes: AtomicUsize,
}

impl MultiplyNode {
    pub fn build(builder: &mut NodeBuilder<'_>) -> Self {
        Self {
            op1: builder.add_input("op1", 0i64),
            op2: builder.add_input("op2", 0i64),
            product: builder.add_output("product", 0i64),
            computes: AtomicUsize::new(0),
        }
    }

    pub fn compute_count(&self) -> usize {
        self.computes.load(Ordering::Relaxed)
    }
}

impl ComputeNode for MultiplyNode {
    fn type_name(&self) -> &'static str {
        "Multiply"
    }

    fn affects(&self, _graph: &Graph, input: PlugId, outputs: &mut Vec<PlugId>) -> Result<(), EngineError> {
        if input == self.op1 || input == self.op2 {
            outputs.push(self.product);
        }
        Ok(())
    }

    fn hash(&self, _output: PlugId, ctx: &EvalContext<'_>, h: &mut ContentHash) -> Result<(), EngineError> {
        h.append(self.type_name())
            .append_hash(&ctx.hash(self.op1)?)
            .append_hash(&ctx.hash(self.op2)?);
        Ok(())
    }

    fn compute(&self, output: PlugId, computation: &mut Computation<'_>) -> Result<(), EngineError> {
        self.computes.fetch_add(1, Ordering::Relaxed);
        let op1 = computation.value(self.op1)?.as_int().unwrap_or_default();
        let op2 = computation.value(self.op2)?.as_int().unwrap_or_default();
        computation.set_value(output, op1.wrapping_mul(op2))
    }
}

/// `sum = op1 + op2` on floats.
pub struct AddNode {
    pub op1: PlugId,
    pub op2: PlugId,
    pub sum: PlugId,
}

impl AddNode {
    pub fn build(builder: &mut NodeBuilder<'_>) -> Self {
        Self {
            op1: builder.add_input("op1", 0.0),
            op2: builder.add_input("op2", 0.0),
            sum: builder.add_output("sum", 0.0),
        }
    }
}

impl ComputeNode for AddNode {
    fn type_name(&self) -> &'static str {
        "Add"
    }

    fn affects(&self, _graph: &Graph, input: PlugId, outputs: &mut Vec<PlugId>) -> Result<(), EngineError> {
        if input == self.op1 || input == self.op2 {
            outputs.push(self.sum);
        }
        Ok(())
    }

    fn hash(&self, _output: PlugId, ctx: &EvalContext<'_>, h: &mut ContentHash) -> Result<(), EngineError> {
        h.append(self.type_name())
            .append_hash(&ctx.hash(self.op1)?)
            .append_hash(&ctx.hash(self.op2)?);
        Ok(())
    }

    fn compute(&self, output: PlugId, computation: &mut Computation<'_>) -> Result<(), EngineError> {
        let op1 = computation.value(self.op1)?.as_float().unwrap_or_default();
        let op2 = computation.value(self.op2)?.as_float().unwrap_or_default();
        computation.set_value(output, op1 + op2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::evaluation::cache::ValueCache;
    use crate::evaluation::context::Context;
    use crate::evaluation::value::Value;

    #[test]
    fn multiply_and_reuse() {
        let mut graph = Graph::with_cache(Arc::new(ValueCache::new(1 << 20)));
        let id = graph.add_node("Multiply", MultiplyNode::build);
        let node = graph.node_as::<MultiplyNode>(id).unwrap();
        let (op1, op2, product) = (node.op1, node.op2, node.product);

        graph.set_value(op1, 3i64).unwrap();
        graph.set_value(op2, 4i64).unwrap();
        let ctx = Context::new();
        assert_eq!(*graph.get_value(product, &ctx).unwrap(), Value::Int(12));
        assert_eq!(*graph.get_value(product, &ctx).unwrap(), Value::Int(12));
        assert_eq!(graph.node_as::<MultiplyNode>(id).unwrap().compute_count(), 1);
    }

    #[test]
    fn add_converts_int_inputs() {
        let mut graph = Graph::new();
        let id = graph.add_node("Add", AddNode::build);
        let node = graph.node_as::<AddNode>(id).unwrap();
        let (op1, sum) = (node.op1, node.sum);
        graph.set_value(op1, 2i64).unwrap();
        assert_eq!(*graph.get_value(sum, &Context::new()).unwrap(), Value::from(2.0));
    }
}
