use crate::error::EngineError;
use crate::evaluation::compute::{Computation, EvalContext};
use crate::evaluation::hash::ContentHash;
use crate::graph::{ComputeNode, Graph, NodeBuilder, PlugId};

/// Forwards `in` to `out` unchanged. The output hashes exactly like the
/// input, so both share one cache entry.
pub struct PassThroughNode {
    pub input: PlugId,
    pub output: PlugId,
}

impl PassThroughNode {
    pub fn build(builder: &mut NodeBuilder<'_>) -> Self {
        Self {
            input: builder.add_input("in", 0i64),
            output: builder.add_output("out", 0i64),
        }
    }
}

impl ComputeNode for PassThroughNode {
    fn type_name(&self) -> &'static str {
        "PassThrough"
    }

    fn affects(&self, _graph: &Graph, input: PlugId, outputs: &mut Vec<PlugId>) -> Result<(), EngineError> {
        if input == self.input {
            outputs.push(self.output);
        }
        Ok(())
    }

    fn hash(&self, _output: PlugId, ctx: &EvalContext<'_>, h: &mut ContentHash) -> Result<(), EngineError> {
        *h = ctx.hash(self.input)?;
        Ok(())
    }

    fn compute(&self, output: PlugId, computation: &mut Computation<'_>) -> Result<(), EngineError> {
        let value = computation.value(self.input)?;
        computation.set_value(output, (*value).clone())
    }
}
