use crate::error::EngineError;
use crate::evaluation::compute::{Computation, EvalContext};
use crate::evaluation::hash::ContentHash;
use crate::graph::{ComputeNode, Graph, NodeBuilder, PlugId};

/// Outputs the context's frame, multiplied by `scale`.
pub struct FrameNode {
    pub scale: PlugId,
    pub out: PlugId,
}

impl FrameNode {
    pub fn build(builder: &mut NodeBuilder<'_>) -> Self {
        Self {
            scale: builder.add_input("scale", 1.0),
            out: builder.add_output("out", 0.0),
        }
    }
}

impl ComputeNode for FrameNode {
    fn type_name(&self) -> &'static str {
        "Frame"
    }

    fn affects(&self, _graph: &Graph, input: PlugId, outputs: &mut Vec<PlugId>) -> Result<(), EngineError> {
        if input == self.scale {
            outputs.push(self.out);
        }
        Ok(())
    }

    fn hash(&self, _output: PlugId, ctx: &EvalContext<'_>, h: &mut ContentHash) -> Result<(), EngineError> {
        h.append(self.type_name())
            .append(&ctx.context().frame().to_bits())
            .append_hash(&ctx.hash(self.scale)?);
        Ok(())
    }

    fn compute(&self, output: PlugId, computation: &mut Computation<'_>) -> Result<(), EngineError> {
        let frame = computation.context().context().frame();
        let scale = computation.value(self.scale)?.as_float().unwrap_or(1.0);
        computation.set_value(output, frame * scale)
    }
}
