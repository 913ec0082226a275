//! Hashing and computing plug values.
//!
//! Every read of a computed plug goes through the same steps: hash the plug,
//! look the hash up in the value cache, and on a miss run a `Computation`
//! that asks the owning node (or the plug's input, for converting
//! connections) to produce the value exactly once.

use std::sync::Arc;

use crate::error::EngineError;
use crate::graph::plug::PlugData;
use crate::graph::{CachePolicy, ComputeNode, Graph, PlugId};
use crate::task::canceller::Canceller;

use super::context::Context;
use super::hash::ContentHash;
use super::value::Value;

/// The graph, context and canceller a hash or compute runs under. Passed by
/// value to every `ComputeNode::hash()` and reachable from every
/// `Computation`.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    graph: &'a Graph,
    context: &'a Context,
    canceller: Option<&'a Canceller>,
}

impl<'a> EvalContext<'a> {
    pub fn new(graph: &'a Graph, context: &'a Context) -> Self {
        Self {
            graph,
            context,
            canceller: None,
        }
    }

    pub fn with_canceller(self, canceller: &'a Canceller) -> Self {
        Self {
            canceller: Some(canceller),
            ..self
        }
    }

    /// The same graph and canceller under a different context.
    pub fn with_context<'b>(&self, context: &'b Context) -> EvalContext<'b>
    where
        'a: 'b,
    {
        EvalContext {
            graph: self.graph,
            context,
            canceller: self.canceller,
        }
    }

    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    pub fn context(&self) -> &'a Context {
        self.context
    }

    pub fn canceller(&self) -> Option<&'a Canceller> {
        self.canceller
    }

    pub fn check_cancellation(&self) -> Result<(), EngineError> {
        match self.canceller {
            Some(canceller) => canceller.check(),
            None => Ok(()),
        }
    }

    /// Hash of the value `plug` would currently produce.
    pub fn hash(&self, plug: PlugId) -> Result<ContentHash, EngineError> {
        let graph = self.graph;
        let data = graph.plug_data(plug)?;

        if data.is_compound() {
            let mut h = ContentHash::new();
            h.append("compound");
            for child in &data.children {
                h.append_hash(&self.hash(*child)?);
            }
            return Ok(h);
        }

        let source = graph.source(plug);
        let source_data = graph.plug_data(source)?;
        if let Some(input) = source_data.input {
            // A converting connection: the same input value yields different
            // results for different destination kinds.
            let mut h = self.hash(input)?;
            h.append(&graph.kind(input)).append(&source_data.kind);
            return Ok(h);
        }

        if !graph.is_computed(source_data) {
            return Ok(source_data.static_hash);
        }

        self.hash_process(source)
    }

    fn hash_process(&self, plug: PlugId) -> Result<ContentHash, EngineError> {
        self.check_cancellation()?;
        let graph = self.graph;
        let data = graph.plug_data(plug)?;
        let node = graph
            .compute_node(data.node)
            .ok_or_else(|| EngineError::NoComputeNode(graph.full_name(plug)))?;

        let use_cache = node.hash_cache_policy(plug) != CachePolicy::Uncached;
        let key = (plug, data.dirty_generation, self.context.hash());
        if use_cache {
            if let Some(h) = graph.hash_cache.get(&key) {
                return Ok(h);
            }
        }

        let mut h = ContentHash::new();
        node.hash(plug, self, &mut h)
            .map_err(|e| e.in_process(|| graph.full_name(plug)))?;
        if h.is_null() {
            return Err(EngineError::HashNotImplemented(graph.full_name(plug))
                .in_process(|| graph.full_name(plug)));
        }

        if use_cache {
            graph.hash_cache.put(key, h);
        }
        Ok(h)
    }

    /// The current value of `plug`.
    pub fn value(&self, plug: PlugId) -> Result<Arc<Value>, EngineError> {
        self.value_internal(plug, None)
    }

    /// As `value()`, for callers that already hold `hash(plug)`.
    pub fn value_with_hash(&self, plug: PlugId, hash: ContentHash) -> Result<Arc<Value>, EngineError> {
        self.value_internal(plug, Some(hash))
    }

    fn value_internal(
        &self,
        plug: PlugId,
        precomputed_hash: Option<ContentHash>,
    ) -> Result<Arc<Value>, EngineError> {
        let graph = self.graph;
        let data = graph.plug_data(plug)?;
        if data.is_compound() {
            return Err(EngineError::NotAValuePlug(graph.full_name(plug)));
        }

        let source = graph.source(plug);
        let source_data = graph.plug_data(source)?;
        if !graph.is_computed(source_data) {
            return Ok(source_data.value.clone());
        }

        self.check_cancellation()?;
        let hash = match precomputed_hash {
            Some(h) => h,
            None => self.hash(source)?,
        };

        let node = graph.compute_node(source_data.node);
        let policy = node.map_or(CachePolicy::Standard, |n| n.compute_cache_policy(source));
        let cacheable = graph.is_cacheable(source) && policy != CachePolicy::Uncached;
        if !cacheable {
            return self.compute(source, source_data, node);
        }
        if let Some(value) = graph.value_cache().get(&hash) {
            return Ok(value);
        }

        if policy == CachePolicy::TaskCollaboration {
            return graph
                .value_cache()
                .get_or_compute(hash, || self.compute(source, source_data, node));
        }
        let value = self.compute(source, source_data, node)?;
        graph.value_cache().put(hash, value.clone(), value.memory_usage());
        Ok(value)
    }

    /// Runs a `Computation` for `source`, converting from its input or
    /// calling the owning node.
    fn compute(
        &self,
        source: PlugId,
        source_data: &PlugData,
        node: Option<&dyn ComputeNode>,
    ) -> Result<Arc<Value>, EngineError> {
        let graph = self.graph;
        let mut computation = Computation::new(source, *self);
        let result = match source_data.input {
            Some(input) => self.value(input).and_then(|value| {
                let kind = source_data.kind.ok_or_else(|| EngineError::NotAValuePlug(graph.full_name(source)))?;
                let converted = value.convert(kind).ok_or_else(|| EngineError::TypeMismatch {
                    plug: graph.full_name(source),
                    expected: kind.to_string(),
                    got: value.kind().to_string(),
                })?;
                computation.set_value(source, converted)
            }),
            None => match node {
                Some(node) => node.compute(source, &mut computation),
                None => Err(EngineError::NoComputeNode(graph.full_name(source))),
            },
        };
        result.map_err(|e| e.in_process(|| graph.full_name(source)))?;

        let value = computation.take_result().ok_or_else(|| {
            EngineError::ComputeDidNotSetValue(graph.full_name(source))
                .in_process(|| graph.full_name(source))
        })?;
        Ok(Arc::new(value))
    }
}

/// A single evaluation of one plug. The result slot may be written once,
/// and only for the plug being computed.
pub struct Computation<'a> {
    plug: PlugId,
    context: EvalContext<'a>,
    result: Option<Value>,
}

impl<'a> Computation<'a> {
    pub(crate) fn new(plug: PlugId, context: EvalContext<'a>) -> Self {
        Self {
            plug,
            context,
            result: None,
        }
    }

    /// The plug this computation produces a value for.
    pub fn plug(&self) -> PlugId {
        self.plug
    }

    pub fn context(&self) -> EvalContext<'a> {
        self.context
    }

    /// Reads another plug under this computation's context.
    pub fn value(&self, plug: PlugId) -> Result<Arc<Value>, EngineError> {
        self.context.value(plug)
    }

    pub fn check_cancellation(&self) -> Result<(), EngineError> {
        self.context.check_cancellation()
    }

    pub fn settable(&self, plug: PlugId) -> bool {
        plug == self.plug && self.result.is_none()
    }

    pub fn set_value(&mut self, plug: PlugId, value: impl Into<Value>) -> Result<(), EngineError> {
        let graph = self.context.graph();
        if plug != self.plug {
            return Err(EngineError::ResultForWrongPlug {
                plug: graph.full_name(plug),
                computing: graph.full_name(self.plug),
            });
        }
        if self.result.is_some() {
            return Err(EngineError::ResultAlreadySet(graph.full_name(plug)));
        }
        let value = value.into();
        if let Some(kind) = graph.kind(plug) {
            if !value.fits(kind) {
                return Err(EngineError::TypeMismatch {
                    plug: graph.full_name(plug),
                    expected: kind.to_string(),
                    got: value.kind().to_string(),
                });
            }
        }
        self.result = Some(value);
        Ok(())
    }

    fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }
}
