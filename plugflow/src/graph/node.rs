use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::evaluation::compute::{Computation, EvalContext};
use crate::evaluation::hash::ContentHash;
use crate::evaluation::value::Value;

use super::Graph;
use super::plug::{Direction, PlugData, PlugFlags, PlugId};

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum CachePolicy {
    /// Never cached; the work is repeated on every request.
    Uncached,
    #[default]
    Standard,
    /// Cached, and threads asking for a value that is already being
    /// computed wait for that computation instead of repeating it. Suits
    /// expensive computes that many threads request at once. The compute
    /// must not block on work scheduled on the waiting threads.
    TaskCollaboration,
}

/// Behaviour of a node whose outputs are computed from its inputs.
///
/// Implementations must keep three functions consistent with each other:
///
/// - `affects()` names every output whose value may change when `input`
///   changes. Leaving an output out leads to stale results being served,
///   naming too many only costs extra hashing.
/// - `hash()` appends everything `compute()` depends on for `output`. It
///   must append at least one value; an untouched hash is reported as an
///   error.
/// - `compute()` sets the value of `output`, exactly once, through the
///   `Computation` it is given.
pub trait ComputeNode: AsAny + Send + Sync {
    fn type_name(&self) -> &'static str;

    fn affects(
        &self,
        _graph: &Graph,
        _input: PlugId,
        _outputs: &mut Vec<PlugId>,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn hash(
        &self,
        _output: PlugId,
        _context: &EvalContext<'_>,
        _h: &mut ContentHash,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn compute(&self, output: PlugId, computation: &mut Computation<'_>) -> Result<(), EngineError>;

    fn hash_cache_policy(&self, _output: PlugId) -> CachePolicy {
        CachePolicy::Standard
    }

    fn compute_cache_policy(&self, _output: PlugId) -> CachePolicy {
        CachePolicy::Standard
    }
}

pub(crate) struct NodeData {
    pub(crate) name: String,
    pub(crate) plugs: Vec<PlugId>,
    pub(crate) compute: Option<Box<dyn ComputeNode>>,
}

/// Declares the plugs of a node while it is being added to a graph.
pub struct NodeBuilder<'a> {
    graph: &'a mut Graph,
    node: NodeId,
}

impl<'a> NodeBuilder<'a> {
    pub(crate) fn new(graph: &'a mut Graph, node: NodeId) -> Self {
        Self { graph, node }
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn add_input(&mut self, name: &str, default_value: impl Into<Value>) -> PlugId {
        self.add_plug(None, name, Direction::In, Some(default_value.into()), PlugFlags::DEFAULT)
    }

    pub fn add_output(&mut self, name: &str, default_value: impl Into<Value>) -> PlugId {
        self.add_plug(None, name, Direction::Out, Some(default_value.into()), PlugFlags::DEFAULT)
    }

    /// A plug that only groups children.
    pub fn add_compound(&mut self, parent: Option<PlugId>, name: &str, direction: Direction) -> PlugId {
        self.add_plug(parent, name, direction, None, PlugFlags::DEFAULT)
    }

    /// A value plug under `parent`, taking the parent's direction.
    pub fn add_child(&mut self, parent: PlugId, name: &str, default_value: impl Into<Value>) -> PlugId {
        let direction = self.graph.plug_data(parent).map_or(Direction::In, |p| p.direction);
        self.add_plug(Some(parent), name, direction, Some(default_value.into()), PlugFlags::DEFAULT)
    }

    pub fn add_plug(
        &mut self,
        parent: Option<PlugId>,
        name: &str,
        direction: Direction,
        default_value: Option<Value>,
        flags: PlugFlags,
    ) -> PlugId {
        let id = PlugId(self.graph.plugs.len() as u32);
        self.graph.plugs.push(PlugData::new(
            name.to_string(),
            self.node,
            parent,
            direction,
            default_value,
            flags,
        ));
        match parent.and_then(|p| self.graph.plugs.get_mut(p.index())) {
            Some(parent) => parent.children.push(id),
            None => self.graph.nodes[self.node.index()].plugs.push(id),
        }
        id
    }
}
