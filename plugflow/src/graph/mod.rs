//! The node graph: an arena of nodes and plugs, their connections, and the
//! propagation of dirtiness after edits.

pub mod dirty;
pub mod node;
pub mod plug;

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use log::{error, trace};

use crate::config;
use crate::error::EngineError;
use crate::evaluation::cache::{HashCache, SharedValueCache, ValueCache};
use crate::evaluation::compute::EvalContext;
use crate::evaluation::context::Context;
use crate::evaluation::hash::ContentHash;
use crate::evaluation::value::{Value, ValueKind};

use dirty::DirtyPlugs;
pub use node::{AsAny, CachePolicy, ComputeNode, NodeBuilder, NodeId};
use node::NodeData;
pub use plug::{Direction, PlugFlags, PlugId};
use plug::PlugData;

pub type PlugDirtiedCallback = Arc<dyn Fn(&Graph, PlugId) + Send + Sync>;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

pub struct Graph {
    pub(crate) plugs: Vec<PlugData>,
    pub(crate) nodes: Vec<NodeData>,
    cache: SharedValueCache,
    pub(crate) hash_cache: HashCache,
    dirty: DirtyPlugs,
    listeners: RwLock<Vec<(ListenerId, PlugDirtiedCallback)>>,
}

impl Graph {
    /// A graph storing computed values in the process-wide cache.
    pub fn new() -> Self {
        Self::with_cache(ValueCache::shared())
    }

    pub fn with_cache(cache: SharedValueCache) -> Self {
        Self {
            plugs: Vec::new(),
            nodes: Vec::new(),
            cache,
            hash_cache: HashCache::new(config::hash_cache_size_limit()),
            dirty: DirtyPlugs::default(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn value_cache(&self) -> &SharedValueCache {
        &self.cache
    }

    pub fn set_hash_cache_size_limit(&self, size_limit: usize) {
        self.hash_cache.set_size_limit(size_limit);
    }

    pub fn clear_hash_cache(&self) {
        self.hash_cache.clear();
    }

    // Nodes

    /// Adds a compute node. `build` declares the node's plugs and returns
    /// the node implementation, which usually keeps the plug ids.
    pub fn add_node<N, F>(&mut self, name: &str, build: F) -> NodeId
    where
        N: ComputeNode + 'static,
        F: FnOnce(&mut NodeBuilder<'_>) -> N,
    {
        let id = self.push_node(name);
        let node = build(&mut NodeBuilder::new(self, id));
        self.nodes[id.index()].compute = Some(Box::new(node));
        id
    }

    /// Adds a node without compute behaviour. All its plugs hold static
    /// values, or take them from their inputs.
    pub fn add_plain_node<F>(&mut self, name: &str, build: F) -> NodeId
    where
        F: FnOnce(&mut NodeBuilder<'_>),
    {
        let id = self.push_node(name);
        build(&mut NodeBuilder::new(self, id));
        id
    }

    fn push_node(&mut self, name: &str) -> NodeId {
        let mut unique = name.to_string();
        let mut suffix = 1;
        while self.find_node(&unique).is_some() {
            unique = format!("{}{}", name, suffix);
            suffix += 1;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData {
            name: unique,
            plugs: Vec::new(),
            compute: None,
        });
        id
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .map(|i| NodeId(i as u32))
    }

    pub fn node_name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.index()).map(|n| n.name.as_str())
    }

    pub fn node_plugs(&self, node: NodeId) -> &[PlugId] {
        self.nodes.get(node.index()).map_or(&[], |n| n.plugs.as_slice())
    }

    pub fn compute_node(&self, node: NodeId) -> Option<&dyn ComputeNode> {
        self.nodes.get(node.index()).and_then(|n| n.compute.as_deref())
    }

    /// Downcasts the compute behaviour of `node`.
    pub fn node_as<T: ComputeNode + 'static>(&self, node: NodeId) -> Option<&T> {
        self.compute_node(node)
            .and_then(|n| n.as_any().downcast_ref::<T>())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // Plugs

    pub(crate) fn plug_data(&self, plug: PlugId) -> Result<&PlugData, EngineError> {
        self.plugs
            .get(plug.index())
            .ok_or_else(|| EngineError::UnknownPlug(plug.to_string()))
    }

    fn plug_data_mut(&mut self, plug: PlugId) -> Result<&mut PlugData, EngineError> {
        self.plugs
            .get_mut(plug.index())
            .ok_or_else(|| EngineError::UnknownPlug(plug.to_string()))
    }

    /// Looks up a plug by its dotted path relative to the node, for instance
    /// `"out.transform"`.
    pub fn find_plug(&self, node: NodeId, path: &str) -> Result<PlugId, EngineError> {
        let mut candidates = self.node_plugs(node);
        let mut found = None;
        for part in path.split('.') {
            let next = candidates
                .iter()
                .copied()
                .find(|p| self.plugs[p.index()].name == part)
                .ok_or_else(|| {
                    EngineError::UnknownPlug(format!(
                        "{}.{}",
                        self.node_name(node).unwrap_or("?"),
                        path
                    ))
                })?;
            candidates = &self.plugs[next.index()].children;
            found = Some(next);
        }
        found.ok_or_else(|| EngineError::UnknownPlug(path.to_string()))
    }

    pub fn plug_name(&self, plug: PlugId) -> &str {
        self.plugs.get(plug.index()).map_or("", |p| p.name.as_str())
    }

    /// `node.plug.child` style name used in error messages.
    pub fn full_name(&self, plug: PlugId) -> String {
        let Some(data) = self.plugs.get(plug.index()) else {
            return plug.to_string();
        };
        let mut parts = vec![data.name.as_str()];
        let mut parent = data.parent;
        while let Some(p) = parent {
            let parent_data = &self.plugs[p.index()];
            parts.push(parent_data.name.as_str());
            parent = parent_data.parent;
        }
        parts.push(self.node_name(data.node).unwrap_or("?"));
        parts.reverse();
        parts.join(".")
    }

    pub fn node_of(&self, plug: PlugId) -> Option<NodeId> {
        self.plugs.get(plug.index()).map(|p| p.node)
    }

    pub fn parent(&self, plug: PlugId) -> Option<PlugId> {
        self.plugs.get(plug.index()).and_then(|p| p.parent)
    }

    pub fn children(&self, plug: PlugId) -> &[PlugId] {
        self.plugs.get(plug.index()).map_or(&[], |p| p.children.as_slice())
    }

    pub fn direction(&self, plug: PlugId) -> Option<Direction> {
        self.plugs.get(plug.index()).map(|p| p.direction)
    }

    /// The value kind of the plug, `None` for compound plugs.
    pub fn kind(&self, plug: PlugId) -> Option<ValueKind> {
        self.plugs.get(plug.index()).and_then(|p| p.kind)
    }

    pub fn flags(&self, plug: PlugId) -> PlugFlags {
        self.plugs.get(plug.index()).map_or_else(PlugFlags::default, |p| p.flags)
    }

    pub fn set_flags(&mut self, plug: PlugId, flags: PlugFlags) -> Result<(), EngineError> {
        self.plug_data_mut(plug)?.flags = flags;
        Ok(())
    }

    pub fn input(&self, plug: PlugId) -> Option<PlugId> {
        self.plugs.get(plug.index()).and_then(|p| p.input)
    }

    pub fn outputs(&self, plug: PlugId) -> &[PlugId] {
        self.plugs.get(plug.index()).map_or(&[], |p| p.outputs.as_slice())
    }

    pub fn default_value(&self, plug: PlugId) -> Option<Arc<Value>> {
        self.plugs
            .get(plug.index())
            .filter(|p| !p.is_compound())
            .map(|p| p.default_value.clone())
    }

    /// The value held by the plug itself, ignoring any input.
    pub fn static_value(&self, plug: PlugId) -> Option<Arc<Value>> {
        self.plugs
            .get(plug.index())
            .filter(|p| !p.is_compound())
            .map(|p| p.value.clone())
    }

    /// Follows input connections for as long as they lead to a plug of the
    /// same kind. Reading `plug` is equivalent to reading its source.
    pub fn source(&self, plug: PlugId) -> PlugId {
        let mut current = plug;
        while let Some(data) = self.plugs.get(current.index()) {
            match data.input {
                Some(input) if self.kind(input) == data.kind => current = input,
                _ => break,
            }
        }
        current
    }

    pub(crate) fn is_computed(&self, plug: &PlugData) -> bool {
        plug.input.is_some()
            || (plug.direction == Direction::Out && self.compute_node(plug.node).is_some())
    }

    /// True if computed values for `plug` may be cached. Every plug along
    /// the input chain must allow it.
    pub(crate) fn is_cacheable(&self, plug: PlugId) -> bool {
        let mut current = Some(plug);
        while let Some(p) = current {
            match self.plugs.get(p.index()) {
                Some(data) if data.flags.cacheable => current = data.input,
                Some(_) => return false,
                None => break,
            }
        }
        true
    }

    /// Whether `set_value()` may be called on the plug from outside any
    /// computation.
    pub fn settable(&self, plug: PlugId) -> bool {
        self.check_settable(plug).is_ok()
    }

    fn check_settable(&self, plug: PlugId) -> Result<&PlugData, EngineError> {
        let data = self.plug_data(plug)?;
        if data.is_compound() {
            return Err(EngineError::NotAValuePlug(self.full_name(plug)));
        }
        if data.flags.read_only {
            return Err(EngineError::ReadOnlyPlug(self.full_name(plug)));
        }
        if data.input.is_some() {
            return Err(EngineError::NotSettable {
                plug: self.full_name(plug),
                reason: "it has an input connection".to_string(),
            });
        }
        if data.direction == Direction::Out && self.compute_node(data.node).is_some() {
            return Err(EngineError::ResultOutsideComputation(self.full_name(plug)));
        }
        Ok(data)
    }

    // Edits

    pub fn set_value(&mut self, plug: PlugId, value: impl Into<Value>) -> Result<(), EngineError> {
        let value = value.into();
        let data = self.check_settable(plug)?;
        let Some(kind) = data.kind else {
            return Err(EngineError::NotAValuePlug(self.full_name(plug)));
        };
        let Some(value) = value.convert(kind) else {
            return Err(EngineError::TypeMismatch {
                plug: self.full_name(plug),
                expected: kind.to_string(),
                got: value.kind().to_string(),
            });
        };
        if *data.value == value {
            return Ok(());
        }
        self.plug_data_mut(plug)?.set_static_value(value);
        self.dirty_plug(plug);
        Ok(())
    }

    /// Restores default values, recursing through compound plugs.
    pub fn set_to_default(&mut self, plug: PlugId) -> Result<(), EngineError> {
        self.with_dirty_propagation_scope(|graph| {
            let data = graph.plug_data(plug)?;
            if data.is_compound() {
                for child in data.children.clone() {
                    graph.set_to_default(child)?;
                }
                Ok(())
            } else {
                let default_value = (*data.default_value).clone();
                graph.set_value(plug, default_value)
            }
        })
    }

    pub fn is_set_to_default(&self, plug: PlugId) -> bool {
        match self.plugs.get(plug.index()) {
            Some(data) if data.is_compound() => {
                data.children.iter().all(|c| self.is_set_to_default(*c))
            }
            Some(data) => data.input.is_none() && data.value == data.default_value,
            None => false,
        }
    }

    /// Whether `set_input(plug, Some(input))` would be accepted.
    pub fn accepts_input(&self, plug: PlugId, input: PlugId) -> Result<(), EngineError> {
        let data = self.plug_data(plug)?;
        let input_data = self.plug_data(input)?;
        if data.flags.read_only {
            return Err(EngineError::ReadOnlyPlug(self.full_name(plug)));
        }
        if plug == input {
            return Err(EngineError::ConnectionRejected(format!(
                "\"{}\" can't be connected to itself",
                self.full_name(plug)
            )));
        }
        match (data.kind, input_data.kind) {
            (Some(kind), Some(input_kind)) if input_kind.converts_to(kind) => {}
            (None, None) if data.children.len() == input_data.children.len() => {
                for (child, input_child) in data.children.iter().zip(&input_data.children) {
                    self.accepts_input(*child, *input_child)?;
                }
            }
            _ => {
                return Err(EngineError::ConnectionRejected(format!(
                    "\"{}\" does not accept input from \"{}\"",
                    self.full_name(plug),
                    self.full_name(input)
                )));
            }
        }
        let mut upstream = Some(input);
        while let Some(p) = upstream {
            if p == plug {
                return Err(EngineError::ConnectionRejected(format!(
                    "connecting \"{}\" to \"{}\" would create a cycle",
                    self.full_name(input),
                    self.full_name(plug)
                )));
            }
            upstream = self.input(p);
        }
        Ok(())
    }

    /// Connects `input` into `plug`, or disconnects it with `None`.
    /// Compound plugs are connected child by child. Disconnecting leaves the
    /// plug with the static value it held before it was connected.
    pub fn set_input(&mut self, plug: PlugId, input: Option<PlugId>) -> Result<(), EngineError> {
        if let Some(input) = input {
            self.accepts_input(plug, input)?;
        } else if self.plug_data(plug)?.flags.read_only {
            return Err(EngineError::ReadOnlyPlug(self.full_name(plug)));
        }

        self.with_dirty_propagation_scope(|graph| {
            let children = graph.plug_data(plug)?.children.clone();
            let input_children = match input {
                Some(i) => graph.plug_data(i)?.children.clone(),
                None => Vec::new(),
            };
            for (index, child) in children.iter().enumerate() {
                graph.set_input(*child, input_children.get(index).copied())?;
            }

            let previous = graph.plug_data(plug)?.input;
            if previous == input {
                return Ok(());
            }
            if let Some(previous) = previous {
                graph.plug_data_mut(previous)?.outputs.retain(|o| *o != plug);
            }
            if let Some(input) = input {
                graph.plug_data_mut(input)?.outputs.push(plug);
            }
            graph.plug_data_mut(plug)?.input = input;
            trace!(
                "Connected \"{}\" to \"{}\"",
                input.map_or_else(|| "nothing".to_string(), |i| graph.full_name(i)),
                graph.full_name(plug)
            );
            graph.dirty_plug(plug);
            Ok(())
        })
    }

    // Dirty propagation

    /// Runs `f` with dirty notifications deferred until the outermost scope
    /// returns. Each affected plug is then signalled once.
    ///
    /// Dirtiness itself is applied immediately, so reads made inside the
    /// scope already see the edits. A panic in `f` still closes the scope
    /// before it is resumed.
    pub fn with_dirty_propagation_scope<R>(&mut self, f: impl FnOnce(&mut Graph) -> R) -> R {
        self.dirty.begin();
        let result = panic::catch_unwind(AssertUnwindSafe(|| f(&mut *self)));
        if self.dirty.end() {
            self.flush_dirty_plugs();
        }
        match result {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    pub(crate) fn dirty_plug(&mut self, plug: PlugId) {
        self.dirty.begin();
        self.collect_dirty_plugs(plug);
        if self.dirty.end() {
            self.flush_dirty_plugs();
        }
    }

    /// Bumps the dirty generation of everything downstream of `plug` and
    /// records it for the next flush. Every call walks the full downstream
    /// set, so a second edit in the same scope invalidates hashes cached by
    /// reads made after the first.
    fn collect_dirty_plugs(&mut self, plug: PlugId) {
        let mut visited = HashSet::new();
        let mut pending = vec![(None, plug)];
        let mut affected = Vec::new();
        while let Some((upstream, plug)) = pending.pop() {
            if plug.index() >= self.plugs.len() {
                continue;
            }
            self.dirty.insert(plug);
            if let Some(upstream) = upstream {
                self.dirty.add_edge(upstream, plug);
            }
            if !visited.insert(plug) {
                continue;
            }
            self.plugs[plug.index()].dirty_generation += 1;

            let data = &self.plugs[plug.index()];
            if let Some(parent) = data.parent {
                pending.push((Some(plug), parent));
            }
            for output in &data.outputs {
                pending.push((Some(plug), *output));
            }
            if data.direction == Direction::In {
                if let Some(node) = self.compute_node(data.node) {
                    affected.clear();
                    if let Err(e) = node.affects(self, plug, &mut affected) {
                        error!("{}::affects() : {}", node.type_name(), e);
                    }
                    for output in &affected {
                        pending.push((Some(plug), *output));
                    }
                }
            }
        }
    }

    fn flush_dirty_plugs(&mut self) {
        if self.dirty.is_empty() {
            return;
        }
        let mut dirty = std::mem::take(&mut self.dirty);
        let ordered = dirty.take_ordered(|p| self.full_name(p));
        self.dirty = dirty;

        let listeners: Vec<PlugDirtiedCallback> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for plug in ordered {
            trace!("Dirtied \"{}\"", self.full_name(plug));
            for listener in &listeners {
                listener(self, plug);
            }
        }
    }

    /// Registers a callback invoked once for every plug dirtied by an edit.
    pub fn connect_plug_dirtied<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Graph, PlugId) + Send + Sync + 'static,
    {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    pub fn disconnect_plug_dirtied(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener, _)| *listener != id);
        listeners.len() != before
    }

    // Evaluation

    pub fn evaluator<'a>(&'a self, context: &'a Context) -> EvalContext<'a> {
        EvalContext::new(self, context)
    }

    pub fn hash(&self, plug: PlugId, context: &Context) -> Result<ContentHash, EngineError> {
        self.evaluator(context).hash(plug)
    }

    pub fn get_value(&self, plug: PlugId, context: &Context) -> Result<Arc<Value>, EngineError> {
        self.evaluator(context).value(plug)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
