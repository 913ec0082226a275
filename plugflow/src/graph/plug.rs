use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::evaluation::hash::ContentHash;
use crate::evaluation::value::{Value, ValueKind};

use super::node::NodeId;

/// Stable index of a plug within its graph.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct PlugId(pub(crate) u32);

impl PlugId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PlugId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plug#{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Direction {
    In,
    Out,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct PlugFlags {
    /// Values computed for this plug may be stored in the value cache.
    pub cacheable: bool,
    /// The plug's value and input can't be changed from outside.
    pub read_only: bool,
}

impl PlugFlags {
    pub const DEFAULT: PlugFlags = PlugFlags {
        cacheable: true,
        read_only: false,
    };

    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

impl Default for PlugFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

pub(crate) struct PlugData {
    pub(crate) name: String,
    pub(crate) node: NodeId,
    pub(crate) parent: Option<PlugId>,
    pub(crate) children: Vec<PlugId>,
    pub(crate) direction: Direction,
    /// `None` for compound plugs, which only group children.
    pub(crate) kind: Option<ValueKind>,
    pub(crate) flags: PlugFlags,
    pub(crate) default_value: Arc<Value>,
    pub(crate) value: Arc<Value>,
    pub(crate) static_hash: ContentHash,
    pub(crate) input: Option<PlugId>,
    pub(crate) outputs: Vec<PlugId>,
    pub(crate) dirty_generation: u64,
}

impl PlugData {
    pub(crate) fn new(
        name: String,
        node: NodeId,
        parent: Option<PlugId>,
        direction: Direction,
        default_value: Option<Value>,
        flags: PlugFlags,
    ) -> Self {
        let kind = default_value.as_ref().map(plug_kind_for);
        let default_value = Arc::new(default_value.unwrap_or_default());
        Self {
            name,
            node,
            parent,
            children: Vec::new(),
            direction,
            kind,
            flags,
            static_hash: static_hash(&default_value),
            value: default_value.clone(),
            default_value,
            input: None,
            outputs: Vec::new(),
            dirty_generation: 0,
        }
    }

    pub(crate) fn is_compound(&self) -> bool {
        self.kind.is_none()
    }

    pub(crate) fn set_static_value(&mut self, value: Value) {
        self.static_hash = static_hash(&value);
        self.value = Arc::new(value);
    }
}

/// A plug declared with a `Null` default holds objects.
fn plug_kind_for(default_value: &Value) -> ValueKind {
    match default_value.kind() {
        ValueKind::Null => ValueKind::Object,
        kind => kind,
    }
}

pub(crate) fn static_hash(value: &Value) -> ContentHash {
    let mut h = ContentHash::new();
    h.append("static").append(value);
    h
}
