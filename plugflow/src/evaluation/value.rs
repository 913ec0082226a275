//! Runtime values carried by plugs.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::size_of;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Attribute and option dictionaries.
pub type Attributes = BTreeMap<String, Value>;

/// Row-major 4x4 matrix. Points are row vectors, so `local * parent` yields
/// the world matrix of a child.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct M44 {
    pub m: [f64; 16],
}

impl M44 {
    pub fn identity() -> Self {
        let mut m = [0.0; 16];
        m[0] = 1.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        Self { m }
    }

    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        let mut result = Self::identity();
        result.m[12] = x;
        result.m[13] = y;
        result.m[14] = z;
        result
    }

    pub fn scale(x: f64, y: f64, z: f64) -> Self {
        let mut result = Self::identity();
        result.m[0] = x;
        result.m[5] = y;
        result.m[10] = z;
        result
    }

    pub fn translation_part(&self) -> [f64; 3] {
        [self.m[12], self.m[13], self.m[14]]
    }

    pub fn multiply(&self, other: &M44) -> M44 {
        let mut m = [0.0; 16];
        for row in 0..4 {
            for col in 0..4 {
                m[row * 4 + col] = (0..4)
                    .map(|k| self.m[row * 4 + k] * other.m[k * 4 + col])
                    .sum();
            }
        }
        M44 { m }
    }
}

impl Default for M44 {
    fn default() -> Self {
        Self::identity()
    }
}

impl PartialEq for M44 {
    fn eq(&self, other: &Self) -> bool {
        self.m
            .iter()
            .zip(other.m.iter())
            .all(|(a, b)| OrderedFloat(*a) == OrderedFloat(*b))
    }
}

impl Eq for M44 {}

impl Hash for M44 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for v in &self.m {
            OrderedFloat(*v).hash(state);
        }
    }
}

/// Axis aligned bounding box. `min > max` on any axis means empty.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct Box3 {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Box3 {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }
}

impl Default for Box3 {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Box3 {
    fn eq(&self, other: &Self) -> bool {
        (0..3).all(|i| {
            OrderedFloat(self.min[i]) == OrderedFloat(other.min[i])
                && OrderedFloat(self.max[i]) == OrderedFloat(other.max[i])
        })
    }
}

impl Eq for Box3 {}

impl Hash for Box3 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for i in 0..3 {
            OrderedFloat(self.min[i]).hash(state);
            OrderedFloat(self.max[i]).hash(state);
        }
    }
}

/// A renderable object: a type name plus arbitrary parameters.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct SceneObject {
    pub type_name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

impl SceneObject {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    String(String),
    Strings(Vec<String>),
    M44(M44),
    Box3(Box3),
    Map(BTreeMap<String, Value>),
    Object(SceneObject),
}

/// The concrete type of a value plug.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Strings,
    M44,
    Box3,
    Map,
    Object,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl ValueKind {
    /// Whether values of this kind can be converted to `to` when a plug of
    /// kind `to` is connected to a plug of this kind.
    pub fn converts_to(self, to: ValueKind) -> bool {
        use ValueKind::*;
        self == to
            || matches!(
                (self, to),
                (Int, Float) | (Float, Int) | (Bool, Int) | (Bool, Float) | (Int, Bool) | (Float, Bool)
            )
            || (to == Object && self == Null)
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Strings(_) => ValueKind::Strings,
            Value::M44(_) => ValueKind::M44,
            Value::Box3(_) => ValueKind::Box3,
            Value::Map(_) => ValueKind::Map,
            Value::Object(_) => ValueKind::Object,
        }
    }

    /// Whether this value may be stored on a plug of the given kind. Object
    /// plugs also hold `Null`, meaning "no object".
    pub fn fits(&self, kind: ValueKind) -> bool {
        self.kind() == kind || (kind == ValueKind::Object && matches!(self, Value::Null))
    }

    /// Converts for a connection between plugs of different kinds.
    pub fn convert(&self, to: ValueKind) -> Option<Value> {
        if self.fits(to) {
            return Some(self.clone());
        }
        match (self, to) {
            (Value::Int(i), ValueKind::Float) => Some(Value::Float(OrderedFloat(*i as f64))),
            (Value::Float(f), ValueKind::Int) => Some(Value::Int(f.0 as i64)),
            (Value::Bool(b), ValueKind::Int) => Some(Value::Int(*b as i64)),
            (Value::Bool(b), ValueKind::Float) => Some(Value::Float(OrderedFloat(*b as i64 as f64))),
            (Value::Int(i), ValueKind::Bool) => Some(Value::Bool(*i != 0)),
            (Value::Float(f), ValueKind::Bool) => Some(Value::Bool(f.0 != 0.0)),
            _ => None,
        }
    }

    /// Approximate heap and inline footprint, used as the cache cost.
    pub fn memory_usage(&self) -> usize {
        let inline = size_of::<Value>();
        inline
            + match self {
                Value::String(s) => s.capacity(),
                Value::Strings(v) => v
                    .iter()
                    .map(|s| size_of::<String>() + s.capacity())
                    .sum(),
                Value::Map(map) => map_usage(map),
                Value::Object(object) => object.type_name.capacity() + map_usage(&object.parameters),
                _ => 0,
            }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(f.0),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            Value::Strings(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_m44(&self) -> Option<&M44> {
        match self {
            Value::M44(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_box3(&self) -> Option<&Box3> {
        match self {
            Value::Box3(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&SceneObject> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }
}

fn map_usage(map: &BTreeMap<String, Value>) -> usize {
    map.iter()
        .map(|(k, v)| size_of::<String>() + k.capacity() + v.memory_usage())
        .sum()
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(OrderedFloat(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::Strings(value)
    }
}

impl From<M44> for Value {
    fn from(value: M44) -> Self {
        Value::M44(value)
    }
}

impl From<Box3> for Value {
    fn from(value: Box3) -> Self {
        Value::Box3(value)
    }
}

impl From<SceneObject> for Value {
    fn from(value: SceneObject) -> Self {
        Value::Object(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Map(value)
    }
}
