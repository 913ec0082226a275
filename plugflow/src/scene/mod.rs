//! Scene description plugs and the path based helpers used to traverse them.

pub mod id_map;
pub mod path_matcher;
pub mod visible_set;

use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::evaluation::value::{Box3, M44, Value};
use crate::graph::{Direction, Graph, NodeBuilder, PlugId};

pub use id_map::IdMap;
pub use path_matcher::{MatchResult, PathMatcher};
pub use visible_set::{DrawMode, VisibleSet, Visibility};

/// Location in a scene hierarchy; the root is the empty path.
pub type ScenePath = Vec<String>;

pub fn path_to_string(path: &[String]) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.iter().fold(String::new(), |mut s, name| {
        s.push('/');
        s.push_str(name);
        s
    })
}

pub fn string_to_path(path: &str) -> ScenePath {
    path.split('/')
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

pub const BOUND: &str = "bound";
pub const TRANSFORM: &str = "transform";
pub const ATTRIBUTES: &str = "attributes";
pub const OBJECT: &str = "object";
pub const CHILD_NAMES: &str = "childNames";
pub const GLOBALS: &str = "globals";

/// The compound plug describing a scene. Every child except `globals` is
/// evaluated per location, with the location given by the `scene:path`
/// context variable.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ScenePlug {
    pub root: PlugId,
    pub bound: PlugId,
    pub transform: PlugId,
    pub attributes: PlugId,
    pub object: PlugId,
    pub child_names: PlugId,
    pub globals: PlugId,
}

impl ScenePlug {
    pub fn add_to(builder: &mut NodeBuilder<'_>, name: &str, direction: Direction) -> Self {
        let root = builder.add_compound(None, name, direction);
        Self {
            root,
            bound: builder.add_child(root, BOUND, Box3::empty()),
            transform: builder.add_child(root, TRANSFORM, M44::identity()),
            attributes: builder.add_child(root, ATTRIBUTES, BTreeMap::<String, Value>::new()),
            object: builder.add_child(root, OBJECT, Value::Null),
            child_names: builder.add_child(root, CHILD_NAMES, Vec::<String>::new()),
            globals: builder.add_child(root, GLOBALS, BTreeMap::<String, Value>::new()),
        }
    }

    /// Recovers the bundle from an existing compound plug.
    pub fn from_plug(graph: &Graph, root: PlugId) -> Result<Self, EngineError> {
        let child = |name: &str| {
            graph
                .children(root)
                .iter()
                .copied()
                .find(|c| graph.plug_name(*c) == name)
                .ok_or_else(|| EngineError::UnknownPlug(format!("{}.{}", graph.full_name(root), name)))
        };
        Ok(Self {
            root,
            bound: child(BOUND)?,
            transform: child(TRANSFORM)?,
            attributes: child(ATTRIBUTES)?,
            object: child(OBJECT)?,
            child_names: child(CHILD_NAMES)?,
            globals: child(GLOBALS)?,
        })
    }

    /// The per location children, in `[bound, transform, attributes, object,
    /// childNames]` order.
    pub fn location_plugs(&self) -> [PlugId; 5] {
        [self.bound, self.transform, self.attributes, self.object, self.child_names]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_strings() {
        assert_eq!(path_to_string(&[]), "/");
        assert_eq!(path_to_string(&string_to_path("/a/b")), "/a/b");
        assert_eq!(string_to_path("/"), ScenePath::new());
        assert_eq!(string_to_path("a//b/"), vec!["a".to_string(), "b".to_string()]);
    }
}
