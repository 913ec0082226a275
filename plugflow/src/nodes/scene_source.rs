//! A scene generated from a flat description of its locations.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::EngineError;
use crate::evaluation::compute::{Computation, EvalContext};
use crate::evaluation::hash::ContentHash;
use crate::evaluation::value::{Attributes, Box3, M44, SceneObject, Value};
use crate::graph::{ComputeNode, Direction, Graph, NodeBuilder, PlugId};
use crate::scene::{ScenePlug, path_to_string, string_to_path};

const TRANSFORM_KEY: &str = "transform";
const ATTRIBUTES_KEY: &str = "attributes";
const OBJECT_KEY: &str = "object";
const BOUND_KEY: &str = "bound";

/// One location of a `SceneSource`.
#[derive(Clone, Debug, Default)]
pub struct Location {
    pub transform: M44,
    pub attributes: Attributes,
    pub object: Option<SceneObject>,
    pub bound: Option<Box3>,
}

impl Location {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transform(mut self, transform: M44) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_object(mut self, object: SceneObject) -> Self {
        self.object = Some(object);
        self
    }

    pub fn with_bound(mut self, bound: Box3) -> Self {
        self.bound = Some(bound);
        self
    }

    pub fn to_value(&self) -> Value {
        let mut entry = BTreeMap::new();
        entry.insert(TRANSFORM_KEY.to_string(), Value::M44(self.transform));
        entry.insert(ATTRIBUTES_KEY.to_string(), Value::Map(self.attributes.clone()));
        if let Some(object) = &self.object {
            entry.insert(OBJECT_KEY.to_string(), Value::Object(object.clone()));
        }
        if let Some(bound) = self.bound {
            entry.insert(BOUND_KEY.to_string(), Value::Box3(bound));
        }
        Value::Map(entry)
    }
}

/// Builds the value of a `SceneSource`'s `locations` plug.
pub fn locations_value<'a, I>(locations: I) -> Value
where
    I: IntoIterator<Item = (&'a str, Location)>,
{
    Value::Map(
        locations
            .into_iter()
            .map(|(path, location)| (path_to_string(&string_to_path(path)), location.to_value()))
            .collect(),
    )
}

/// Converts plain JSON into plug values. Arrays of strings become
/// `Strings`; other arrays and nulls become `Null`.
pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::from(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<String>>>()
            .map_or(Value::Null, Value::Strings),
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_value(v)))
                .collect(),
        ),
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct LocationDescription {
    translate: [f64; 3],
    scale: Option<[f64; 3]>,
    attributes: BTreeMap<String, serde_json::Value>,
    object: Option<String>,
    bound: Option<Box3>,
}

/// A scene as read from JSON:
///
/// ```json
/// {
///   "globals": { "option:render:camera": "/cam" },
///   "locations": {
///     "/group/sphere": { "translate": [0, 1, 0], "object": "mesh" }
///   }
/// }
/// ```
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct SceneDescription {
    globals: BTreeMap<String, serde_json::Value>,
    locations: BTreeMap<String, LocationDescription>,
}

impl SceneDescription {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn globals_value(&self) -> Value {
        Value::Map(
            self.globals
                .iter()
                .map(|(k, v)| (k.clone(), json_to_value(v)))
                .collect(),
        )
    }

    pub fn locations_value(&self) -> Value {
        locations_value(self.locations.iter().map(|(path, description)| {
            let [x, y, z] = description.translate;
            let mut transform = M44::translation(x, y, z);
            if let Some([sx, sy, sz]) = description.scale {
                transform = M44::scale(sx, sy, sz).multiply(&transform);
            }
            let location = Location {
                transform,
                attributes: description
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), json_to_value(v)))
                    .collect(),
                object: description.object.as_deref().map(SceneObject::new),
                bound: description.bound,
            };
            (path.as_str(), location)
        }))
    }
}

/// Generates a scene from its `locations` input, a map from location path
/// to that location's description. Locations implied by a deeper path exist
/// with default values.
#[derive(Clone, Copy)]
pub struct SceneSource {
    pub locations: PlugId,
    pub globals: PlugId,
    pub out: ScenePlug,
}

impl SceneSource {
    pub fn build(builder: &mut NodeBuilder<'_>) -> Self {
        Self {
            locations: builder.add_input("locations", Value::Map(BTreeMap::new())),
            globals: builder.add_input("globals", Value::Map(BTreeMap::new())),
            out: ScenePlug::add_to(builder, "out", Direction::Out),
        }
    }

    /// Sets both inputs from a parsed description.
    pub fn load(&self, graph: &mut Graph, description: &SceneDescription) -> Result<(), EngineError> {
        graph.with_dirty_propagation_scope(|graph| {
            graph.set_value(self.locations, description.locations_value())?;
            graph.set_value(self.globals, description.globals_value())
        })
    }

    fn child_names(locations: &Value, path: &[String]) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let Some(locations) = locations.as_map() else {
            return names;
        };
        for key in locations.keys() {
            let location = string_to_path(key);
            if location.len() > path.len() && location.starts_with(path) {
                let name = &location[path.len()];
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    fn entry<'v>(locations: &'v Value, path: &[String]) -> Option<&'v Value> {
        locations.as_map()?.get(&path_to_string(path))
    }

    fn entry_field<'v>(locations: &'v Value, path: &[String], key: &str) -> Option<&'v Value> {
        Self::entry(locations, path)?.as_map()?.get(key)
    }

    /// The key within a location's entry that `output` is read from.
    fn field_key(&self, output: PlugId) -> Option<&'static str> {
        if output == self.out.transform {
            Some(TRANSFORM_KEY)
        } else if output == self.out.attributes {
            Some(ATTRIBUTES_KEY)
        } else if output == self.out.object {
            Some(OBJECT_KEY)
        } else if output == self.out.bound {
            Some(BOUND_KEY)
        } else {
            None
        }
    }

    fn scene_path<'c>(ctx: &EvalContext<'c>) -> &'c [String] {
        ctx.context().scene_path().unwrap_or(&[])
    }
}

impl ComputeNode for SceneSource {
    fn type_name(&self) -> &'static str {
        "SceneSource"
    }

    fn affects(&self, _graph: &Graph, input: PlugId, outputs: &mut Vec<PlugId>) -> Result<(), EngineError> {
        if input == self.locations {
            outputs.extend(self.out.location_plugs());
        } else if input == self.globals {
            outputs.push(self.out.globals);
        }
        Ok(())
    }

    fn hash(&self, output: PlugId, ctx: &EvalContext<'_>, h: &mut ContentHash) -> Result<(), EngineError> {
        h.append(self.type_name()).append(&output);
        if output == self.out.globals {
            h.append_hash(&ctx.hash(self.globals)?);
            return Ok(());
        }

        let path = Self::scene_path(ctx);
        let locations = ctx.value(self.locations)?;
        match self.field_key(output) {
            Some(key) => h.append(&Self::entry_field(&locations, path, key)),
            None => h.append(&Self::child_names(&locations, path)),
        };
        Ok(())
    }

    fn compute(&self, output: PlugId, computation: &mut Computation<'_>) -> Result<(), EngineError> {
        if output == self.out.globals {
            let globals = computation.value(self.globals)?;
            return computation.set_value(output, (*globals).clone());
        }

        let path = Self::scene_path(&computation.context());
        let locations = computation.value(self.locations)?;
        let field = |key: &str| Self::entry_field(&locations, path, key).cloned();

        let value = if output == self.out.child_names {
            Value::Strings(Self::child_names(&locations, path))
        } else if output == self.out.transform {
            field(TRANSFORM_KEY).unwrap_or(Value::M44(M44::identity()))
        } else if output == self.out.attributes {
            field(ATTRIBUTES_KEY).unwrap_or_else(|| Value::Map(Attributes::new()))
        } else if output == self.out.object {
            field(OBJECT_KEY).unwrap_or(Value::Null)
        } else if output == self.out.bound {
            field(BOUND_KEY).unwrap_or(Value::Box3(Box3::new([-0.5; 3], [0.5; 3])))
        } else {
            return Err(EngineError::compute(format!(
                "SceneSource : unexpected output \"{}\"",
                computation.context().graph().full_name(output)
            )));
        };
        computation.set_value(output, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::context::Context;

    fn source(graph: &mut Graph) -> (PlugId, ScenePlug) {
        let id = graph.add_node("SceneSource", SceneSource::build);
        let node = graph.node_as::<SceneSource>(id).unwrap();
        (node.locations, node.out)
    }

    #[test]
    fn implied_locations_have_children() {
        let mut graph = Graph::new();
        let (locations, out) = source(&mut graph);
        graph
            .set_value(
                locations,
                locations_value([
                    ("/a/b", Location::new()),
                    ("/a/c", Location::new()),
                    ("/d", Location::new()),
                ]),
            )
            .unwrap();

        let root = Context::new().with_scene_path(&[]);
        let a = Context::new().with_scene_path(&string_to_path("/a"));
        assert_eq!(
            *graph.get_value(out.child_names, &root).unwrap(),
            Value::from(vec!["a".to_string(), "d".to_string()])
        );
        assert_eq!(
            *graph.get_value(out.child_names, &a).unwrap(),
            Value::from(vec!["b".to_string(), "c".to_string()])
        );
        assert_eq!(*graph.get_value(out.object, &a).unwrap(), Value::Null);
    }

    #[test]
    fn location_hashes_are_independent() {
        let mut graph = Graph::new();
        let (locations, out) = source(&mut graph);
        let sphere = SceneObject::new("sphere");
        graph
            .set_value(
                locations,
                locations_value([
                    ("/a", Location::new().with_object(sphere.clone())),
                    ("/b", Location::new()),
                ]),
            )
            .unwrap();
        let a = Context::new().with_scene_path(&string_to_path("/a"));
        let b = Context::new().with_scene_path(&string_to_path("/b"));
        let a_hash = graph.hash(out.object, &a).unwrap();
        let b_hash = graph.hash(out.object, &b).unwrap();

        graph
            .set_value(
                locations,
                locations_value([
                    ("/a", Location::new().with_object(sphere.clone()).with_attribute("color", "red")),
                    ("/b", Location::new().with_object(sphere)),
                ]),
            )
            .unwrap();
        assert_eq!(graph.hash(out.object, &a).unwrap(), a_hash);
        assert_ne!(graph.hash(out.object, &b).unwrap(), b_hash);
    }

    #[test]
    fn description_from_json() {
        let description = SceneDescription::from_json(
            r#"{
                "globals": { "option:samples": 4 },
                "locations": { "/a": { "translate": [1, 2, 3], "object": "mesh", "attributes": { "visible": true } } }
            }"#,
        )
        .unwrap();
        let globals = description.globals_value();
        assert_eq!(globals.as_map().unwrap()["option:samples"], Value::Int(4));

        let locations = description.locations_value();
        let entry = locations.as_map().unwrap()["/a"].as_map().unwrap().clone();
        assert_eq!(entry[TRANSFORM_KEY].as_m44().unwrap().translation_part(), [1.0, 2.0, 3.0]);
        assert_eq!(entry[OBJECT_KEY], Value::Object(SceneObject::new("mesh")));
    }
}
