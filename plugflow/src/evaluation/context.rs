use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::hash::ContentHash;
use super::value::Value;

pub const FRAME: &str = "frame";
pub const SCENE_PATH: &str = "scene:path";
const UI_PREFIX: &str = "ui:";

/// Variables parameterising an evaluation. Immutable once built; derive
/// modified copies with `with()`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(from = "BTreeMap<String, Value>", into = "BTreeMap<String, Value>")]
pub struct Context {
    variables: BTreeMap<String, Value>,
    hash: ContentHash,
}

impl Context {
    pub fn new() -> Self {
        Self::from_variables(BTreeMap::new())
    }

    pub fn from_variables(variables: BTreeMap<String, Value>) -> Self {
        let hash = Self::hash_variables(&variables);
        Self { variables, hash }
    }

    /// Variables whose names start with `ui:` never take part in the hash, so
    /// they cannot invalidate cached values.
    fn hash_variables(variables: &BTreeMap<String, Value>) -> ContentHash {
        let mut h = ContentHash::new();
        h.append("Context");
        for (name, value) in variables {
            if name.starts_with(UI_PREFIX) {
                continue;
            }
            h.append(name).append(value);
        }
        h
    }

    pub fn with(&self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut variables = self.variables.clone();
        variables.insert(name.into(), value.into());
        Self::from_variables(variables)
    }

    pub fn without(&self, name: &str) -> Self {
        let mut variables = self.variables.clone();
        variables.remove(name);
        Self::from_variables(variables)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    pub fn frame(&self) -> f64 {
        self.get(FRAME).and_then(Value::as_float).unwrap_or(1.0)
    }

    pub fn with_frame(&self, frame: f64) -> Self {
        self.with(FRAME, frame)
    }

    pub fn scene_path(&self) -> Option<&[String]> {
        self.get(SCENE_PATH).and_then(Value::as_strings)
    }

    pub fn with_scene_path(&self, path: &[String]) -> Self {
        self.with(SCENE_PATH, Value::Strings(path.to_vec()))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl From<BTreeMap<String, Value>> for Context {
    fn from(variables: BTreeMap<String, Value>) -> Self {
        Self::from_variables(variables)
    }
}

impl From<Context> for BTreeMap<String, Value> {
    fn from(context: Context) -> Self {
        context.variables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_variables_hash_equal() {
        let a = Context::new().with_frame(10.0).with("name", "x");
        let b = Context::new().with("name", "x").with_frame(10.0);
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), a.with_frame(11.0).hash());
    }

    #[test]
    fn ui_variables_do_not_affect_hash() {
        let a = Context::new().with_frame(2.0);
        let b = a.with("ui:selection", "sphere");
        assert_eq!(a.hash(), b.hash());
        assert_eq!(b.get("ui:selection"), Some(&Value::from("sphere")));
    }

    #[test]
    fn frame_defaults_to_one() {
        assert_eq!(Context::new().frame(), 1.0);
        assert!(Context::new().scene_path().is_none());
    }
}
