//! The renderer-facing mirror of a scene, updated incrementally.
//!
//! Each `SceneGraph` owns its children, and a location's update only ever
//! reads its parent's state. Children are updated in parallel once their
//! parent's own update has finished, so every child sees its parent's final
//! attributes and transform for the pass.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::error::EngineError;
use crate::evaluation::compute::EvalContext;
use crate::evaluation::hash::ContentHash;
use crate::evaluation::value::{Attributes, Box3, M44, SceneObject, Value};
use crate::scene::{
    DrawMode, IdMap, MatchResult, PathMatcher, ScenePlug, VisibleSet, path_to_string,
};
use crate::task::TaskStatus;

use super::renderer::{AttributesInterface, ObjectInterface, Renderer};

pub type ProgressCallback = Arc<dyn Fn(TaskStatus) + Send + Sync>;

pub const VISIBLE_ATTRIBUTE: &str = "scene:visible";
pub const PLACEHOLDER_TYPE: &str = "Placeholder";
const UNEXPANDED_CHILDREN: &str = "__unexpandedChildren__";

/// Per location components tracked by the dirty and changed masks.
pub mod component {
    pub const NONE: u8 = 0;
    pub const BOUND: u8 = 1;
    pub const TRANSFORM: u8 = 2;
    pub const ATTRIBUTES: u8 = 4;
    pub const OBJECT: u8 = 8;
    pub const CHILD_NAMES: u8 = 16;
    pub const VISIBLE_SET: u8 = 32;
    pub const ALL: u8 = 63;
}

/// Global components that changed since the last complete pass.
pub mod global_component {
    pub const NONE: u8 = 0;
    pub const GLOBALS: u8 = 1;
}

/// Everything a pass needs that is shared by all locations.
pub(crate) struct UpdatePass<'a> {
    pub(crate) eval: EvalContext<'a>,
    pub(crate) scene: ScenePlug,
    pub(crate) renderer: &'a dyn Renderer,
    pub(crate) default_attributes: &'a Arc<dyn AttributesInterface>,
    pub(crate) root_attributes: &'a Attributes,
    pub(crate) changed_globals: u8,
    pub(crate) visible_set: &'a VisibleSet,
    pub(crate) minimum_expansion_depth: usize,
    pub(crate) id_map: &'a IdMap,
    pub(crate) paths_to_update: Option<&'a PathMatcher>,
    pub(crate) callback: Option<&'a ProgressCallback>,
    pub(crate) failed_attribute_edits: AtomicUsize,
}

fn visible(attributes: &Attributes) -> bool {
    attributes
        .get(VISIBLE_ATTRIBUTE)
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

fn bound_name(path: &[String]) -> String {
    if path.is_empty() {
        format!("/{}", UNEXPANDED_CHILDREN)
    } else {
        format!("{}/{}", path_to_string(path), UNEXPANDED_CHILDREN)
    }
}

pub(crate) struct LocationState {
    object_hash: ContentHash,
    object: Option<Box<dyn ObjectInterface>>,

    attributes_hash: ContentHash,
    full_attributes: Arc<Attributes>,
    attributes_interface: Option<Arc<dyn AttributesInterface>>,

    transform_hash: ContentHash,
    full_transform: M44,

    child_names_hash: ContentHash,

    bound_interface: Option<Box<dyn ObjectInterface>>,
    descendants_visible: bool,
    draw_mode: DrawMode,

    dirty: u8,
    /// What changed in the last update of this location. Kept until every
    /// child has been updated, so children can inherit the changes and an
    /// interrupted pass resumes correctly.
    changed: u8,
    cleared: bool,
}

impl LocationState {
    fn new() -> Self {
        let mut state = Self {
            object_hash: ContentHash::new(),
            object: None,
            attributes_hash: ContentHash::new(),
            full_attributes: Arc::new(Attributes::new()),
            attributes_interface: None,
            transform_hash: ContentHash::new(),
            full_transform: M44::identity(),
            child_names_hash: ContentHash::new(),
            bound_interface: None,
            descendants_visible: false,
            draw_mode: DrawMode::None,
            dirty: component::ALL,
            changed: component::NONE,
            cleared: true,
        };
        state.clear();
        state
    }

    fn clear(&mut self) {
        self.clear_object();
        self.attributes_hash = ContentHash::new();
        self.transform_hash = ContentHash::new();
        self.child_names_hash = ContentHash::new();
        self.cleared = true;
        self.descendants_visible = false;
        self.draw_mode = DrawMode::None;
        self.bound_interface = None;
        self.dirty = component::ALL;
    }

    fn clear_object(&mut self) {
        self.object = None;
        self.object_hash = ContentHash::new();
    }

    fn clean(&mut self, components: u8) {
        self.dirty &= !components;
    }

    fn attributes_interface(&mut self, renderer: &dyn Renderer) -> Arc<dyn AttributesInterface> {
        self.attributes_interface
            .get_or_insert_with(|| renderer.attributes(&self.full_attributes))
            .clone()
    }

    fn update_root_attributes(&mut self, root_attributes: &Attributes) -> bool {
        if *self.full_attributes == *root_attributes {
            return false;
        }
        self.full_attributes = Arc::new(root_attributes.clone());
        self.attributes_interface = None;
        true
    }

    fn update_attributes(
        &mut self,
        eval: &EvalContext<'_>,
        pass: &UpdatePass<'_>,
        parent: &LocationState,
        parent_changed: bool,
    ) -> Result<bool, EngineError> {
        let plug = pass.scene.attributes;
        let hash = eval.hash(plug)?;
        if hash == self.attributes_hash && !parent_changed {
            return Ok(false);
        }

        let attributes = eval.value_with_hash(plug, hash)?;
        let mut full = (*parent.full_attributes).clone();
        if let Some(local) = attributes.as_map() {
            full.extend(local.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        self.full_attributes = Arc::new(full);
        self.attributes_interface = None;
        self.attributes_hash = hash;
        Ok(true)
    }

    fn update_transform(
        &mut self,
        eval: &EvalContext<'_>,
        pass: &UpdatePass<'_>,
        parent: Option<&LocationState>,
        parent_changed: bool,
    ) -> Result<bool, EngineError> {
        if parent_changed {
            // The local transform isn't stored; rehash to recompute it.
            self.transform_hash = ContentHash::new();
        }
        let plug = pass.scene.transform;
        let hash = eval.hash(plug)?;
        if hash == self.transform_hash {
            return Ok(false);
        }

        let value = eval.value_with_hash(plug, hash)?;
        let local = value.as_m44().copied().unwrap_or_default();
        self.transform_hash = hash;
        self.full_transform = match parent {
            Some(parent) => local.multiply(&parent.full_transform),
            None => local,
        };
        Ok(true)
    }

    fn update_visible_set(&mut self, path: &[String], pass: &UpdatePass<'_>) -> bool {
        let visibility = pass
            .visible_set
            .visibility(path, pass.minimum_expansion_depth);
        if visibility.descendants_visible == self.descendants_visible
            && visibility.draw_mode == self.draw_mode
        {
            return false;
        }
        self.descendants_visible = visibility.descendants_visible;
        self.draw_mode = visibility.draw_mode;
        true
    }

    fn update_object(
        &mut self,
        eval: &EvalContext<'_>,
        name: &str,
        pass: &UpdatePass<'_>,
    ) -> Result<bool, EngineError> {
        let had_object = self.object.is_some();
        if self.draw_mode != DrawMode::Visible {
            self.clear_object();
            return Ok(had_object);
        }

        let plug = pass.scene.object;
        let hash = eval.hash(plug)?;
        if hash == self.object_hash {
            return Ok(false);
        }
        let value = eval.value_with_hash(plug, hash)?;
        self.object_hash = hash;

        // Names must be unique in the renderer, so the old object goes first.
        self.object = None;
        let Some(object) = value.as_object() else {
            return Ok(had_object);
        };
        let attributes = self.attributes_interface(pass.renderer);
        self.object = pass.renderer.object(name, object, &attributes);
        Ok(true)
    }
}

pub struct SceneGraph {
    name: String,
    state: LocationState,
    children: Vec<SceneGraph>,
}

impl SceneGraph {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: LocationState::new(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &[SceneGraph] {
        &self.children
    }

    pub fn expanded(&self) -> bool {
        self.state.descendants_visible
    }

    /// True until the location has been fully updated since it was last
    /// cleared.
    pub fn cleared(&self) -> bool {
        self.state.cleared
    }

    pub fn has_object(&self) -> bool {
        self.state.object.is_some()
    }

    pub fn full_transform(&self) -> M44 {
        self.state.full_transform
    }

    pub fn full_attributes(&self) -> &Attributes {
        &self.state.full_attributes
    }

    /// Marks components as needing an update here and below.
    pub(crate) fn dirty(&mut self, components: u8) {
        if components & self.state.dirty == components {
            return;
        }
        self.state.dirty |= components;
        for child in &mut self.children {
            child.dirty(components);
        }
    }

    /// Releases everything held for this location and below, without
    /// removing the location from its parent.
    pub(crate) fn clear(&mut self) {
        self.children.clear();
        self.state.clear();
    }

    /// Updates this location and, if it is expanded, its children. Returns
    /// early with an error if the pass is cancelled or a computation fails;
    /// the masks are left such that a later pass resumes the work.
    pub(crate) fn update_task(
        &mut self,
        parent: Option<&LocationState>,
        path: &[String],
        pass: &UpdatePass<'_>,
    ) -> Result<(), EngineError> {
        let paths_match = match pass.paths_to_update {
            Some(paths) => paths.match_path(path),
            None => MatchResult::EVERY,
        };
        if paths_match.is_none() {
            return Ok(());
        }

        pass.eval.check_cancellation()?;
        if self.update(parent, path, pass)? {
            if let Some(callback) = pass.callback {
                callback(TaskStatus::Running);
            }
        }

        let SceneGraph { state, children, .. } = self;
        if state.descendants_visible && !children.is_empty() {
            let parent_state = &*state;
            children.par_iter_mut().try_for_each(|child| {
                let mut child_path = path.to_vec();
                child_path.push(child.name.clone());
                child.update_task(Some(parent_state), &child_path, pass)
            })?;
        } else {
            for child in children.iter_mut() {
                child.clear();
            }
        }

        if paths_match.intersects(MatchResult::ANCESTOR | MatchResult::EXACT) {
            state.changed = component::NONE;
        }
        Ok(())
    }

    /// Updates this location only. Returns true if anything changed.
    fn update(
        &mut self,
        parent: Option<&LocationState>,
        path: &[String],
        pass: &UpdatePass<'_>,
    ) -> Result<bool, EngineError> {
        let context = pass.eval.context().with_scene_path(path);
        let eval = pass.eval.with_context(&context);
        let name = path_to_string(path);
        let original_changed = self.state.changed;

        // Attributes
        match parent {
            None => {
                if pass.changed_globals & global_component::GLOBALS != 0
                    && self.state.update_root_attributes(pass.root_attributes)
                {
                    self.state.changed |= component::ATTRIBUTES;
                }
            }
            Some(parent) => {
                let parent_changed = parent.changed & component::ATTRIBUTES != 0;
                if (parent_changed || self.state.dirty & component::ATTRIBUTES != 0)
                    && self.state.update_attributes(&eval, pass, parent, parent_changed)?
                {
                    self.state.changed |= component::ATTRIBUTES;
                }
            }
        }

        if !visible(&self.state.full_attributes) {
            self.clear();
            return Ok(original_changed != self.state.changed);
        }
        self.state.clean(component::ATTRIBUTES);

        // Transform
        let parent_transform_changed =
            parent.is_some_and(|p| p.changed & component::TRANSFORM != 0);
        if (self.state.dirty & component::TRANSFORM != 0 || parent_transform_changed)
            && self
                .state
                .update_transform(&eval, pass, parent, parent_transform_changed)?
        {
            self.state.changed |= component::TRANSFORM;
        }
        self.state.clean(component::TRANSFORM);

        // Visible set
        let previous_draw_mode = self.state.draw_mode;
        if self.state.dirty & component::VISIBLE_SET != 0 && self.state.update_visible_set(path, pass) {
            self.state.changed |= component::VISIBLE_SET;
            if previous_draw_mode != self.state.draw_mode {
                self.state.dirty |= component::OBJECT;
            }
        }

        // Object
        let state = &mut self.state;
        if state.dirty & component::OBJECT != 0 && state.update_object(&eval, &name, pass)? {
            state.changed |= component::OBJECT;
        }

        if state.object.is_some()
            && state.changed & component::OBJECT == 0
            && state.changed & component::ATTRIBUTES != 0
        {
            let attributes = state.attributes_interface(pass.renderer);
            let applied = state
                .object
                .as_mut()
                .is_some_and(|object| object.attributes(&attributes));
            if !applied {
                state.object_hash = ContentHash::new();
                if state.update_object(&eval, &name, pass)? {
                    state.changed |= component::OBJECT;
                    pass.failed_attribute_edits.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if let Some(object) = state.object.as_mut() {
            if state.changed & (component::OBJECT | component::TRANSFORM) != 0 {
                object.transform(&state.full_transform);
            }
            if state.changed & component::OBJECT != 0 {
                object.assign_id(pass.id_map.id_for_path(path, true));
            }
        }
        state.clean(component::OBJECT);

        // Children
        if self.state.dirty & component::CHILD_NAMES != 0 && self.update_children(&eval, path, pass)? {
            self.state.changed |= component::CHILD_NAMES;
        }
        self.state.clean(component::CHILD_NAMES);

        // Bound placeholder for unexpanded children
        let state = &mut self.state;
        let mut new_bound = false;
        if state.changed & (component::VISIBLE_SET | component::CHILD_NAMES) != 0
            || state.dirty & component::BOUND != 0
        {
            let bound = if state.draw_mode == DrawMode::Visible
                && !state.descendants_visible
                && !self.children.is_empty()
            {
                eval.value(pass.scene.bound)?
                    .as_box3()
                    .copied()
                    .unwrap_or_else(Box3::empty)
            } else {
                Box3::empty()
            };

            state.bound_interface = None;
            if !bound.is_empty() {
                let placeholder = SceneObject::new(PLACEHOLDER_TYPE).with_parameter("bound", bound);
                state.bound_interface =
                    pass.renderer
                        .object(&bound_name(path), &placeholder, pass.default_attributes);
                new_bound = state.bound_interface.is_some();
            }
        }

        if let Some(bound) = state.bound_interface.as_mut() {
            if new_bound || state.changed & component::TRANSFORM != 0 {
                bound.transform(&state.full_transform);
            }
        }
        state.clean(component::VISIBLE_SET | component::BOUND);
        state.cleared = false;

        Ok(original_changed != state.changed)
    }

    /// Makes `children` match the child names at this location, reusing
    /// existing children by name.
    fn update_children(
        &mut self,
        eval: &EvalContext<'_>,
        path: &[String],
        pass: &UpdatePass<'_>,
    ) -> Result<bool, EngineError> {
        let plug = pass.scene.child_names;
        let hash = eval.hash(plug)?;
        if hash == self.state.child_names_hash {
            return Ok(false);
        }
        let value = eval.value_with_hash(plug, hash)?;
        let names = value.as_strings().unwrap_or(&[]);

        let mut seen = HashSet::with_capacity(names.len());
        if let Some(duplicate) = names.iter().find(|name| !seen.insert(name.as_str())) {
            let mut child_path = path.to_vec();
            child_path.push(duplicate.clone());
            return Err(EngineError::render(format!(
                "RenderController::update_children() failed. Duplicate children with name: {}",
                path_to_string(&child_path)
            )));
        }

        let mut previous = std::mem::take(&mut self.children);
        previous.sort_by(|a, b| a.name.cmp(&b.name));
        let previous_names: Vec<String> = previous.iter().map(|c| c.name.clone()).collect();
        let mut previous: Vec<Option<SceneGraph>> = previous.into_iter().map(Some).collect();

        self.children = names
            .iter()
            .map(|name| {
                previous_names
                    .binary_search(name)
                    .ok()
                    .and_then(|index| previous[index].take())
                    .unwrap_or_else(|| SceneGraph::new(name))
            })
            .collect();
        self.state.child_names_hash = hash;
        Ok(true)
    }
}
