//! An in-memory backend that records what it is asked to render.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::error;

use crate::evaluation::value::{Attributes, M44, SceneObject, Value};

use super::renderer::{AttributesInterface, ObjectInterface, Renderer};

pub const CAPTURING_RENDERER_NAME: &str = "Capturing";

pub struct CapturedAttributes {
    attributes: Attributes,
}

impl CapturedAttributes {
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

impl AttributesInterface for CapturedAttributes {}

fn captured_attributes(attributes: &Arc<dyn AttributesInterface>) -> Attributes {
    (**attributes)
        .as_any()
        .downcast_ref::<CapturedAttributes>()
        .map(|a| a.attributes.clone())
        .unwrap_or_default()
}

struct CapturedState {
    attributes: Attributes,
    transform: M44,
    id: u32,
    attribute_edits: usize,
    transform_edits: usize,
}

/// An object as the renderer currently holds it.
pub struct CapturedObject {
    name: String,
    object: SceneObject,
    serial: u64,
    state: Mutex<CapturedState>,
}

impl CapturedObject {
    fn state(&self) -> MutexGuard<'_, CapturedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object(&self) -> &SceneObject {
        &self.object
    }

    /// Distinct for every object ever created by the renderer.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn attributes(&self) -> Attributes {
        self.state().attributes.clone()
    }

    pub fn transform(&self) -> M44 {
        self.state().transform
    }

    pub fn id(&self) -> u32 {
        self.state().id
    }

    pub fn attribute_edits(&self) -> usize {
        self.state().attribute_edits
    }

    pub fn transform_edits(&self) -> usize {
        self.state().transform_edits
    }
}

#[derive(Default)]
struct CapturingState {
    objects: Mutex<HashMap<String, Arc<CapturedObject>>>,
    options: Mutex<BTreeMap<String, Value>>,
    creations: Mutex<HashMap<String, usize>>,
    next_serial: AtomicU64,
    attribute_edits_unsupported: AtomicBool,
    attributes_created: AtomicUsize,
}

impl CapturingState {
    fn objects(&self) -> MutexGuard<'_, HashMap<String, Arc<CapturedObject>>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct CapturedHandle {
    object: Arc<CapturedObject>,
    renderer: Arc<CapturingState>,
}

impl ObjectInterface for CapturedHandle {
    fn transform(&mut self, transform: &M44) {
        let mut state = self.object.state();
        state.transform = *transform;
        state.transform_edits += 1;
    }

    fn attributes(&mut self, attributes: &Arc<dyn AttributesInterface>) -> bool {
        if self.renderer.attribute_edits_unsupported.load(Ordering::Relaxed) {
            return false;
        }
        let mut state = self.object.state();
        state.attributes = captured_attributes(attributes);
        state.attribute_edits += 1;
        true
    }

    fn assign_id(&mut self, id: u32) {
        self.object.state().id = id;
    }
}

impl Drop for CapturedHandle {
    fn drop(&mut self) {
        let mut objects = self.renderer.objects();
        if objects
            .get(&self.object.name)
            .is_some_and(|o| Arc::ptr_eq(o, &self.object))
        {
            objects.remove(&self.object.name);
        }
    }
}

/// Records objects, options and edits so tests and tools can inspect what a
/// `RenderController` produced.
#[derive(Clone, Default)]
pub struct CapturingRenderer {
    state: Arc<CapturingState>,
}

impl CapturingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// When false, in-place attribute edits are refused and objects must be
    /// recreated.
    pub fn set_attribute_edits_supported(&self, supported: bool) {
        self.state
            .attribute_edits_unsupported
            .store(!supported, Ordering::Relaxed);
    }

    pub fn captured_object(&self, name: &str) -> Option<Arc<CapturedObject>> {
        self.state.objects().get(name).cloned()
    }

    pub fn captured_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.objects().keys().cloned().collect();
        names.sort();
        names
    }

    /// How many times an object called `name` has been created.
    pub fn creation_count(&self, name: &str) -> usize {
        self.state
            .creations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_creations(&self) -> usize {
        self.state
            .creations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    pub fn captured_option(&self, name: &str) -> Option<Value> {
        self.state
            .options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn attributes_created(&self) -> usize {
        self.state.attributes_created.load(Ordering::Relaxed)
    }
}

impl Renderer for CapturingRenderer {
    fn name(&self) -> &str {
        CAPTURING_RENDERER_NAME
    }

    fn option(&self, name: &str, value: Option<&Value>) {
        let mut options = self.state.options.lock().unwrap_or_else(PoisonError::into_inner);
        match value {
            Some(value) => options.insert(name.to_string(), value.clone()),
            None => options.remove(name),
        };
    }

    fn attributes(&self, attributes: &Attributes) -> Arc<dyn AttributesInterface> {
        self.state.attributes_created.fetch_add(1, Ordering::Relaxed);
        Arc::new(CapturedAttributes {
            attributes: attributes.clone(),
        })
    }

    fn object(
        &self,
        name: &str,
        object: &SceneObject,
        attributes: &Arc<dyn AttributesInterface>,
    ) -> Option<Box<dyn ObjectInterface>> {
        let mut objects = self.state.objects();
        if objects.contains_key(name) {
            error!("CapturingRenderer::object : Object named \"{}\" already exists", name);
            return None;
        }
        let captured = Arc::new(CapturedObject {
            name: name.to_string(),
            object: object.clone(),
            serial: self.state.next_serial.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(CapturedState {
                attributes: captured_attributes(attributes),
                transform: M44::identity(),
                id: 0,
                attribute_edits: 0,
                transform_edits: 0,
            }),
        });
        objects.insert(name.to_string(), captured.clone());
        drop(objects);

        *self
            .state
            .creations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert(0) += 1;

        Some(Box::new(CapturedHandle {
            object: captured,
            renderer: self.state.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropping_a_handle_removes_the_object() {
        let renderer = CapturingRenderer::new();
        let attributes = renderer.attributes(&Attributes::new());
        let handle = renderer.object("/a", &SceneObject::new("mesh"), &attributes);
        assert!(handle.is_some());
        assert!(renderer.object("/a", &SceneObject::new("mesh"), &attributes).is_none());
        assert_eq!(renderer.captured_names(), vec!["/a".to_string()]);

        drop(handle);
        assert!(renderer.captured_object("/a").is_none());
        assert_eq!(renderer.creation_count("/a"), 1);
    }

    #[test]
    fn attribute_edits_can_be_refused() {
        let renderer = CapturingRenderer::new();
        let mut attributes = Attributes::new();
        let initial = renderer.attributes(&attributes);
        let mut handle = renderer.object("/a", &SceneObject::new("mesh"), &initial).unwrap();

        attributes.insert("color".to_string(), Value::from("red"));
        let edited = renderer.attributes(&attributes);
        assert!(handle.attributes(&edited));
        let captured = renderer.captured_object("/a").unwrap();
        assert_eq!(captured.attributes(), attributes);
        assert_eq!(captured.attribute_edits(), 1);

        renderer.set_attribute_edits_supported(false);
        assert!(!handle.attributes(&edited));
        assert_eq!(captured.attribute_edits(), 1);
    }
}
