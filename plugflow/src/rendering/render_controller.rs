use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, warn};

use crate::document::Document;
use crate::error::EngineError;
use crate::evaluation::compute::EvalContext;
use crate::evaluation::context::{Context, SCENE_PATH};
use crate::evaluation::value::Attributes;
use crate::graph::{Graph, ListenerId, PlugId};
use crate::scene::{IdMap, PathMatcher, ScenePath, ScenePlug, VisibleSet};
use crate::task::{BackgroundTask, Canceller, TaskStatus};
use crate::util::timing::ScopedTimer;

use super::renderer::{AttributesInterface, Renderer};
use super::scene_graph::{ProgressCallback, SceneGraph, UpdatePass, component, global_component};

const OPTION_PREFIX: &str = "option:";
const ATTRIBUTE_PREFIX: &str = "attribute:";

pub type UpdateRequiredCallback = Arc<dyn Fn() + Send + Sync>;

struct ControllerState {
    context: Context,
    visible_set: VisibleSet,
    minimum_expansion_depth: usize,
    scene_graph: SceneGraph,
    globals: Attributes,
    root_attributes: Attributes,
    changed_globals: u8,
    default_attributes: Option<Arc<dyn AttributesInterface>>,
    failed_attribute_edits: usize,
}

struct ControllerShared {
    document: Arc<Document>,
    scene: ScenePlug,
    renderer: Arc<dyn Renderer>,
    id_map: IdMap,

    dirty_components: AtomicU8,
    globals_dirty: AtomicBool,
    update_required: AtomicBool,
    update_requested: AtomicBool,
    update_required_callback: Mutex<Option<UpdateRequiredCallback>>,

    state: Mutex<ControllerState>,
}

impl ControllerShared {
    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn plug_dirtied(&self, plug: PlugId) {
        let scene = &self.scene;
        let components = if plug == scene.bound {
            component::BOUND
        } else if plug == scene.transform {
            component::TRANSFORM
        } else if plug == scene.attributes {
            component::ATTRIBUTES
        } else if plug == scene.object {
            component::OBJECT
        } else if plug == scene.child_names {
            component::CHILD_NAMES
        } else if plug == scene.globals {
            self.globals_dirty.store(true, Ordering::Release);
            component::NONE
        } else if plug == scene.root {
            self.request_update();
            return;
        } else {
            return;
        };
        self.dirty_components.fetch_or(components, Ordering::AcqRel);
        self.request_update();
    }

    fn request_update(&self) {
        self.update_required.store(true, Ordering::Release);
        if !self.update_requested.swap(true, Ordering::AcqRel) {
            let callback = self
                .update_required_callback
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    fn dirty_all(&self) {
        self.globals_dirty.store(true, Ordering::Release);
        self.dirty_components.fetch_or(component::ALL, Ordering::AcqRel);
        self.request_update();
    }

    fn update_internal(
        &self,
        graph: &Graph,
        canceller: Option<&Canceller>,
        callback: Option<&ProgressCallback>,
        paths_to_update: Option<&PathMatcher>,
        signal_completion: bool,
    ) -> Result<(), EngineError> {
        let mut guard = self.state();
        let state = &mut *guard;

        let result = self.update_scene_graph(state, graph, canceller, callback, paths_to_update);
        match result {
            Ok(()) => {
                if paths_to_update.is_none() {
                    state.changed_globals = global_component::NONE;
                    self.update_required.store(false, Ordering::Release);
                    if state.failed_attribute_edits > 0 {
                        warn!(
                            "RenderController : {} attribute edit{} required geometry to be regenerated",
                            state.failed_attribute_edits,
                            if state.failed_attribute_edits > 1 { "s" } else { "" }
                        );
                        state.failed_attribute_edits = 0;
                    }
                }
                if signal_completion {
                    if let Some(callback) = callback {
                        callback(TaskStatus::Completed);
                    }
                }
                Ok(())
            }
            Err(e) if e.is_cancellation() => {
                if let Some(callback) = callback {
                    callback(TaskStatus::Cancelled);
                }
                Err(e)
            }
            Err(e) => {
                // Updating again would only repeat the error.
                self.update_required.store(false, Ordering::Release);
                if let Some(callback) = callback {
                    callback(TaskStatus::Errored);
                }
                Err(e)
            }
        }
    }

    fn update_scene_graph(
        &self,
        state: &mut ControllerState,
        graph: &Graph,
        canceller: Option<&Canceller>,
        callback: Option<&ProgressCallback>,
        paths_to_update: Option<&PathMatcher>,
    ) -> Result<(), EngineError> {
        self.update_requested.store(false, Ordering::Release);

        let context = state.context.clone();
        let mut eval = EvalContext::new(graph, &context);
        if let Some(canceller) = canceller {
            eval = eval.with_canceller(canceller);
        }

        let dirty = self.dirty_components.swap(component::NONE, Ordering::AcqRel);
        if dirty != component::NONE {
            state.scene_graph.dirty(dirty);
        }

        if self.globals_dirty.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.update_globals(state, &eval) {
                self.globals_dirty.store(true, Ordering::Release);
                return Err(e);
            }
        }

        let default_attributes = state
            .default_attributes
            .get_or_insert_with(|| self.renderer.attributes(&Attributes::new()))
            .clone();

        let pass = UpdatePass {
            eval,
            scene: self.scene,
            renderer: &*self.renderer,
            default_attributes: &default_attributes,
            root_attributes: &state.root_attributes,
            changed_globals: state.changed_globals,
            visible_set: &state.visible_set,
            minimum_expansion_depth: state.minimum_expansion_depth,
            id_map: &self.id_map,
            paths_to_update,
            callback,
            failed_attribute_edits: AtomicUsize::new(0),
        };

        let result = {
            let _timer = ScopedTimer::debug(|| {
                format!(
                    "RenderController::update ({})",
                    if paths_to_update.is_some() { "matching paths" } else { "all paths" }
                )
            });
            state.scene_graph.update_task(None, &[], &pass)
        };
        state.failed_attribute_edits += pass.failed_attribute_edits.load(Ordering::Relaxed);
        result
    }

    /// Pushes changed `option:` globals to the renderer and gathers the
    /// `attribute:` globals that become the root location's attributes.
    fn update_globals(&self, state: &mut ControllerState, eval: &EvalContext<'_>) -> Result<(), EngineError> {
        let context = eval.context().without(SCENE_PATH);
        let value = eval.with_context(&context).value(self.scene.globals)?;
        let globals = value.as_map().cloned().unwrap_or_default();
        if globals == state.globals {
            return Ok(());
        }

        for (name, value) in &globals {
            if let Some(option) = name.strip_prefix(OPTION_PREFIX) {
                if state.globals.get(name) != Some(value) {
                    debug!("RenderController : option \"{}\" changed", option);
                    self.renderer.option(option, Some(value));
                }
            }
        }
        for name in state.globals.keys() {
            if let Some(option) = name.strip_prefix(OPTION_PREFIX) {
                if !globals.contains_key(name) {
                    self.renderer.option(option, None);
                }
            }
        }

        state.root_attributes = globals
            .iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(ATTRIBUTE_PREFIX)
                    .map(|attribute| (attribute.to_string(), value.clone()))
            })
            .collect();
        state.globals = globals;
        state.changed_globals |= global_component::GLOBALS;
        Ok(())
    }
}

/// Keeps a renderer in sync with a scene, doing only the work needed to
/// account for each edit.
///
/// Edits to the document dirty the controller through the graph's
/// plug dirtied notifications; nothing is sent to the renderer until one of
/// the update methods is called.
pub struct RenderController {
    shared: Arc<ControllerShared>,
    listener: ListenerId,
    background_task: Mutex<Option<Arc<BackgroundTask>>>,
}

impl RenderController {
    pub fn new(
        document: Arc<Document>,
        scene: ScenePlug,
        renderer: Arc<dyn Renderer>,
        context: Context,
    ) -> Self {
        let shared = Arc::new(ControllerShared {
            document: document.clone(),
            scene,
            renderer,
            id_map: IdMap::new(),
            dirty_components: AtomicU8::new(component::ALL),
            globals_dirty: AtomicBool::new(true),
            update_required: AtomicBool::new(true),
            update_requested: AtomicBool::new(false),
            update_required_callback: Mutex::new(None),
            state: Mutex::new(ControllerState {
                context,
                visible_set: VisibleSet::default(),
                minimum_expansion_depth: 0,
                scene_graph: SceneGraph::new(""),
                globals: Attributes::new(),
                root_attributes: Attributes::new(),
                changed_globals: global_component::NONE,
                default_attributes: None,
                failed_attribute_edits: 0,
            }),
        });

        let weak: Weak<ControllerShared> = Arc::downgrade(&shared);
        let listener = document.read().connect_plug_dirtied(move |_, plug| {
            if let Some(shared) = weak.upgrade() {
                shared.plug_dirtied(plug);
            }
        });

        Self {
            shared,
            listener,
            background_task: Mutex::new(None),
        }
    }

    pub fn renderer(&self) -> &Arc<dyn Renderer> {
        &self.shared.renderer
    }

    pub fn scene(&self) -> ScenePlug {
        self.shared.scene
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.shared.document
    }

    pub fn context(&self) -> Context {
        self.shared.state().context.clone()
    }

    pub fn set_context(&self, context: Context) {
        self.cancel_background_task();
        {
            let mut state = self.shared.state();
            if state.context.hash() == context.hash() {
                state.context = context;
                return;
            }
            state.context = context;
        }
        self.shared.dirty_all();
    }

    pub fn visible_set(&self) -> VisibleSet {
        self.shared.state().visible_set.clone()
    }

    pub fn set_visible_set(&self, visible_set: VisibleSet) {
        self.cancel_background_task();
        {
            let mut state = self.shared.state();
            if state.visible_set == visible_set {
                return;
            }
            state.visible_set = visible_set;
            state.scene_graph.dirty(component::VISIBLE_SET);
        }
        self.shared.request_update();
    }

    pub fn minimum_expansion_depth(&self) -> usize {
        self.shared.state().minimum_expansion_depth
    }

    pub fn set_minimum_expansion_depth(&self, depth: usize) {
        self.cancel_background_task();
        {
            let mut state = self.shared.state();
            if state.minimum_expansion_depth == depth {
                return;
            }
            state.minimum_expansion_depth = depth;
            state.scene_graph.dirty(component::VISIBLE_SET);
        }
        self.shared.request_update();
    }

    /// Called the first time an update becomes required after an update
    /// started. It runs inside the edit that caused it, so it must not
    /// update the controller itself.
    pub fn set_update_required_callback(&self, callback: Option<UpdateRequiredCallback>) {
        *self
            .shared
            .update_required_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = callback;
    }

    pub fn update_required(&self) -> bool {
        self.shared.update_required.load(Ordering::Acquire)
    }

    /// Updates the renderer on the calling thread.
    pub fn update(&self, callback: Option<ProgressCallback>) -> Result<(), EngineError> {
        self.cancel_background_task();
        let graph = self.shared.document.read();
        self.shared
            .update_internal(&graph, None, callback.as_ref(), None, true)
    }

    /// Updates only the locations matched by `paths`, and their ancestors.
    /// A later `update()` is still needed to bring the rest of the scene up
    /// to date.
    pub fn update_matching_paths(
        &self,
        paths: &PathMatcher,
        callback: Option<ProgressCallback>,
    ) -> Result<(), EngineError> {
        self.cancel_background_task();
        let graph = self.shared.document.read();
        self.shared
            .update_internal(&graph, None, callback.as_ref(), Some(paths), true)
    }

    /// Starts an update on the background pool, first updating
    /// `priority_paths` if any are given. Returns `None` when nothing needs
    /// updating. Editing the document cancels the task.
    pub fn update_in_background(
        &self,
        callback: Option<ProgressCallback>,
        priority_paths: PathMatcher,
    ) -> Option<Arc<BackgroundTask>> {
        if !self.update_required() {
            return None;
        }
        self.cancel_background_task();

        let shared = self.shared.clone();
        let subject = shared.document.subject(Some(shared.scene.root));
        let registry = shared.document.registry().clone();
        let task = Arc::new(BackgroundTask::spawn_with_registry(
            registry,
            Some(subject),
            move |canceller| {
                let graph = shared.document.read();
                if !priority_paths.is_empty() {
                    shared.update_internal(
                        &graph,
                        Some(canceller),
                        callback.as_ref(),
                        Some(&priority_paths),
                        false,
                    )?;
                }
                shared.update_internal(&graph, Some(canceller), callback.as_ref(), None, true)
            },
        ));

        *self
            .background_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task.clone());
        Some(task)
    }

    fn cancel_background_task(&self) {
        let task = self
            .background_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.cancel_and_wait();
        }
    }

    /// Only locations that have been rendered have ids.
    pub fn id_for_path(&self, path: &[String]) -> u32 {
        self.shared.id_map.id_for_path(path, false)
    }

    pub fn path_for_id(&self, id: u32) -> Option<ScenePath> {
        self.shared.id_map.path_for_id(id)
    }

    pub fn ids_for_paths(&self, paths: &PathMatcher) -> Vec<u32> {
        paths
            .paths()
            .map(|path| self.id_for_path(path))
            .filter(|id| *id != 0)
            .collect()
    }

    pub fn paths_for_ids(&self, ids: &[u32]) -> PathMatcher {
        PathMatcher::from_paths(ids.iter().filter_map(|id| self.path_for_id(*id)))
    }
}

impl Drop for RenderController {
    fn drop(&mut self) {
        self.cancel_background_task();
        self.shared
            .document
            .read()
            .disconnect_plug_dirtied(self.listener);
    }
}
