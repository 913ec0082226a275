//! Mirrors scenes into renderer backends.

pub mod capturing_renderer;
pub mod render_controller;
pub mod renderer;
pub mod scene_graph;

pub use capturing_renderer::{CapturedObject, CapturingRenderer};
pub use render_controller::{RenderController, UpdateRequiredCallback};
pub use renderer::{AttributesInterface, ObjectInterface, Renderer};
pub use scene_graph::{ProgressCallback, SceneGraph};
