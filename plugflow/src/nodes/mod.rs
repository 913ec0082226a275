//! Compute nodes shipped with the engine.

pub mod arithmetic;
pub mod frame;
pub mod pass_through;
pub mod scene_source;

pub use arithmetic::{AddNode, MultiplyNode};
pub use frame::FrameNode;
pub use pass_through::PassThroughNode;
pub use scene_source::{Location, SceneDescription, SceneSource};
