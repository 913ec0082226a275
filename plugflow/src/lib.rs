pub mod config;
pub mod document;
pub mod error;
pub mod evaluation;
pub mod graph;
pub mod nodes;
pub mod rendering;
pub mod scene;
pub mod task;
pub mod util;

pub use config::EngineConfig;
pub use document::{Document, DocumentId};
pub use error::EngineError;
pub use evaluation::cache::{SharedValueCache, ValueCache};
pub use evaluation::compute::{Computation, EvalContext};
pub use evaluation::context::Context;
pub use evaluation::hash::ContentHash;
pub use evaluation::value::{Attributes, Box3, M44, SceneObject, Value, ValueKind};
pub use graph::{ComputeNode, Direction, Graph, NodeBuilder, NodeId, PlugFlags, PlugId};
pub use task::{BackgroundTask, Canceller, TaskStatus};
