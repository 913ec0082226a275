use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::{Graph, PlugId};
use crate::task::{Subject, TaskRegistry};
use crate::util::timing::ScopedTimer;

const SLOW_CANCELLATION: Duration = Duration::from_millis(100);

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owns a graph and guards every edit to it. Background tasks whose subject
/// belongs to the document are cancelled, and waited for, before an edit is
/// applied, so no evaluation ever sees a half edited graph.
pub struct Document {
    id: DocumentId,
    graph: RwLock<Graph>,
    registry: Arc<TaskRegistry>,
}

impl Document {
    pub fn new(graph: Graph) -> Self {
        Self::with_registry(graph, TaskRegistry::global())
    }

    pub fn with_registry(graph: Graph, registry: Arc<TaskRegistry>) -> Self {
        Self {
            id: DocumentId::new(),
            graph: RwLock::new(graph),
            registry,
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn subject(&self, plug: Option<PlugId>) -> Subject {
        Subject {
            document: self.id,
            plug,
        }
    }

    /// Shared access for evaluation.
    pub fn read(&self) -> RwLockReadGuard<'_, Graph> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies an edit. Dirty notifications are batched until `edit`
    /// returns.
    pub fn edit<R>(&self, edit: impl FnOnce(&mut Graph) -> R) -> R {
        {
            let _timer = ScopedTimer::debug(|| format!("Document {} : cancelling background tasks", self.id))
                .with_threshold(SLOW_CANCELLATION);
            self.registry.cancel_affected_tasks(self.id);
        }
        let mut graph = self.graph.write().unwrap_or_else(PoisonError::into_inner);
        graph.with_dirty_propagation_scope(edit)
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        self.registry.cancel_affected_tasks(self.id);
    }
}
