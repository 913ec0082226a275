use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use once_cell::sync::Lazy;

use crate::document::DocumentId;

use super::background_task::TaskShared;
use super::{TaskId, current_task};

static GLOBAL_REGISTRY: Lazy<Arc<TaskRegistry>> = Lazy::new(|| Arc::new(TaskRegistry::new()));

#[derive(Default)]
struct RegistryState {
    tasks: HashMap<TaskId, Arc<TaskShared>>,
    by_document: HashMap<DocumentId, HashSet<TaskId>>,
}

/// Active background tasks, indexed by the document their subject belongs
/// to. Tasks are registered when spawned and removed once waited for.
#[derive(Default)]
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<TaskRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, task: Arc<TaskShared>) {
        let mut state = self.state();
        if let Some(subject) = task.subject {
            state
                .by_document
                .entry(subject.document)
                .or_default()
                .insert(task.id);
        }
        state.tasks.insert(task.id, task);
    }

    pub(crate) fn deregister(&self, id: TaskId) {
        let mut state = self.state();
        let Some(task) = state.tasks.remove(&id) else {
            return;
        };
        if let Some(subject) = task.subject {
            if let Some(ids) = state.by_document.get_mut(&subject.document) {
                ids.remove(&id);
                if ids.is_empty() {
                    state.by_document.remove(&subject.document);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tasks_for_document(&self, document: DocumentId) -> usize {
        self.state().by_document.get(&document).map_or(0, HashSet::len)
    }

    /// Cancels every task whose subject belongs to `document` and waits for
    /// all of them to finish. The task calling this, if any, is skipped.
    /// Returns the number of tasks waited for.
    pub fn cancel_affected_tasks(&self, document: DocumentId) -> usize {
        let calling = current_task();
        let affected: Vec<Arc<TaskShared>> = {
            let state = self.state();
            state
                .by_document
                .get(&document)
                .into_iter()
                .flatten()
                .filter(|id| Some(**id) != calling)
                .filter_map(|id| state.tasks.get(id).cloned())
                .collect()
        };
        if affected.is_empty() {
            return 0;
        }

        debug!("Cancelling {} task(s) for document {}", affected.len(), document);
        for task in &affected {
            task.cancel();
        }
        for task in &affected {
            task.wait();
            self.deregister(task.id);
        }
        affected.len()
    }
}
