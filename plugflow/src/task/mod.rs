//! Cancellable background evaluation.

pub mod background_task;
pub mod canceller;
pub mod registry;

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, error};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::document::DocumentId;
use crate::graph::PlugId;

pub use background_task::BackgroundTask;
pub use canceller::Canceller;
pub use registry::TaskRegistry;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Errored,
}

impl TaskStatus {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Errored
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// What a background task reads. Edits to the subject's document cancel the
/// task before they are applied.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Subject {
    pub document: DocumentId,
    pub plug: Option<PlugId>,
}

thread_local! {
    static CURRENT_TASK: Cell<Option<TaskId>> = const { Cell::new(None) };
}

/// The task whose function is running on this thread, if any.
pub fn current_task() -> Option<TaskId> {
    CURRENT_TASK.with(Cell::get)
}

pub(crate) fn set_current_task(task: Option<TaskId>) -> Option<TaskId> {
    CURRENT_TASK.with(|current| current.replace(task))
}

static BACKGROUND_POOL: OnceCell<Option<rayon::ThreadPool>> = OnceCell::new();

fn default_background_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .max(4)
}

fn build_pool(threads: usize) -> Option<rayon::ThreadPool> {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("plugflow-background-{}", i))
        .build()
    {
        Ok(pool) => {
            debug!("Started background pool with {} threads", threads);
            Some(pool)
        }
        Err(e) => {
            error!("Failed to start background pool, using the global pool : {}", e);
            None
        }
    }
}

/// Sizes the pool background tasks run on. Only effective before the first
/// task is spawned; returns false otherwise.
pub fn configure_background_threads(threads: usize) -> bool {
    BACKGROUND_POOL.set(build_pool(threads.max(1))).is_ok()
}

pub(crate) fn spawn_on_background_pool<F>(job: F)
where
    F: FnOnce() + Send + 'static,
{
    match BACKGROUND_POOL.get_or_init(|| build_pool(default_background_threads())) {
        Some(pool) => pool.spawn(job),
        None => rayon::spawn(job),
    }
}
