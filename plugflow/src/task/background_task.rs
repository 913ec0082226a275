use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{error, trace, warn};

use crate::error::EngineError;

use super::canceller::Canceller;
use super::registry::TaskRegistry;
use super::{Subject, TaskId, TaskStatus, current_task, set_current_task, spawn_on_background_pool};

const SLOW_CANCELLATION: Duration = Duration::from_secs(1);

/// State shared between a task handle, its worker and the registry.
pub(crate) struct TaskShared {
    pub(crate) id: TaskId,
    pub(crate) subject: Option<Subject>,
    canceller: Canceller,
    status: Mutex<TaskStatus>,
    finished: Condvar,
}

impl TaskShared {
    fn new(subject: Option<Subject>) -> Self {
        Self {
            id: TaskId::next(),
            subject,
            canceller: Canceller::new(),
            status: Mutex::new(TaskStatus::Pending),
            finished: Condvar::new(),
        }
    }

    fn status_guard(&self) -> MutexGuard<'_, TaskStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> TaskStatus {
        *self.status_guard()
    }

    /// Requests cancellation. A task that hasn't started yet is finished
    /// immediately and will never run.
    pub(crate) fn cancel(&self) {
        self.canceller.cancel();
        let mut status = self.status_guard();
        if *status == TaskStatus::Pending {
            *status = TaskStatus::Cancelled;
            self.finished.notify_all();
        }
    }

    /// Returns false without waiting when called from the task itself.
    pub(crate) fn wait(&self) -> bool {
        if current_task() == Some(self.id) {
            error!("{} can't wait for itself", self.id);
            return false;
        }
        let guard = self.status_guard();
        let _finished = self
            .finished
            .wait_while(guard, |status| !status.is_finished())
            .unwrap_or_else(PoisonError::into_inner);
        true
    }

    pub(crate) fn wait_for(&self, timeout: Duration) -> bool {
        let guard = self.status_guard();
        let (status, _) = self
            .finished
            .wait_timeout_while(guard, timeout, |status| !status.is_finished())
            .unwrap_or_else(PoisonError::into_inner);
        status.is_finished()
    }

    fn start(&self) -> bool {
        let mut status = self.status_guard();
        if *status != TaskStatus::Pending {
            return false;
        }
        *status = TaskStatus::Running;
        true
    }

    fn finish(&self, outcome: TaskStatus) {
        *self.status_guard() = outcome;
        self.finished.notify_all();
    }

    fn run<F>(&self, f: F)
    where
        F: FnOnce(&Canceller) -> Result<(), EngineError>,
    {
        if !self.start() {
            trace!("{} was cancelled before it started", self.id);
            return;
        }
        trace!("{} running", self.id);

        let previous = set_current_task(Some(self.id));
        let canceller = self.canceller.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || f(&canceller)));
        set_current_task(previous);

        let status = match outcome {
            Ok(Ok(())) => TaskStatus::Completed,
            Ok(Err(e)) if e.is_cancellation() => TaskStatus::Cancelled,
            Ok(Err(e)) => {
                error!("BackgroundTask : {}", e);
                TaskStatus::Errored
            }
            Err(payload) => {
                error!("BackgroundTask : panicked : {}", panic_message(payload.as_ref()));
                TaskStatus::Errored
            }
        };
        trace!("{} finished : {}", self.id, status);
        self.finish(status);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// A function running on the background pool, with an observable status.
///
/// The function receives a `Canceller` and is expected to check it
/// regularly; returning `Err(EngineError::Cancelled)` finishes the task as
/// `Cancelled`, any other error as `Errored`. Dropping the handle cancels the
/// task and waits for it.
pub struct BackgroundTask {
    shared: Arc<TaskShared>,
    registry: Arc<TaskRegistry>,
}

impl BackgroundTask {
    pub fn spawn<F>(subject: Option<Subject>, f: F) -> Self
    where
        F: FnOnce(&Canceller) -> Result<(), EngineError> + Send + 'static,
    {
        Self::spawn_with_registry(TaskRegistry::global(), subject, f)
    }

    pub fn spawn_with_registry<F>(registry: Arc<TaskRegistry>, subject: Option<Subject>, f: F) -> Self
    where
        F: FnOnce(&Canceller) -> Result<(), EngineError> + Send + 'static,
    {
        let shared = Arc::new(TaskShared::new(subject));
        registry.register(shared.clone());

        let worker = shared.clone();
        spawn_on_background_pool(move || worker.run(f));

        Self { shared, registry }
    }

    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn subject(&self) -> Option<Subject> {
        self.shared.subject
    }

    pub fn status(&self) -> TaskStatus {
        self.shared.status()
    }

    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Blocks until the task has finished. Must not be called from the
    /// task's own function.
    pub fn wait(&self) {
        if self.shared.wait() {
            self.registry.deregister(self.shared.id);
        }
    }

    /// Waits at most `timeout`, returning true if the task finished.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let finished = self.shared.wait_for(timeout);
        if finished {
            self.registry.deregister(self.shared.id);
        }
        finished
    }

    pub fn cancel_and_wait(&self) {
        self.cancel();
        self.wait();
        if let Some(elapsed) = self.shared.canceller.elapsed_since_cancellation() {
            if elapsed > SLOW_CANCELLATION {
                warn!(
                    "{} took {:.2}s to respond to cancellation",
                    self.shared.id,
                    elapsed.as_secs_f64()
                );
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.cancel_and_wait();
    }
}
