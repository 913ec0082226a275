use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::EngineError;

#[derive(Default)]
struct CancellerState {
    cancelled: AtomicBool,
    cancelled_at: Mutex<Option<Instant>>,
}

/// Cooperative cancellation token. Cloning shares the underlying flag, so
/// the owner of a task can cancel the clone handed to the task's function.
#[derive(Clone, Default)]
pub struct Canceller {
    state: Arc<CancellerState>,
}

impl Canceller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.state.cancelled.swap(true, Ordering::AcqRel) {
            *self
                .state
                .cancelled_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Returns `Err(EngineError::Cancelled)` once `cancel()` has been called.
    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Time since `cancel()` was first called.
    pub fn elapsed_since_cancellation(&self) -> Option<Duration> {
        self.state
            .cancelled_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|at| at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_cancellation() {
        let canceller = Canceller::new();
        let clone = canceller.clone();
        assert!(clone.check().is_ok());
        assert!(canceller.elapsed_since_cancellation().is_none());

        canceller.cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.check(), Err(EngineError::Cancelled)));
        assert!(clone.elapsed_since_cancellation().is_some());
    }
}
