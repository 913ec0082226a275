use std::time::{Duration, Instant};

use log::Level;

/// Logs how long a scope took when it is dropped.
///
/// The label is built lazily, and only if the elapsed time reaches the
/// threshold and the level is enabled, so timers can sit on hot paths.
pub struct ScopedTimer<L: FnOnce() -> String> {
    label: Option<L>,
    level: Level,
    threshold: Duration,
    start: Instant,
}

impl<L: FnOnce() -> String> ScopedTimer<L> {
    pub fn new(level: Level, label: L) -> Self {
        Self {
            label: Some(label),
            level,
            threshold: Duration::ZERO,
            start: Instant::now(),
        }
    }

    pub fn debug(label: L) -> Self {
        Self::new(Level::Debug, label)
    }

    /// Stays silent unless the scope takes at least `threshold`.
    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<L: FnOnce() -> String> Drop for ScopedTimer<L> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        if elapsed < self.threshold || !log::log_enabled!(self.level) {
            return;
        }
        if let Some(label) = self.label.take() {
            log::log!(self.level, "{} took {:.2} ms", label(), elapsed.as_secs_f64() * 1000.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_label_not_built_below_threshold() {
        let built = Cell::new(false);
        {
            let _timer = ScopedTimer::debug(|| {
                built.set(true);
                String::from("never")
            })
            .with_threshold(Duration::from_secs(3600));
        }
        assert!(!built.get());
    }
}
