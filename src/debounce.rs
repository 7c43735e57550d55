//! Last-write-wins throttle timer.
//!
//! Each [`Debouncer::schedule`] call replaces whatever action was pending, so
//! a burst of triggers collapses into a single deferred run once the burst
//! has been quiet for the configured delay.

use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(16);

#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE)
    }
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `action` after the delay unless another call supersedes it first.
    ///
    /// The action runs synchronously once the timer fires, so cancellation can
    /// only ever drop it before it starts. Must be called within a tokio
    /// runtime.
    pub fn schedule<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        });

        let previous = match self.pending.lock() {
            Ok(mut pending) => pending.replace(handle),
            Err(poisoned) => poisoned.into_inner().replace(handle),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Drop the pending action, if any. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        let previous = match self.pending.lock() {
            Ok(mut pending) => pending.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match previous {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
