//! Coalescing trigger.
//!
//! Any number of [`Debouncer::signal`] calls made before the scheduled task
//! starts collapse into a single run of the callback. The pending flag is
//! cleared *before* the callback runs, so a signal that lands while the
//! callback is executing schedules a fresh run: at least one run always starts
//! after the most recent signal.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::context::{ExecutionContext, Task};

/// Debounced callback bound to an execution context.
pub struct Debouncer {
    context: Arc<dyn ExecutionContext>,
    delay: Duration,
    pending: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl Debouncer {
    /// Bind `callback` to `context`. A zero `delay` still runs the callback
    /// asynchronously, never on the signalling thread.
    pub fn new<F>(context: Arc<dyn ExecutionContext>, delay: Duration, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            context,
            delay,
            pending: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
            callback: Arc::new(callback),
        }
    }

    /// Request a callback run. Returns true if this call enqueued a new run,
    /// false if it was coalesced into one already pending (or the debouncer
    /// is cancelled).
    pub fn signal(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        if self.pending.swap(true, Ordering::AcqRel) {
            return false;
        }

        let pending = Arc::clone(&self.pending);
        let cancelled = Arc::clone(&self.cancelled);
        let callback = Arc::clone(&self.callback);
        let task: Task = Box::new(move || {
            pending.store(false, Ordering::Release);
            if !cancelled.load(Ordering::Acquire) {
                callback();
            }
        });

        let scheduled = if self.delay.is_zero() {
            self.context.schedule(task)
        } else {
            self.context.schedule_after(self.delay, task)
        };

        match scheduled {
            Ok(()) => true,
            Err(e) => {
                // Only a shut-down context refuses work; later signals may
                // still try.
                self.pending.store(false, Ordering::Release);
                warn!(context = %self.context.name(), error = %e, "debounced run not scheduled");
                false
            }
        }
    }

    /// Returns true while a run is enqueued but has not started.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Stop scheduling runs. Already enqueued runs become no-ops.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Delay applied before each run.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

impl fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("context", &self.context.name())
            .field("delay", &self.delay)
            .field("pending", &self.is_pending())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
