//! The condition: a locked flag set plus debounced, once-per-episode observers.
//!
//! Mutations update the flag set under a mutex and signal a [`Debouncer`].
//! The debounced recheck pass runs on the default execution context, walks a
//! snapshot of the registry, and applies the observer transition table to
//! each entry.
//! Observers with an override context are dispatched there and re-validated
//! immediately before their action runs; all others fire inline in the pass.
//!
//! Scheduled work captures the shared state weakly. An execution dispatched to
//! an override context holds a [`KeepAlive`] instead, so the state outlives
//! every external handle until that execution has finished.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::action::Action;
use crate::context::{ExecutionContext, Task};
use crate::debounce::Debouncer;
use crate::error::{duration_ms, CondError, CondResult, ExecutionError, ValidationError};
use crate::flags::FlagSet;
use crate::observer::{next_step, ObserveOptions, Observer, ObserverHandle, ObserverId, Registry, Step};

/// Construction-time configuration for a [`Condition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionConfig {
    /// Name used in logs.
    pub name: String,
    /// Delay between the first coalesced signal and its recheck pass.
    pub debounce_delay: Duration,
}

impl Default for ConditionConfig {
    fn default() -> Self {
        Self {
            name: "condition".to_string(),
            debounce_delay: Duration::ZERO,
        }
    }
}

impl ConditionConfig {
    /// Check the configuration.
    pub fn validate(&self) -> CondResult<()> {
        if self.name.trim().is_empty() {
            return Err(CondError::Validation(ValidationError::InvalidConfig {
                field: "name".to_string(),
                reason: "condition name must not be empty".to_string(),
            }));
        }
        Ok(())
    }
}

struct State<T> {
    flags: T,
    registry: Registry<T>,
}

struct Inner<T> {
    name: String,
    state: Mutex<State<T>>,
    context: Arc<dyn ExecutionContext>,
    notifier: Debouncer,
    in_flight: AtomicUsize,
    closed: AtomicBool,
}

/// Token that keeps a condition's shared state alive.
///
/// One is taken for every execution dispatched to an override context and
/// released when that execution returns.
pub struct KeepAlive<T> {
    inner: Arc<Inner<T>>,
}

impl<T> KeepAlive<T> {
    fn new(inner: Arc<Inner<T>>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::AcqRel);
        Self { inner }
    }
}

impl<T> Drop for KeepAlive<T> {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<T> fmt::Debug for KeepAlive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAlive").field("condition", &self.inner.name).finish()
    }
}

/// A thread-safe flag set whose observers fire when it covers their
/// required flags.
///
/// Each observer fires at most once per satisfaction episode: the action
/// runs after the flags come to cover its requirement, and can only run
/// again after a recheck pass has seen the requirement unmet. Notification
/// is coalesced and asynchronous, so a set-then-unset burst between two
/// passes may never be observed.
///
/// Cloning a `Condition` yields another handle to the same state.
pub struct Condition<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Condition<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: FlagSet> Condition<T> {
    /// Create a condition whose recheck passes run on `context`.
    pub fn new(context: Arc<dyn ExecutionContext>, initial: T) -> Self {
        Self::build(context, initial, ConditionConfig::default())
    }

    /// Create a condition from an explicit configuration.
    pub fn with_config(context: Arc<dyn ExecutionContext>, initial: T, config: ConditionConfig) -> CondResult<Self> {
        config.validate()?;
        Ok(Self::build(context, initial, config))
    }

    fn build(context: Arc<dyn ExecutionContext>, initial: T, config: ConditionConfig) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner<T>>| {
            let weak = weak.clone();
            let notifier = Debouncer::new(Arc::clone(&context), config.debounce_delay, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.recheck();
                }
            });
            Inner {
                name: config.name,
                state: Mutex::new(State {
                    flags: initial,
                    registry: Registry::default(),
                }),
                context,
                notifier,
                in_flight: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }
        });
        Self { inner }
    }

    /// Returns true if the current flags are a superset of `required`.
    pub fn meets(&self, required: &T) -> bool {
        self.inner.meets(required)
    }

    /// Snapshot of the current flags.
    pub fn flags(&self) -> T {
        self.inner.lock().flags.clone()
    }

    /// Turn `flags` on.
    pub fn set_on(&self, flags: &T) {
        self.inner.mutate(|current| current.union(flags));
    }

    /// Turn `flags` off.
    pub fn set_off(&self, flags: &T) {
        self.inner.mutate(|current| current.difference(flags));
    }

    /// Replace the whole flag set in one step.
    pub fn replace(&self, flags: T) {
        self.inner.mutate(move |_| flags);
    }

    /// Register an observer that fires on the default context and stays
    /// registered until removed.
    pub fn observe(&self, required: T, action: Action) -> ObserverHandle {
        self.observe_with(required, action, ObserveOptions::default())
    }

    /// Register an observer with explicit options.
    ///
    /// A recheck is requested right away, so an observer whose requirement is
    /// already met fires without any further mutation.
    pub fn observe_with(&self, required: T, action: Action, options: ObserveOptions) -> ObserverHandle {
        let observer = Arc::new(Observer::new(required, action, options));
        let handle = self.inner.register(observer);
        self.inner.notifier.signal();
        handle
    }

    /// Unregister an observer. Unknown or `None` handles are ignored.
    ///
    /// An execution already dispatched to an override context still runs.
    pub fn remove_observer(&self, handle: impl Into<Option<ObserverHandle>>) {
        if let Some(handle) = handle.into() {
            self.inner.remove(handle.id());
        }
    }

    /// Register a one-shot observer and check it right away.
    ///
    /// The check runs asynchronously on the default context, independent of
    /// the debounced recheck. A non-zero `timeout` schedules removal of the
    /// observer once it elapses; `Duration::ZERO` waits indefinitely. This
    /// never blocks the caller.
    pub fn wait(&self, required: T, action: Action, timeout: Duration) -> ObserverHandle {
        let observer = Arc::new(Observer::new(required, action, ObserveOptions::once()));
        let id = observer.id;
        let handle = self.inner.register(Arc::clone(&observer));

        let weak = Arc::downgrade(&self.inner);
        let check: Task = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                if inner.is_registered(observer.id) {
                    inner.evaluate(&observer);
                }
            }
        });
        if let Err(e) = self.inner.context.schedule(check) {
            warn!(condition = %self.inner.name, observer = %id, error = %e, "immediate wait check not scheduled");
        }

        if !timeout.is_zero() {
            let weak = Arc::downgrade(&self.inner);
            let expire: Task = Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    if inner.remove(id) {
                        debug!(condition = %inner.name, observer = %id, "wait timed out");
                    }
                }
            });
            if let Err(e) = self.inner.context.schedule_after(timeout, expire) {
                warn!(condition = %self.inner.name, observer = %id, error = %e, "wait timeout not scheduled");
            }
        }

        handle
    }

    /// Block the calling thread until `required` is met or `timeout` elapses.
    ///
    /// `Duration::ZERO` blocks without a deadline. Calling this from a task
    /// on the default context is refused, since that task would stall the
    /// very queue that has to run the check.
    pub fn wait_blocking(&self, required: T, timeout: Duration) -> CondResult<()> {
        if self.inner.context.is_current() {
            return Err(CondError::Execution(ExecutionError::WouldDeadlock {
                context: self.inner.context.name().to_string(),
            }));
        }

        let (tx, rx) = bounded::<()>(1);
        let action = Action::new("wait_blocking", move || {
            let _ = tx.try_send(());
        });
        let handle = self.wait(required, action, Duration::ZERO);

        let disconnected = || {
            CondError::Execution(ExecutionError::Disconnected {
                context: self.inner.name.clone(),
            })
        };

        if timeout.is_zero() {
            return rx.recv().map_err(|_| disconnected());
        }

        match rx.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => {
                self.remove_observer(handle);
                // The action may have fired between the timeout and removal.
                if rx.try_recv().is_ok() {
                    return Ok(());
                }
                Err(CondError::Execution(ExecutionError::Timeout {
                    duration_ms: duration_ms(timeout),
                }))
            }
            Err(RecvTimeoutError::Disconnected) => Err(disconnected()),
        }
    }

    /// Number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.lock().registry.len()
    }

    /// Returns true while the observer behind `handle` is registered.
    #[must_use]
    pub fn contains(&self, handle: ObserverHandle) -> bool {
        self.inner.is_registered(handle.id())
    }

    /// Take a token that keeps the shared state alive while it is held.
    #[must_use]
    pub fn keep_alive(&self) -> KeepAlive<T> {
        KeepAlive::new(Arc::clone(&self.inner))
    }

    /// Number of live [`KeepAlive`] tokens, including in-flight executions.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Tear the condition down.
    ///
    /// Stops scheduling recheck passes and drops every observer. Passes and
    /// executions already queued become no-ops. Flag mutation keeps working.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.notifier.cancel();
        let dropped = self.inner.lock().registry.clear();
        debug!(condition = %self.inner.name, observers = dropped.len(), "condition closed");
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Name from the configuration.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Context the recheck passes run on.
    #[must_use]
    pub fn default_context(&self) -> &Arc<dyn ExecutionContext> {
        &self.inner.context
    }
}

impl<T: FlagSet> fmt::Debug for Condition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (flags, observers) = {
            let state = self.inner.lock();
            (state.flags.clone(), state.registry.len())
        };
        f.debug_struct("Condition")
            .field("name", &self.inner.name)
            .field("flags", &flags)
            .field("observers", &observers)
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T: FlagSet> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Actions never run under this lock; a poisoned guard still holds a
        // whole flag set.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn meets(&self, required: &T) -> bool {
        self.lock().flags.is_superset(required)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_registered(&self, id: ObserverId) -> bool {
        self.lock().registry.contains(id)
    }

    fn mutate(&self, f: impl FnOnce(&T) -> T) {
        {
            let mut state = self.lock();
            state.flags = f(&state.flags);
        }
        self.notifier.signal();
    }

    fn register(&self, observer: Arc<Observer<T>>) -> ObserverHandle {
        let handle = ObserverHandle::new(observer.id);
        {
            let mut state = self.lock();
            // Checked under the lock: `close` sets the flag before clearing.
            if self.is_closed() {
                drop(state);
                debug!(condition = %self.name, observer = %observer.id, "condition closed; observer not registered");
                return handle;
            }
            state.registry.insert(Arc::clone(&observer));
        }
        debug!(
            condition = %self.name,
            observer = %observer.id,
            action = %observer.action,
            required = ?observer.required,
            "observer added"
        );
        handle
    }

    fn remove(&self, id: ObserverId) -> bool {
        // Bind first so the observer (and its action) drops outside the lock.
        let removed = self.lock().registry.remove(id);
        match removed {
            Some(observer) => {
                debug!(condition = %self.name, observer = %id, action = %observer.action, "observer removed");
                true
            }
            None => false,
        }
    }

    fn recheck(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        let snapshot = self.lock().registry.snapshot();
        trace!(condition = %self.name, observers = snapshot.len(), "recheck pass");
        for observer in &snapshot {
            self.evaluate(observer);
        }
    }

    fn evaluate(self: &Arc<Self>, observer: &Arc<Observer<T>>) {
        // The flag read and every change to `fired` share one critical
        // section, so no episode boundary can fall between them.
        let step = {
            let state = self.lock();
            let meets = state.flags.is_superset(&observer.required);
            let step = next_step(meets, observer.has_fired());
            match step {
                Step::Fire if observer.context.is_none() => {
                    debug_assert!(meets, "observer {} fired with its requirement unmet", observer.id);
                    if !observer.claim_fire() {
                        return;
                    }
                }
                Step::Reset => observer.reset_episode(),
                Step::Fire | Step::Idle => {}
            }
            step
        };

        match (step, observer.context.as_ref()) {
            (Step::Fire, None) => self.fire(observer),
            (Step::Fire, Some(context)) => self.dispatch(observer, context),
            (Step::Reset, _) => trace!(condition = %self.name, observer = %observer.id, "episode ended"),
            (Step::Idle, _) => {}
        }
    }

    /// Claims the current episode if `required` is met right now.
    fn claim_if_met(&self, observer: &Observer<T>) -> bool {
        let state = self.lock();
        let meets = state.flags.is_superset(&observer.required);
        meets && observer.claim_fire()
    }

    fn dispatch(self: &Arc<Self>, observer: &Arc<Observer<T>>, context: &Arc<dyn ExecutionContext>) {
        // One queued execution per observer is enough; it re-validates anyway.
        if !observer.claim_dispatch() {
            return;
        }

        let pin = KeepAlive::new(Arc::clone(self));
        let target = Arc::clone(observer);
        let task: Task = Box::new(move || {
            target.release_dispatch();
            let inner = &pin.inner;
            if inner.is_closed() {
                return;
            }
            if inner.claim_if_met(&target) {
                inner.fire(&target);
            } else {
                trace!(condition = %inner.name, observer = %target.id, "requirement lapsed or episode already fired");
            }
        });

        if let Err(e) = context.schedule(task) {
            observer.release_dispatch();
            warn!(
                condition = %self.name,
                observer = %observer.id,
                context = %context.name(),
                error = %e,
                "observer dispatch not scheduled"
            );
        }
    }

    /// Runs the action of an observer whose episode has been claimed.
    fn fire(&self, observer: &Observer<T>) {
        trace!(condition = %self.name, observer = %observer.id, action = %observer.action, "firing");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.action.perform(None)));
        if outcome.is_err() {
            error!(condition = %self.name, observer = %observer.id, action = %observer.action, "observer action panicked");
        }
        if observer.auto_remove {
            self.remove(observer.id);
        }
    }
}
