//! Observers and the observer registry.
//!
//! An observer pairs a required flag subset with an action. Its `fired` bit
//! tracks whether the action has run during the current satisfaction episode;
//! the recheck pass drives it through the transition table in `next_step`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::Action;
use crate::context::ExecutionContext;
use crate::flags::FlagSet;

/// Unique identifier for an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObserverId(Uuid);

impl ObserverId {
    /// Create a new random observer id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Non-owning handle used to remove an observer.
///
/// Holding a handle does not keep the observer registered; removing an
/// observer that already left the registry is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle {
    id: ObserverId,
}

impl ObserverHandle {
    pub(crate) const fn new(id: ObserverId) -> Self {
        Self { id }
    }

    /// Identity of the observer this handle refers to.
    #[must_use]
    pub const fn id(&self) -> ObserverId {
        self.id
    }
}

/// Registration options for [`Condition::observe_with`](crate::Condition::observe_with).
#[derive(Debug, Clone, Default)]
pub struct ObserveOptions {
    /// Fire on this context instead of the condition's default context.
    pub context: Option<Arc<dyn ExecutionContext>>,
    /// Remove the observer after its first firing.
    pub auto_remove: bool,
}

impl ObserveOptions {
    /// Fire on `context` instead of the default context.
    #[must_use]
    pub fn on(context: Arc<dyn ExecutionContext>) -> Self {
        Self {
            context: Some(context),
            auto_remove: false,
        }
    }

    /// Fire once, then unregister.
    #[must_use]
    pub fn once() -> Self {
        Self {
            context: None,
            auto_remove: true,
        }
    }

    /// Set whether the observer unregisters after firing.
    #[must_use]
    pub fn auto_remove(mut self, auto_remove: bool) -> Self {
        self.auto_remove = auto_remove;
        self
    }
}

/// What a recheck pass does with one observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Satisfied and not yet fired this episode.
    Fire,
    /// Unsatisfied after having fired: the episode ended.
    Reset,
    /// Nothing to do.
    Idle,
}

pub(crate) const fn next_step(meets: bool, fired: bool) -> Step {
    match (meets, fired) {
        (true, false) => Step::Fire,
        (false, true) => Step::Reset,
        (true, true) | (false, false) => Step::Idle,
    }
}

pub(crate) struct Observer<T> {
    pub(crate) id: ObserverId,
    pub(crate) required: T,
    pub(crate) action: Action,
    pub(crate) context: Option<Arc<dyn ExecutionContext>>,
    pub(crate) auto_remove: bool,
    fired: AtomicBool,
    dispatched: AtomicBool,
}

impl<T: FlagSet> Observer<T> {
    pub(crate) fn new(required: T, action: Action, options: ObserveOptions) -> Self {
        Self {
            id: ObserverId::new(),
            required,
            action,
            context: options.context,
            auto_remove: options.auto_remove,
            fired: AtomicBool::new(false),
            dispatched: AtomicBool::new(false),
        }
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Marks the episode as fired. Returns false if it already was.
    pub(crate) fn claim_fire(&self) -> bool {
        self.fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn reset_episode(&self) {
        self.fired.store(false, Ordering::Release);
    }

    /// Reserves the single in-flight dispatch slot for an override context.
    pub(crate) fn claim_dispatch(&self) -> bool {
        self.dispatched
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_dispatch(&self) {
        self.dispatched.store(false, Ordering::Release);
    }
}

impl<T: fmt::Debug> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.id)
            .field("required", &self.required)
            .field("action", &self.action.label())
            .field("context", &self.context.as_ref().map(|c| c.name().to_string()))
            .field("auto_remove", &self.auto_remove)
            .field("fired", &self.fired.load(Ordering::Relaxed))
            .finish()
    }
}

/// Insertion-ordered observer list. Owns the only strong references.
#[derive(Debug)]
pub(crate) struct Registry<T> {
    observers: Vec<Arc<Observer<T>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self { observers: Vec::new() }
    }
}

impl<T> Registry<T> {
    pub(crate) fn insert(&mut self, observer: Arc<Observer<T>>) {
        self.observers.push(observer);
    }

    pub(crate) fn remove(&mut self, id: ObserverId) -> Option<Arc<Observer<T>>> {
        let idx = self.observers.iter().position(|o| o.id == id)?;
        Some(self.observers.remove(idx))
    }

    pub(crate) fn contains(&self, id: ObserverId) -> bool {
        self.observers.iter().any(|o| o.id == id)
    }

    /// Shallow copy for iteration outside the lock.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Observer<T>>> {
        self.observers.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn clear(&mut self) -> Vec<Arc<Observer<T>>> {
        std::mem::take(&mut self.observers)
    }
}
