//! Actions performed when an observer fires.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

type ActionFn = dyn Fn(Option<&(dyn Any + Send + Sync)>) + Send + Sync;

/// A callable capability with identity.
///
/// Clones share identity: two actions compare equal only when they were
/// cloned from the same original, regardless of label.
#[derive(Clone)]
pub struct Action {
    label: Arc<str>,
    func: Arc<ActionFn>,
}

impl Action {
    /// Wrap a closure that ignores the perform argument.
    pub fn new<F>(label: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_argument(label, move |_| f())
    }

    /// Wrap a closure that receives the optional perform argument.
    pub fn with_argument<F>(label: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(Option<&(dyn Any + Send + Sync)>) + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            func: Arc::new(f),
        }
    }

    /// Invoke the action.
    pub fn perform(&self, argument: Option<&(dyn Any + Send + Sync)>) {
        (self.func)(argument);
    }

    /// Debug label supplied at construction.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.func).cast::<()>(),
            Arc::as_ptr(&other.func).cast::<()>(),
        )
    }
}

impl Eq for Action {}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("label", &self.label).finish_non_exhaustive()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}
