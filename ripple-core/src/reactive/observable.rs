//! Observable Cell
//!
//! An observable is the fundamental reactive primitive. It holds a value and
//! lets the runtime know who reads it.
//!
//! # How Observables Work
//!
//! 1. When an observable is read while a computed cell or reaction is
//!    evaluating, the read is recorded against that evaluation.
//!
//! 2. When an observable's value changes, its dependents are marked dirty and
//!    reactions are queued in the enclosing transaction.
//!
//! 3. Writing a value equal to the current one does nothing.
//!
//! # Write Policy
//!
//! Writes belong in a transaction. Outside one, the runtime's
//! [`WritePolicy`] decides: `AutoTransaction` wraps the single write,
//! `Strict` rejects it with [`ReactiveError::NotInTransaction`].
//!
//! Collections are expected to be replaced rather than mutated in place.
//! [`Observable::modify`] is the escape hatch for in-place mutation.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::runtime::Runtime;
use crate::config::WritePolicy;
use crate::error::{ReactiveError, Result};
use crate::graph::{Node, NodeId, NodeKind};

struct ObservableInner<T> {
    /// Unique identifier for this observable.
    id: NodeId,

    /// The current value.
    value: RwLock<T>,

    runtime: Runtime,
}

impl<T> Drop for ObservableInner<T> {
    fn drop(&mut self) {
        let removed = self.runtime.graph().remove_node(self.id);
        drop(removed);
    }
}

/// A reactive cell holding a value of type T.
///
/// Cloning an observable clones the handle; all clones share the value.
/// The cell is unlinked from the graph when the last handle is dropped.
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.create_observable(0);
///
/// count.set(5).unwrap();
/// assert_eq!(count.get(), 5);
/// ```
pub struct Observable<T> {
    inner: Arc<ObservableInner<T>>,
}

impl<T> Observable<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new observable with the given initial value.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        let id = NodeId::new();
        runtime.graph().add_node(Node::new(id, NodeKind::Observable));

        Self {
            inner: Arc::new(ObservableInner {
                id,
                value: RwLock::new(value),
                runtime: runtime.clone(),
            }),
        }
    }

    /// Get the observable's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value.
    ///
    /// If called while a computed cell or reaction is evaluating, this also
    /// records the read so the evaluation depends on this observable.
    pub fn get(&self) -> T {
        self.inner.runtime.context().track(self.inner.id);
        self.inner.value.read().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Set a new value and notify dependents.
    ///
    /// No-op if `value` equals the current value.
    pub fn set(&self, value: T) -> Result<()> {
        self.write(move |current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.get_untracked());
        self.set(next)
    }

    /// Mutate the value in place.
    ///
    /// Dependents are notified if the value differs from what it was before
    /// `f` ran. `f` runs under the cell's write lock and must not touch this
    /// observable.
    pub fn modify<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut T),
    {
        self.write(move |current| {
            let before = current.clone();
            f(current);
            *current != before
        })
    }

    /// Notify dependents without changing the value.
    ///
    /// For values whose interior changed in a way `PartialEq` cannot see.
    pub fn mark_changed(&self) -> Result<()> {
        self.write(|_| true)
    }

    /// Apply `mutate` under the write policy. `mutate` reports whether the
    /// value changed.
    fn write<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut T) -> bool,
    {
        let runtime = &self.inner.runtime;
        if !runtime.in_transaction() {
            return match runtime.config().write_policy {
                WritePolicy::Strict => Err(ReactiveError::NotInTransaction { node: self.inner.id }),
                WritePolicy::AutoTransaction => runtime.run_in_transaction(|| self.apply(mutate)),
            };
        }
        self.apply(mutate);
        Ok(())
    }

    fn apply<F>(&self, mutate: F)
    where
        F: FnOnce(&mut T) -> bool,
    {
        let changed = {
            let mut guard = self.inner.value.write();
            mutate(&mut guard)
        };
        if changed {
            self.inner.runtime.notify_changed(self.inner.id);
        }
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .runtime
            .graph()
            .get_node(self.inner.id)
            .map_or(0, |node| node.dependents().len())
    }
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Observable<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
