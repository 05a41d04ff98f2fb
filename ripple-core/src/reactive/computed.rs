//! Computed Cell
//!
//! A computed cell is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computed Cells Work
//!
//! 1. On first access, the cell runs its derivation and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns the cache.
//!
//! 3. When an observable it reads changes, the cell is marked "dirty". When
//!    something further upstream changes, it is marked "maybe dirty".
//!
//! 4. On next access, a maybe-dirty cell first brings its computed inputs up
//!    to date. It only re-evaluates if one of them produced a new value.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - An observable changes
//! - 10 computed cells depend on it
//! - Only the cells actually read will recompute
//! - Cells that are never read stay dirty (no wasted work)
//!
//! # Failure
//!
//! A derivation that fails leaves the cell dirty with no cached value. It
//! keeps its previous dependencies and also subscribes to whatever the failed
//! attempt read. A derivation that reaches its own cell keeps its dependency
//! set exactly as it was.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::runtime::{Reactive, Runtime};
use crate::error::{ReactiveError, Result};
use crate::graph::{DirtyState, Node, NodeId, NodeKind, Slot};

type Derive<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

struct ComputedInner<T> {
    /// Unique identifier for this cell.
    id: NodeId,

    /// The derivation function.
    derive: Derive<T>,

    /// The cached value (None if never computed).
    value: RwLock<Option<T>>,

    disposed: AtomicBool,

    /// Number of times the derivation ran.
    evaluations: AtomicUsize,

    runtime: Runtime,
}

impl<T> Reactive for ComputedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn update(&self) -> Result<bool> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ReactiveError::UseAfterDispose { node: self.id });
        }
        let runtime = &self.runtime;

        // Run the derivation inside its own tracking frame
        let frame = runtime.context().enter(self.id);
        let result = (self.derive)();
        let reads = frame.finish();
        self.evaluations.fetch_add(1, Ordering::Relaxed);

        if runtime.context().is_poisoned(self.id) {
            runtime.graph().mark_dirty(self.id);
            return Err(ReactiveError::CyclicDependency { node: self.id });
        }

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                // Recovery has to count as a change for dependents.
                self.value.write().take();

                let mut graph = runtime.graph();
                graph.merge_dependencies(self.id, &reads);
                graph.mark_dirty(self.id);
                graph.mark_dependents_dirty(self.id);
                tracing::debug!(node = %self.id, error = %err, "computed failed");
                return Err(err);
            }
        };

        let changed = {
            let mut cache = self.value.write();
            if cache.as_ref() == Some(&value) {
                false
            } else {
                *cache = Some(value);
                true
            }
        };

        {
            let mut graph = runtime.graph();
            graph.replace_dependencies(self.id, &reads);
            graph.mark_clean(self.id);
            if changed {
                graph.mark_dependents_dirty(self.id);
            }
        }

        tracing::debug!(node = %self.id, changed, dependencies = reads.len(), "computed evaluated");
        Ok(changed)
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        if !self.disposed.load(Ordering::SeqCst) {
            let removed = self.runtime.graph().remove_node(self.id);
            drop(removed);
        }
    }
}

/// A cached derived value that recomputes only when its inputs change.
///
/// # Type Parameters
///
/// - `T`: The type of the derived value. The `PartialEq` bound lets the cell
///   tell dependents apart from "recomputed, same value" and "changed".
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let todos = rt.create_observable(vec!["learn".to_string()]);
/// let count = rt.create_computed({
///     let todos = todos.clone();
///     move || todos.get().len()
/// });
///
/// assert_eq!(count.get().unwrap(), 1);
/// ```
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new computed cell with the given derivation.
    ///
    /// The derivation is not run immediately. It runs on first access.
    pub fn new<F>(runtime: &Runtime, derive: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        let id = NodeId::new();
        let inner = Arc::new(ComputedInner {
            id,
            derive: Box::new(derive),
            value: RwLock::new(None),
            disposed: AtomicBool::new(false),
            evaluations: AtomicUsize::new(0),
            runtime: runtime.clone(),
        });

        let weak: Weak<dyn Reactive> = Arc::downgrade(&inner) as Weak<dyn Reactive>;
        runtime
            .graph()
            .add_node(Node::new(id, NodeKind::Computed).with_slot(Slot::Weak(weak)));

        Self { inner }
    }

    /// Get the cell's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// If called while another computed cell or reaction is evaluating, this
    /// also records the read.
    pub fn get(&self) -> Result<T> {
        let id = self.inner.id;
        if self.is_disposed() {
            return Err(ReactiveError::UseAfterDispose { node: id });
        }

        let runtime = &self.inner.runtime;
        let refreshed = runtime.refresh(id);
        // Recorded even on failure, so the reader hears about recovery.
        runtime.context().track(id);
        refreshed?;

        // A clean cell always holds a value; an empty cache can only be seen
        // from inside the cell's own first evaluation.
        self.inner
            .value
            .read()
            .clone()
            .ok_or(ReactiveError::CyclicDependency { node: id })
    }

    /// Get the current value without recording the read.
    pub fn get_untracked(&self) -> Result<T> {
        let _frame = self.inner.runtime.context().enter_untracked();
        self.get()
    }

    /// Get the current dirty state.
    pub fn state(&self) -> DirtyState {
        self.inner
            .runtime
            .graph()
            .state(self.inner.id)
            .unwrap_or(DirtyState::Dirty)
    }

    /// Check if the cell has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }

    /// Number of times the derivation has run.
    pub fn evaluation_count(&self) -> usize {
        self.inner.evaluations.load(Ordering::Relaxed)
    }

    /// Number of cells this one currently depends on.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .runtime
            .graph()
            .get_node(self.inner.id)
            .map_or(0, |node| node.dependencies().len())
    }

    /// Get the number of dependents.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .runtime
            .graph()
            .get_node(self.inner.id)
            .map_or(0, |node| node.dependents().len())
    }

    /// Unlink the cell from the graph and drop its cache.
    ///
    /// Idempotent. Later reads fail with [`ReactiveError::UseAfterDispose`].
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let removed = self.inner.runtime.graph().remove_node(self.inner.id);
        drop(removed);
        self.inner.value.write().take();
        tracing::debug!(node = %self.inner.id, "computed disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
