//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects observables, computed
//! cells and reactions. It owns the dependency graph, the dependency context,
//! the transaction state and the scheduler queue.
//!
//! # How It Works
//!
//! 1. When a cell is created, it registers a node with the runtime.
//!
//! 2. When a computed cell or reaction reads a cell, the dependency context
//!    records the read. The runtime turns the recorded reads into edges once
//!    the evaluation succeeds.
//!
//! 3. When an observable's value changes, the runtime:
//!    a. Marks its direct dependents dirty
//!    b. Marks everything further downstream maybe dirty
//!    c. Queues reactions in the enclosing transaction
//!    d. Leaves computed cells lazy - they recompute on next access
//!
//! # Ownership
//!
//! There is no global runtime. Callers create one, keep it, and pass it (or
//! cells created from it) to whoever needs it. Cloning a `Runtime` clones the
//! handle, not the engine.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard, RwLock};

use super::computed::Computed;
use super::context::DependencyContext;
use super::observable::Observable;
use super::reaction::{Reaction, ReactionKind};
use super::scheduler::SchedulerState;
use super::transaction::{Transaction, TransactionState};
use crate::config::RuntimeConfig;
use crate::error::{ReactiveError, Result};
use crate::graph::{DirtyState, Graph, NodeId, NodeKind};

/// A node the runtime can bring up to date without knowing its value type.
///
/// Implemented by computed cells and reactions.
pub(crate) trait Reactive: Send + Sync {
    /// Re-evaluate. Returns `true` if the node's output changed
    /// (for reactions: if the reaction ran).
    fn update(&self) -> Result<bool>;
}

/// Host callback invoked when reactions are queued in deferred mode.
pub type ScheduleHook = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) graph: Mutex<Graph>,
    pub(crate) context: DependencyContext,
    pub(crate) transaction: Mutex<TransactionState>,
    pub(crate) scheduler: Mutex<SchedulerState>,
    pub(crate) on_schedule: RwLock<Option<ScheduleHook>>,
}

/// Handle to a reactive runtime.
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.create_observable(0);
/// let doubled = rt.create_computed({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// count.set(5).unwrap();
/// assert_eq!(doubled.get().unwrap(), 10);
/// ```
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::from_valid_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                graph: Mutex::new(Graph::new()),
                context: DependencyContext::new(),
                transaction: Mutex::new(TransactionState::default()),
                scheduler: Mutex::new(SchedulerState::default()),
                on_schedule: RwLock::new(None),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RuntimeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RuntimeInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn graph(&self) -> MutexGuard<'_, Graph> {
        self.inner.graph.lock()
    }

    pub(crate) fn context(&self) -> &DependencyContext {
        &self.inner.context
    }

    // ------------------------------------------------------------------
    // Factories
    // ------------------------------------------------------------------

    /// Create an observable cell holding `initial`.
    pub fn create_observable<T>(&self, initial: T) -> Observable<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        Observable::new(self, initial)
    }

    /// Create a computed cell from an infallible derivation.
    pub fn create_computed<T, F>(&self, derive: F) -> Computed<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Computed::new(self, move || Ok(derive()))
    }

    /// Create a computed cell whose derivation may fail, e.g. because it
    /// reads other computed cells with `?`.
    pub fn create_try_computed<T, F>(&self, derive: F) -> Computed<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Computed::new(self, derive)
    }

    /// Create a reaction. The effect runs once immediately to establish its
    /// dependencies, then again whenever one of them changes.
    pub fn create_reaction<F>(&self, effect: F) -> Result<Reaction>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.create_named_reaction("reaction", move || {
            effect();
            Ok(())
        })
    }

    /// Create a reaction whose effect may fail.
    pub fn create_try_reaction<F>(&self, effect: F) -> Result<Reaction>
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.create_named_reaction("reaction", effect)
    }

    /// Create a reaction with a name used in logs.
    pub fn create_named_reaction<F>(&self, name: impl Into<String>, effect: F) -> Result<Reaction>
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let reaction = Reaction::register(self, name.into(), ReactionKind::Effect(Box::new(effect)));
        match self.run_in_transaction(|| reaction.run()) {
            Ok(Ok(_)) => Ok(reaction),
            Ok(Err(err)) | Err(err) => {
                reaction.dispose();
                Err(err)
            }
        }
    }

    /// Create a reaction driven by the host.
    ///
    /// Nothing runs on creation. The host calls [`Reaction::track`] to record
    /// dependencies (typically around a render); when one of them changes,
    /// `on_invalidate` is called untracked and the subscriptions stay in
    /// place until the host tracks again.
    pub fn create_invalidation_reaction<F>(&self, name: impl Into<String>, on_invalidate: F) -> Reaction
    where
        F: Fn() + Send + Sync + 'static,
    {
        Reaction::register(self, name.into(), ReactionKind::Invalidate(Box::new(on_invalidate)))
    }

    /// Run `observer`, subscribe to everything it read, and run it again on
    /// every change of those values.
    pub fn observe_once<F>(&self, observer: F) -> Result<Reaction>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.create_named_reaction("observe_once", move || {
            observer();
            Ok(())
        })
    }

    /// Watch the value produced by `data` and call `effect` with it whenever
    /// it changes. Only `data` is tracked; `effect` runs untracked and is not
    /// called for the initial value.
    pub fn create_watch<T, D, E>(&self, data: D, effect: E) -> Result<Reaction>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        D: Fn() -> T + Send + Sync + 'static,
        E: Fn(&T) + Send + Sync + 'static,
    {
        let runtime = self.downgrade();
        let last: Mutex<Option<T>> = Mutex::new(None);

        self.create_named_reaction("watch", move || {
            let value = data();
            let changed = {
                let mut last = last.lock();
                let changed = last.as_ref().is_some_and(|previous| *previous != value);
                *last = Some(value.clone());
                changed
            };
            if changed {
                match runtime.upgrade() {
                    Some(inner) => Runtime::from_inner(inner).untracked(|| effect(&value)),
                    None => effect(&value),
                }
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Open a transaction. Notifications are held back until the outermost
    /// transaction commits.
    pub fn begin_transaction(&self) -> Transaction<'_> {
        Transaction::begin(self)
    }

    /// Run `f` inside a transaction and commit it.
    ///
    /// Returns the closure's output, or the first error raised while
    /// delivering notifications at commit.
    pub fn run_in_transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        let transaction = self.begin_transaction();
        let output = f();
        transaction.commit()?;
        Ok(output)
    }

    /// Check if a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.transaction_depth() > 0
    }

    pub fn transaction_depth(&self) -> usize {
        self.inner.transaction.lock().depth()
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Run `f` without recording any reads.
    pub fn untracked<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _frame = self.context().enter_untracked();
        f()
    }

    /// Check if reads are currently being recorded.
    pub fn is_tracking(&self) -> bool {
        self.context().is_tracking()
    }

    /// Number of live nodes (observables, computed cells, reactions).
    pub fn node_count(&self) -> usize {
        self.graph().node_count()
    }

    /// Number of dependency edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.graph().edge_count()
    }

    // ------------------------------------------------------------------
    // Propagation
    // ------------------------------------------------------------------

    /// Record that observable `source` changed.
    ///
    /// Dependents are marked immediately so reads inside the transaction
    /// never see stale derived values; delivery waits for the commit.
    pub(crate) fn notify_changed(&self, source: NodeId) {
        let affected = self.graph().mark_changed(source);
        if affected.is_empty() {
            return;
        }
        tracing::trace!(node = %source, affected = affected.len(), "observable changed");
        self.inner.transaction.lock().enqueue(affected);
    }

    /// Bring `id` up to date.
    ///
    /// Clean nodes are left alone. Dirty nodes re-evaluate. Maybe-dirty nodes
    /// first refresh their computed dependencies and re-evaluate only if one
    /// of them changed value or failed. Returns `true` if the node
    /// re-evaluated and its output changed.
    pub(crate) fn refresh(&self, id: NodeId) -> Result<bool> {
        let (kind, state) = {
            let graph = self.graph();
            match (graph.kind(id), graph.state(id)) {
                (Some(kind), Some(state)) => (kind, state),
                _ => return Ok(false),
            }
        };
        if kind == NodeKind::Observable || state == DirtyState::Clean {
            return Ok(false);
        }

        let evaluation = self.context().begin_evaluation(id)?;
        let result = self.refresh_stale(id, state);
        if evaluation.finish() {
            self.graph().mark_dirty(id);
            return Err(ReactiveError::CyclicDependency { node: id });
        }
        result
    }

    fn refresh_stale(&self, id: NodeId, state: DirtyState) -> Result<bool> {
        if state == DirtyState::MaybeDirty {
            let dependencies: Vec<NodeId> = match self.graph().get_node(id) {
                Some(node) => node.dependencies().iter().copied().collect(),
                None => return Ok(false),
            };

            for dependency in dependencies {
                if self.graph().kind(dependency) == Some(NodeKind::Computed) {
                    if let Err(err) = self.refresh(dependency) {
                        if self.context().is_poisoned(id) {
                            return Err(err);
                        }
                        // Let the node's own code see the failure.
                        tracing::trace!(node = %id, dependency = %dependency, error = %err, "dependency failed");
                        self.graph().mark_dirty(id);
                    }
                }
                if self.graph().state(id) == Some(DirtyState::Dirty) {
                    break;
                }
            }

            let settled = {
                let mut graph = self.graph();
                let settled = graph.state(id) != Some(DirtyState::Dirty);
                if settled {
                    graph.mark_clean(id);
                }
                settled
            };
            if settled {
                return Ok(false);
            }
        }

        let reactive = self.graph().reactive(id);
        match reactive {
            Some(reactive) => reactive.update(),
            None => Ok(false),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("node_count", &self.node_count())
            .field("transaction_depth", &self.transaction_depth())
            .finish()
    }
}
