//! Reaction Implementation
//!
//! A reaction is a standing subscription: a side-effecting computation that
//! runs again whenever something it read changes. Reactions are how change
//! becomes visible outside the engine.
//!
//! # How Reactions Work
//!
//! 1. When created, the reaction runs its effect immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the reaction is queued in the enclosing
//!    transaction and runs when the scheduler flushes.
//!
//! 3. Every run records its reads from scratch and replaces the previous
//!    subscriptions with them.
//!
//! # Lifetime
//!
//! The runtime keeps a reaction alive until [`Reaction::dispose`] is called.
//! Dropping every `Reaction` handle does not stop it. Disposal removes all of
//! its edges; a disposed reaction never runs again.
//!
//! # Host-driven Reactions
//!
//! An invalidation reaction does not own an effect. The host records
//! dependencies with [`Reaction::track`] (for example around a render) and
//! gets an untracked `on_invalidate` callback when one of them changes.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use super::runtime::{Reactive, Runtime, RuntimeInner};
use crate::error::{ReactiveError, Result};
use crate::graph::{Node, NodeId, NodeKind, Slot};

pub(crate) type EffectFn = Box<dyn Fn() -> Result<()> + Send + Sync>;
pub(crate) type InvalidateFn = Box<dyn Fn() + Send + Sync>;

pub(crate) enum ReactionKind {
    /// Re-run the effect under tracking.
    Effect(EffectFn),
    /// Tell the host; dependencies come from `Reaction::track`.
    Invalidate(InvalidateFn),
}

struct ReactionInner {
    /// Unique identifier for this reaction.
    id: NodeId,

    name: String,

    kind: ReactionKind,

    /// Whether the reaction has been disposed.
    disposed: AtomicBool,

    /// Number of times the reaction has run.
    run_count: AtomicUsize,

    /// The runtime owns the reaction, so the back reference is weak.
    runtime: Weak<RuntimeInner>,
}

impl ReactionInner {
    fn runtime(&self) -> Option<Runtime> {
        self.runtime.upgrade().map(Runtime::from_inner)
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Record the reads of `f` as this reaction's dependencies.
    fn tracked<R>(&self, runtime: &Runtime, f: impl FnOnce() -> R) -> R {
        runtime.graph().mark_clean(self.id);

        let frame = runtime.context().enter(self.id);
        let output = f();
        let reads = frame.finish();

        // A reaction disposed mid-run must not subscribe again.
        if !self.is_disposed() {
            runtime.graph().replace_dependencies(self.id, &reads);
        }
        output
    }
}

impl Reactive for ReactionInner {
    fn update(&self) -> Result<bool> {
        if self.is_disposed() {
            return Ok(false);
        }
        let Some(runtime) = self.runtime() else {
            return Ok(false);
        };

        match &self.kind {
            ReactionKind::Effect(effect) => {
                runtime.graph().mark_clean(self.id);

                let frame = runtime.context().enter(self.id);
                let result = effect();
                let reads = frame.finish();

                if let Err(err) = result {
                    // Keep the previous subscriptions and add whatever the
                    // failed run read, so the next change retries it.
                    if !self.is_disposed() {
                        runtime.graph().merge_dependencies(self.id, &reads);
                    }
                    tracing::debug!(reaction = %self.name, node = %self.id, error = %err, "effect failed");
                    return Err(err);
                }
                if !self.is_disposed() {
                    runtime.graph().replace_dependencies(self.id, &reads);
                }
            }
            ReactionKind::Invalidate(on_invalidate) => {
                runtime.graph().mark_clean(self.id);
                let _frame = runtime.context().enter_untracked();
                on_invalidate();
            }
        }

        self.run_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(reaction = %self.name, node = %self.id, "reaction ran");
        Ok(true)
    }
}

/// Handle to a reaction.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.create_observable(0);
/// let runs = Arc::new(AtomicUsize::new(0));
///
/// let reaction = rt.create_reaction({
///     let (count, runs) = (count.clone(), runs.clone());
///     move || {
///         count.get();
///         runs.fetch_add(1, Ordering::SeqCst);
///     }
/// }).unwrap();
///
/// count.set(1).unwrap();
/// assert_eq!(runs.load(Ordering::SeqCst), 2);
///
/// reaction.dispose();
/// count.set(2).unwrap();
/// assert_eq!(runs.load(Ordering::SeqCst), 2);
/// ```
#[derive(Clone)]
pub struct Reaction {
    inner: Arc<ReactionInner>,
}

impl Reaction {
    /// Register a reaction node without running it.
    pub(crate) fn register(runtime: &Runtime, name: String, kind: ReactionKind) -> Self {
        let id = NodeId::new();
        let inner = Arc::new(ReactionInner {
            id,
            name,
            kind,
            disposed: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
            runtime: runtime.downgrade(),
        });

        let owned: Arc<dyn Reactive> = inner.clone();
        runtime
            .graph()
            .add_node(Node::new(id, NodeKind::Reaction).with_slot(Slot::Owned(owned)));
        tracing::debug!(reaction = %inner.name, node = %id, "reaction created");

        Self { inner }
    }

    /// Run the reaction now, regardless of its dirty state.
    pub(crate) fn run(&self) -> Result<bool> {
        self.inner.update()
    }

    /// Get the reaction's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Run `f` under this reaction's tracking frame, replacing its
    /// dependencies with whatever `f` reads.
    ///
    /// Fails with [`ReactiveError::UseAfterDispose`] once disposed.
    pub fn track<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        let node = self.inner.id;
        if self.is_disposed() {
            return Err(ReactiveError::UseAfterDispose { node });
        }
        let runtime = self
            .inner
            .runtime()
            .ok_or(ReactiveError::UseAfterDispose { node })?;

        Ok(self.inner.tracked(&runtime, f))
    }

    /// Dispose of the reaction.
    ///
    /// Removes it from every cell it subscribes to. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(runtime) = self.inner.runtime() {
            let removed = runtime.graph().remove_node(self.inner.id);
            drop(removed);
        }
        tracing::debug!(reaction = %self.inner.name, node = %self.inner.id, "reaction disposed");
    }

    /// Check if the reaction has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Get the number of times the reaction has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::Relaxed)
    }

    /// Get the number of cells the reaction currently subscribes to.
    pub fn dependency_count(&self) -> usize {
        self.inner.runtime().map_or(0, |runtime| {
            runtime
                .graph()
                .get_node(self.inner.id)
                .map_or(0, |node| node.dependencies().len())
        })
    }
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        (count.clone(), count)
    }

    #[test]
    fn reaction_runs_on_creation() {
        let rt = Runtime::new();
        let (runs, runs_clone) = counter();

        let reaction = rt
            .create_reaction(move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(reaction.run_count(), 1);
        reaction.dispose();
    }

    #[test]
    fn disposal_stops_reruns() {
        let rt = Runtime::new();
        let count = rt.create_observable(0);
        let (runs, runs_clone) = counter();

        let reaction = rt
            .create_reaction({
                let count = count.clone();
                move || {
                    count.get();
                    runs_clone.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        count.set(1).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        reaction.dispose();
        assert!(reaction.is_disposed());
        assert_eq!(reaction.dependency_count(), 0);
        assert_eq!(count.subscriber_count(), 0);

        count.set(2).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dependencies_are_retracked_each_run() {
        let rt = Runtime::new();
        let use_a = rt.create_observable(true);
        let a = rt.create_observable(1);
        let b = rt.create_observable(2);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let reaction = rt
            .create_reaction({
                let (use_a, a, b, seen) = (use_a.clone(), a.clone(), b.clone(), seen.clone());
                move || {
                    let value = if use_a.get() { a.get() } else { b.get() };
                    seen.lock().push(value);
                }
            })
            .unwrap();
        assert_eq!(a.subscriber_count(), 1);
        assert_eq!(b.subscriber_count(), 0);

        use_a.set(false).unwrap();
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);

        a.set(10).unwrap();
        b.set(20).unwrap();
        assert_eq!(*seen.lock(), vec![1, 2, 20]);
        reaction.dispose();
    }

    #[test]
    fn failing_effect_keeps_subscriptions() {
        let rt = Runtime::new();
        let value = rt.create_observable(0);

        let reaction = rt
            .create_try_reaction({
                let value = value.clone();
                move || {
                    if value.get() < 0 {
                        return Err(ReactiveError::InvalidConfig("negative".into()));
                    }
                    Ok(())
                }
            })
            .unwrap();

        let err = value.set(-1).unwrap_err();
        assert!(matches!(err, ReactiveError::InvalidConfig(_)));
        assert_eq!(reaction.dependency_count(), 1);

        value.set(3).unwrap();
        assert_eq!(reaction.run_count(), 2);
        reaction.dispose();
    }

    #[test]
    fn failed_run_subscribes_to_new_reads() {
        let rt = Runtime::new();
        let value = rt.create_observable(0);
        let allowance = rt.create_observable(0);

        let reaction = rt
            .create_try_reaction({
                let (value, allowance) = (value.clone(), allowance.clone());
                move || {
                    if value.get() < 0 && allowance.get() == 0 {
                        return Err(ReactiveError::InvalidConfig("negative".into()));
                    }
                    Ok(())
                }
            })
            .unwrap();
        assert_eq!(reaction.dependency_count(), 1);

        assert!(value.set(-1).is_err());
        assert_eq!(reaction.dependency_count(), 2);

        // Only the failed run ever read `allowance`
        allowance.set(1).unwrap();
        assert_eq!(reaction.run_count(), 2);
        reaction.dispose();
    }

    #[test]
    fn failing_first_run_disposes() {
        let rt = Runtime::new();
        let result = rt.create_try_reaction(|| Err(ReactiveError::InvalidConfig("no".into())));
        assert!(result.is_err());
        assert_eq!(rt.node_count(), 0);
    }

    #[test]
    fn invalidation_reaction_notifies_host() {
        let rt = Runtime::new();
        let title = rt.create_observable("a".to_string());
        let (invalidations, invalidations_clone) = counter();

        let reaction = rt.create_invalidation_reaction("render", move || {
            invalidations_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(reaction.run_count(), 0);

        let rendered = reaction.track(|| title.get()).unwrap();
        assert_eq!(rendered, "a");
        assert_eq!(reaction.dependency_count(), 1);

        title.set("b".to_string()).unwrap();
        assert_eq!(invalidations.load(Ordering::SeqCst), 1);
        // Subscriptions survive until the host tracks again
        title.set("c".to_string()).unwrap();
        assert_eq!(invalidations.load(Ordering::SeqCst), 2);

        reaction.dispose();
        assert_eq!(
            reaction.track(|| title.get()).unwrap_err(),
            ReactiveError::UseAfterDispose { node: reaction.id() }
        );
        title.set("d".to_string()).unwrap();
        assert_eq!(invalidations.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reaction_disposing_itself_does_not_resubscribe() {
        let rt = Runtime::new();
        let value = rt.create_observable(0);
        let slot: Arc<Mutex<Option<Reaction>>> = Arc::new(Mutex::new(None));

        let reaction = rt
            .create_reaction({
                let (value, slot) = (value.clone(), slot.clone());
                move || {
                    if value.get() > 0 {
                        if let Some(me) = slot.lock().take() {
                            me.dispose();
                        }
                    }
                }
            })
            .unwrap();
        *slot.lock() = Some(reaction.clone());

        value.set(1).unwrap();
        assert!(reaction.is_disposed());
        assert_eq!(value.subscriber_count(), 0);
        assert_eq!(rt.node_count(), 1);
    }
}
