//! Dependency Context
//!
//! The dependency context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a cell is read, the read
//! is recorded against the innermost running computation.
//!
//! # Implementation
//!
//! Each runtime owns one context holding a stack of frames. When a computed
//! cell or reaction evaluates, it pushes a frame; when the evaluation
//! completes, the frame is popped and its reads become the new dependency set.
//!
//! A second stack records which computed cells are being brought up to date.
//! Finding a cell already on that stack means its derivation reached itself:
//! every evaluation from that point up is poisoned and will fail with
//! [`ReactiveError::CyclicDependency`].

use indexmap::IndexSet;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::{ReactiveError, Result};
use crate::graph::NodeId;

/// An entry in the tracking stack.
#[derive(Debug)]
struct Frame {
    /// The computation that owns this frame. `None` for untracked scopes.
    owner: Option<NodeId>,
    /// Cells read during this frame, in first-read order.
    reads: IndexSet<NodeId>,
}

#[derive(Debug, Clone, Copy)]
struct Evaluation {
    node: NodeId,
    poisoned: bool,
}

/// Per-runtime stack of tracking frames.
#[derive(Debug, Default)]
pub(crate) struct DependencyContext {
    frames: Mutex<Vec<Frame>>,
    evaluating: Mutex<SmallVec<[Evaluation; 8]>>,
}

impl DependencyContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enter a new tracking frame for the given computation.
    ///
    /// While this frame is innermost, every read is attributed to `owner`.
    /// The frame is popped when the returned guard is finished or dropped.
    pub(crate) fn enter(&self, owner: NodeId) -> FrameGuard<'_> {
        self.push(Some(owner))
    }

    /// Enter a frame that swallows reads.
    pub(crate) fn enter_untracked(&self) -> FrameGuard<'_> {
        self.push(None)
    }

    fn push(&self, owner: Option<NodeId>) -> FrameGuard<'_> {
        self.frames.lock().push(Frame {
            owner,
            reads: IndexSet::new(),
        });
        FrameGuard {
            context: self,
            owner,
            finished: false,
        }
    }

    fn pop(&self, owner: Option<NodeId>) -> IndexSet<NodeId> {
        let popped = self.frames.lock().pop();
        match popped {
            Some(frame) => {
                // Catch mismatched enter/exit pairs.
                debug_assert_eq!(
                    frame.owner, owner,
                    "DependencyContext mismatch: expected {:?}, got {:?}",
                    owner, frame.owner
                );
                frame.reads
            }
            None => IndexSet::new(),
        }
    }

    /// Check if reads are currently being recorded.
    pub(crate) fn is_tracking(&self) -> bool {
        self.current_owner().is_some()
    }

    /// Get the computation owning the innermost frame, if any.
    pub(crate) fn current_owner(&self) -> Option<NodeId> {
        self.frames.lock().last().and_then(|frame| frame.owner)
    }

    /// Record a read of `node` in the innermost frame.
    ///
    /// Repeated reads are no-ops. A computation never depends on itself.
    pub(crate) fn track(&self, node: NodeId) {
        let mut frames = self.frames.lock();
        if let Some(frame) = frames.last_mut() {
            if frame.owner.is_some_and(|owner| owner != node) {
                frame.reads.insert(node);
            }
        }
    }

    /// Mark `node` as being brought up to date.
    ///
    /// Fails with [`ReactiveError::CyclicDependency`] if it already is.
    pub(crate) fn begin_evaluation(&self, node: NodeId) -> Result<EvaluationGuard<'_>> {
        let mut evaluating = self.evaluating.lock();
        if let Some(pos) = evaluating.iter().position(|entry| entry.node == node) {
            for entry in evaluating[pos..].iter_mut() {
                entry.poisoned = true;
            }
            tracing::debug!(node = %node, "re-entrant evaluation");
            return Err(ReactiveError::CyclicDependency { node });
        }
        evaluating.push(Evaluation {
            node,
            poisoned: false,
        });
        Ok(EvaluationGuard {
            context: self,
            node,
            finished: false,
        })
    }

    /// Check whether a cycle has passed through the evaluation of `node`.
    pub(crate) fn is_poisoned(&self, node: NodeId) -> bool {
        self.evaluating
            .lock()
            .iter()
            .any(|entry| entry.node == node && entry.poisoned)
    }

    fn end_evaluation(&self, node: NodeId) -> bool {
        let mut evaluating = self.evaluating.lock();
        match evaluating.iter().rposition(|entry| entry.node == node) {
            Some(pos) => evaluating.remove(pos).poisoned,
            None => false,
        }
    }
}

/// Guard that pops a tracking frame when dropped.
///
/// This keeps the stack balanced even if the computation panics.
pub(crate) struct FrameGuard<'a> {
    context: &'a DependencyContext,
    owner: Option<NodeId>,
    finished: bool,
}

impl FrameGuard<'_> {
    /// Pop the frame and return the cells read while it was active.
    pub(crate) fn finish(mut self) -> IndexSet<NodeId> {
        self.finished = true;
        self.context.pop(self.owner)
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.context.pop(self.owner);
        }
    }
}

/// Guard for an entry on the evaluation stack.
pub(crate) struct EvaluationGuard<'a> {
    context: &'a DependencyContext,
    node: NodeId,
    finished: bool,
}

impl EvaluationGuard<'_> {
    /// Leave the evaluation. Returns `true` if a cycle passed through it.
    pub(crate) fn finish(mut self) -> bool {
        self.finished = true;
        self.context.end_evaluation(self.node)
    }
}

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.context.end_evaluation(self.node);
        }
    }
}
