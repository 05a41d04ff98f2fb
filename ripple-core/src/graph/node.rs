//! Graph Nodes
//!
//! A node is the graph's view of a cell: its identity, its staleness and its
//! edges. Values live in the cells themselves.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexSet;

use crate::reactive::Reactive;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an observable, computed cell or reaction.
///
/// IDs are unique across every runtime in the process and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Allocate a fresh ID.
    pub fn new() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Written by the host, read by everything else. Never has dependencies.
    Observable,
    /// Cached derivation. Both reads and is read.
    Computed,
    /// Side effect. Never has dependents.
    Reaction,
}

/// How stale a node is, ordered from fresh to stale.
///
/// `Dirty` means a direct input changed. `MaybeDirty` means something further
/// upstream changed and the node's computed inputs have to be checked first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DirtyState {
    Clean,
    MaybeDirty,
    Dirty,
}

/// How the graph reaches the evaluator behind a node.
///
/// Computed cells belong to their handles, so the graph only keeps a weak
/// reference. Reactions belong to the graph until they are disposed.
pub(crate) enum Slot {
    Weak(Weak<dyn Reactive>),
    Owned(Arc<dyn Reactive>),
}

impl Slot {
    pub(crate) fn upgrade(&self) -> Option<Arc<dyn Reactive>> {
        match self {
            Slot::Weak(weak) => weak.upgrade(),
            Slot::Owned(strong) => Some(Arc::clone(strong)),
        }
    }
}

/// A node in the dependency graph.
///
/// Edge sets keep insertion order: dependencies in the order they were first
/// read, dependents in the order they subscribed.
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    state: DirtyState,
    dependencies: IndexSet<NodeId>,
    dependents: IndexSet<NodeId>,
    slot: Option<Slot>,
}

impl Node {
    /// Create an unlinked node. Observables start clean; everything else
    /// starts dirty so its first read evaluates it.
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        let state = if kind == NodeKind::Observable {
            DirtyState::Clean
        } else {
            DirtyState::Dirty
        };
        Self {
            id,
            kind,
            state,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
            slot: None,
        }
    }

    pub(crate) fn with_slot(mut self, slot: Slot) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn state(&self) -> DirtyState {
        self.state
    }

    pub(crate) fn slot(&self) -> Option<&Slot> {
        self.slot.as_ref()
    }

    /// Overwrite the state.
    pub fn set_state(&mut self, state: DirtyState) {
        self.state = state;
    }

    /// Raise the state to at least `state`. Never makes a node fresher.
    pub fn escalate(&mut self, state: DirtyState) {
        self.state = self.state.max(state);
    }

    pub fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    pub(crate) fn link_dependency(&mut self, source: NodeId) {
        self.dependencies.insert(source);
    }

    pub(crate) fn unlink_dependency(&mut self, source: NodeId) {
        self.dependencies.shift_remove(&source);
    }

    pub(crate) fn link_dependent(&mut self, reader: NodeId) {
        self.dependents.insert(reader);
    }

    pub(crate) fn unlink_dependent(&mut self, reader: NodeId) {
        self.dependents.shift_remove(&reader);
    }

    /// Detach the dependency set, leaving the node with none.
    pub(crate) fn take_dependencies(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.dependencies)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .field("has_slot", &self.slot.is_some())
            .finish()
    }
}
