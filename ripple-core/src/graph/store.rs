//! Graph Store
//!
//! The store owns every node of a runtime's dependency graph and keeps the
//! forward (dependencies) and reverse (dependents) edges consistent.
//!
//! # Algorithm
//!
//! Invalidation is push-based:
//!
//! 1. When an observable changes, its direct dependents are marked "dirty"
//! 2. Everything reachable beyond them is marked "maybe dirty"
//! 3. The affected node IDs are returned so reactions can be queued
//!
//! Recomputation is pull-based and lives in the runtime: a "maybe dirty" node
//! first refreshes its computed dependencies and only re-evaluates if one of
//! them produced a different value.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use indexmap::IndexSet;

use super::node::{DirtyState, Node, NodeId, NodeKind};
use crate::reactive::Reactive;

/// Outcome of replacing a node's dependency set.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EdgeDiff {
    /// Edges created because the node read something new.
    pub added: usize,
    /// Edges dropped because the node no longer reads the source.
    pub removed: usize,
}

/// All nodes of a dependency graph, indexed by ID.
#[derive(Default)]
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node. The removed node is
    /// handed back so the caller can drop it after releasing its lock:
    /// dropping an owned evaluator may drop handles that unlink themselves.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&node_id)?;

        // Remove this node from its dependencies' dependent lists
        for dep_id in node.dependencies() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.unlink_dependent(node_id);
            }
        }

        // Remove this node from its dependents' dependency lists
        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                dependent.unlink_dependency(node_id);
            }
        }

        tracing::trace!(node = %node_id, kind = ?node.kind(), "node unlinked");
        Some(node)
    }

    /// Check whether a node is still part of the graph.
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn kind(&self, node_id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&node_id).map(Node::kind)
    }

    pub fn state(&self, node_id: NodeId) -> Option<DirtyState> {
        self.nodes.get(&node_id).map(Node::state)
    }

    pub fn mark_clean(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.set_state(DirtyState::Clean);
        }
    }

    pub fn mark_dirty(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.set_state(DirtyState::Dirty);
        }
    }

    /// Evaluator registered for a computed cell or reaction, if still alive.
    pub(crate) fn reactive(&self, node_id: NodeId) -> Option<Arc<dyn Reactive>> {
        self.nodes
            .get(&node_id)
            .and_then(Node::slot)
            .and_then(|slot| slot.upgrade())
    }

    /// Add a dependency edge: `dependent` depends on `dependency`.
    ///
    /// Edges to nodes that are no longer in the graph are ignored.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if !self.nodes.contains_key(&dependency) || !self.nodes.contains_key(&dependent) {
            return;
        }
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.link_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.link_dependency(dependency);
        }
    }

    /// Replace the dependency set of `node_id` with `reads`.
    ///
    /// Unsubscribes from sources no longer read and subscribes to new ones.
    /// The stored order follows `reads`.
    pub fn replace_dependencies(&mut self, node_id: NodeId, reads: &IndexSet<NodeId>) -> EdgeDiff {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return EdgeDiff::default();
        };
        let previous = node.take_dependencies();
        let mut diff = EdgeDiff::default();

        for stale in previous.iter().filter(|dep| !reads.contains(*dep)) {
            if let Some(source) = self.nodes.get_mut(stale) {
                source.unlink_dependent(node_id);
            }
            diff.removed += 1;
        }

        // Relink in read order, skipping sources that are gone.
        for &dep in reads {
            if dep == node_id || !self.nodes.contains_key(&dep) {
                continue;
            }
            if !previous.contains(&dep) {
                diff.added += 1;
            }
            self.add_edge(dep, node_id);
        }

        if diff.added > 0 || diff.removed > 0 {
            tracing::trace!(
                node = %node_id,
                added = diff.added,
                removed = diff.removed,
                "dependencies updated"
            );
        }
        diff
    }

    /// Add edges from every node in `reads` to `node_id`, keeping the
    /// existing ones.
    ///
    /// Used after a failed evaluation: whatever the attempt read can fix it.
    pub fn merge_dependencies(&mut self, node_id: NodeId, reads: &IndexSet<NodeId>) -> EdgeDiff {
        let mut diff = EdgeDiff::default();
        let Some(node) = self.nodes.get(&node_id) else {
            return diff;
        };
        let fresh: Vec<NodeId> = reads
            .iter()
            .copied()
            .filter(|dep| *dep != node_id && !node.dependencies().contains(dep))
            .filter(|dep| self.nodes.contains_key(dep))
            .collect();

        for dep in fresh {
            self.add_edge(dep, node_id);
            diff.added += 1;
        }
        if diff.added > 0 {
            tracing::trace!(node = %node_id, added = diff.added, "dependencies merged");
        }
        diff
    }

    /// Mark a source node as changed and propagate dirty flags.
    ///
    /// Direct dependents become dirty, everything further downstream becomes
    /// maybe dirty. Returns every affected node in breadth-first order.
    pub fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        let mut affected = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        let direct: Vec<NodeId> = match self.nodes.get(&source_id) {
            Some(source) => source.dependents().iter().copied().collect(),
            None => return affected,
        };

        for node_id in direct {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.set_state(DirtyState::Dirty);
                visited.insert(node_id);
                affected.push(node_id);
                queue.push_back(node_id);
            }
        }

        // BFS to propagate maybe-dirty status
        while let Some(node_id) = queue.pop_front() {
            let dependents: Vec<NodeId> = match self.nodes.get(&node_id) {
                Some(node) => node.dependents().iter().copied().collect(),
                None => continue,
            };

            for dependent_id in dependents {
                if !visited.insert(dependent_id) {
                    continue;
                }
                if let Some(dependent) = self.nodes.get_mut(&dependent_id) {
                    dependent.escalate(DirtyState::MaybeDirty);
                    affected.push(dependent_id);
                    queue.push_back(dependent_id);
                }
            }
        }

        affected
    }

    /// Upgrade the maybe-dirty dependents of `node_id` to dirty.
    ///
    /// Called after a computed cell re-evaluated to a different value.
    pub fn mark_dependents_dirty(&mut self, node_id: NodeId) {
        let dependents: Vec<NodeId> = match self.nodes.get(&node_id) {
            Some(node) => node.dependents().iter().copied().collect(),
            None => return,
        };
        for dependent_id in dependents {
            if let Some(dependent) = self.nodes.get_mut(&dependent_id) {
                if dependent.state() == DirtyState::MaybeDirty {
                    dependent.set_state(DirtyState::Dirty);
                }
            }
        }
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get the total number of edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|node| node.dependencies().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(graph: &mut Graph, kind: NodeKind) -> NodeId {
        graph.add_node(Node::new(NodeId::new(), kind))
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut graph = Graph::new();

        let id1 = add(&mut graph, NodeKind::Observable);
        let id2 = add(&mut graph, NodeKind::Computed);

        assert_eq!(graph.node_count(), 2);

        assert!(graph.remove_node(id1).is_some());
        assert_eq!(graph.node_count(), 1);
        assert!(graph.get_node(id1).is_none());
        assert!(graph.get_node(id2).is_some());
        assert!(graph.remove_node(id1).is_none());
    }

    #[test]
    fn add_and_drop_edges() {
        let mut graph = Graph::new();

        let source_id = add(&mut graph, NodeKind::Observable);
        let derived_id = add(&mut graph, NodeKind::Computed);

        graph.add_edge(source_id, derived_id);

        assert!(graph.get_node(source_id).unwrap().dependents().contains(&derived_id));
        assert!(graph.get_node(derived_id).unwrap().dependencies().contains(&source_id));

        let diff = graph.replace_dependencies(derived_id, &IndexSet::new());
        assert_eq!(diff, EdgeDiff { added: 0, removed: 1 });

        assert!(!graph.get_node(source_id).unwrap().dependents().contains(&derived_id));
        assert!(!graph.get_node(derived_id).unwrap().dependencies().contains(&source_id));
    }

    #[test]
    fn removing_a_node_unlinks_both_directions() {
        let mut graph = Graph::new();

        let source = add(&mut graph, NodeKind::Observable);
        let middle = add(&mut graph, NodeKind::Computed);
        let leaf = add(&mut graph, NodeKind::Reaction);

        graph.add_edge(source, middle);
        graph.add_edge(middle, leaf);
        assert_eq!(graph.edge_count(), 2);

        graph.remove_node(middle);

        assert!(graph.get_node(source).unwrap().dependents().is_empty());
        assert!(graph.get_node(leaf).unwrap().dependencies().is_empty());
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn replace_dependencies_diffs_edges() {
        let mut graph = Graph::new();

        let a = add(&mut graph, NodeKind::Observable);
        let b = add(&mut graph, NodeKind::Observable);
        let c = add(&mut graph, NodeKind::Observable);
        let derived = add(&mut graph, NodeKind::Computed);

        let first: IndexSet<NodeId> = [a, b].into_iter().collect();
        let diff = graph.replace_dependencies(derived, &first);
        assert_eq!(diff, EdgeDiff { added: 2, removed: 0 });

        let second: IndexSet<NodeId> = [c, a].into_iter().collect();
        let diff = graph.replace_dependencies(derived, &second);
        assert_eq!(diff, EdgeDiff { added: 1, removed: 1 });

        assert!(graph.get_node(b).unwrap().dependents().is_empty());
        let order: Vec<_> = graph.get_node(derived).unwrap().dependencies().iter().copied().collect();
        assert_eq!(order, vec![c, a]);
    }

    #[test]
    fn merge_dependencies_keeps_existing_edges() {
        let mut graph = Graph::new();

        let a = add(&mut graph, NodeKind::Observable);
        let b = add(&mut graph, NodeKind::Observable);
        let derived = add(&mut graph, NodeKind::Computed);
        graph.add_edge(a, derived);

        let reads: IndexSet<NodeId> = [b, a, derived].into_iter().collect();
        let diff = graph.merge_dependencies(derived, &reads);

        assert_eq!(diff, EdgeDiff { added: 1, removed: 0 });
        let order: Vec<_> = graph.get_node(derived).unwrap().dependencies().iter().copied().collect();
        assert_eq!(order, vec![a, b]);
        assert!(graph.get_node(b).unwrap().dependents().contains(&derived));
    }

    #[test]
    fn replace_dependencies_skips_missing_nodes() {
        let mut graph = Graph::new();

        let a = add(&mut graph, NodeKind::Observable);
        let derived = add(&mut graph, NodeKind::Computed);
        let gone = NodeId::new();

        let reads: IndexSet<NodeId> = [a, gone].into_iter().collect();
        let diff = graph.replace_dependencies(derived, &reads);

        assert_eq!(diff.added, 1);
        assert_eq!(graph.get_node(derived).unwrap().dependencies().len(), 1);
    }

    #[test]
    fn mark_changed_propagates() {
        let mut graph = Graph::new();

        // Chain: source -> derived1 -> derived2 -> reaction
        let source = add(&mut graph, NodeKind::Observable);
        let derived1 = add(&mut graph, NodeKind::Computed);
        let derived2 = add(&mut graph, NodeKind::Computed);
        let reaction = add(&mut graph, NodeKind::Reaction);

        graph.add_edge(source, derived1);
        graph.add_edge(derived1, derived2);
        graph.add_edge(derived2, reaction);

        for id in [derived1, derived2, reaction] {
            graph.mark_clean(id);
        }

        let affected = graph.mark_changed(source);

        assert_eq!(affected, vec![derived1, derived2, reaction]);
        assert_eq!(graph.state(derived1), Some(DirtyState::Dirty));
        assert_eq!(graph.state(derived2), Some(DirtyState::MaybeDirty));
        assert_eq!(graph.state(reaction), Some(DirtyState::MaybeDirty));

        graph.mark_clean(derived1);
        graph.mark_dependents_dirty(derived1);
        assert_eq!(graph.state(derived2), Some(DirtyState::Dirty));
        assert_eq!(graph.state(reaction), Some(DirtyState::MaybeDirty));
    }

    #[test]
    fn mark_changed_visits_diamonds_once() {
        let mut graph = Graph::new();

        let source = add(&mut graph, NodeKind::Observable);
        let left = add(&mut graph, NodeKind::Computed);
        let right = add(&mut graph, NodeKind::Computed);
        let sink = add(&mut graph, NodeKind::Reaction);

        graph.add_edge(source, left);
        graph.add_edge(source, right);
        graph.add_edge(left, sink);
        graph.add_edge(right, sink);

        let affected = graph.mark_changed(source);
        assert_eq!(affected.len(), 3);
        assert_eq!(affected.iter().filter(|id| **id == sink).count(), 1);
    }
}
