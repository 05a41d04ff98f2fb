//! Dependency Graph
//!
//! Bookkeeping for who reads whom. Each runtime owns one [`Graph`].
//!
//! - Nodes stand for observables, computed cells and reactions
//! - An edge from B to A means A read B during its last successful evaluation
//!   or a failed one since
//!
//! When an observable changes, the graph walks its dependents and records how
//! stale each one is. Computed cells catch up lazily when read; reactions are
//! handed to the scheduler.
//!
//! Edges live here rather than in the cells. Disposal can then unlink both
//! directions in one place, and cells never point at each other. Every node
//! stores both directions so traversal is cheap either way.

mod node;
mod store;

pub use node::{DirtyState, Node, NodeId, NodeKind};
pub(crate) use node::Slot;
pub use store::{EdgeDiff, Graph};
