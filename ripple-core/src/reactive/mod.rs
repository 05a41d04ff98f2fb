//! Reactive Primitives
//!
//! This module implements the core reactive system: observables, computed
//! cells, transactions and reactions, all hanging off an explicit
//! [`Runtime`].
//!
//! # Concepts
//!
//! ## Observables
//!
//! An observable is a container for mutable state. When it is read while a
//! computed cell or reaction is evaluating, the read is recorded. When its
//! value changes, everything that read it is invalidated.
//!
//! ## Computed Cells
//!
//! A computed cell is a derived value that caches its result. It re-evaluates
//! only when one of its dependencies changed, and only when it is read.
//!
//! ## Transactions
//!
//! A transaction groups writes so that dependents hear about them once, when
//! the outermost transaction commits.
//!
//! ## Reactions
//!
//! A reaction is a side-effecting computation that runs whenever its
//! dependencies change. Reactions are used to synchronize reactive state with
//! external systems, such as re-rendering a view or logging.
//!
//! # Implementation Notes
//!
//! The runtime owns a stack of tracking frames to detect dependencies
//! automatically. When a cell is read, the read is attached to the innermost
//! frame; the frame's owner subscribes to exactly that set once it finishes.
//!
//! Invalidation is pushed eagerly through the graph, recomputation is pulled
//! lazily on read.

mod computed;
mod context;
mod observable;
mod reaction;
mod runtime;
mod scheduler;
mod transaction;

pub use computed::Computed;
pub use observable::Observable;
pub use reaction::Reaction;
pub(crate) use runtime::Reactive;
pub use runtime::{Runtime, ScheduleHook};
pub use scheduler::SchedulerStats;
pub use transaction::Transaction;
