//! Ripple Core
//!
//! This crate provides a dependency-tracking reactivity engine.
//! It implements:
//!
//! - Observable cells that can be read and written like ordinary values
//! - Automatic discovery of the reads a computation performs
//! - Memoized computed cells with lazy recomputation
//! - Transactions that batch writes into a single notification pass
//! - Reactions that re-run only when something they read changed
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Runtime, cells, reactions, transactions and the scheduler
//! - `graph`: Dependency graph of nodes and edges
//! - `config`: Runtime configuration
//! - `error`: Error types
//!
//! There is no global state. Every cell belongs to the [`Runtime`] it was
//! created from, and the host decides how that runtime is shared.
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use ripple_core::Runtime;
//!
//! let rt = Runtime::new();
//!
//! // Create an observable
//! let count = rt.create_observable(0);
//!
//! // Create a derived value
//! let doubled = rt.create_computed({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Create a reaction
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let reaction = rt.create_try_reaction({
//!     let (count, doubled, log) = (count.clone(), doubled.clone(), log.clone());
//!     move || {
//!         log.lock().unwrap().push((count.get(), doubled.get()?));
//!         Ok(())
//!     }
//! }).unwrap();
//!
//! // Update the observable; the reaction runs once per transaction
//! rt.run_in_transaction(|| count.set(5)).unwrap().unwrap();
//! assert_eq!(*log.lock().unwrap(), vec![(0, 0), (5, 10)]);
//!
//! reaction.dispose();
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{FlushMode, RuntimeConfig, WritePolicy};
pub use error::{ReactiveError, Result};
pub use graph::{DirtyState, NodeId};
pub use reactive::{Computed, Observable, Reaction, Runtime, SchedulerStats, Transaction};
