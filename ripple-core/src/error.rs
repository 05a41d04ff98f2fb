//! Error types for ripple-core.

use thiserror::Error;

use crate::graph::NodeId;

/// Result type for ripple-core operations.
pub type Result<T> = std::result::Result<T, ReactiveError>;

/// Errors raised by the reactive engine.
///
/// Every error aborts only the operation that raised it. Dependency edges
/// established before the failure stay valid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// An observable was written outside a transaction under the strict
    /// write policy.
    #[error("observable {node} written outside a transaction")]
    NotInTransaction { node: NodeId },

    /// A computed cell's derivation re-entered its own evaluation.
    #[error("cyclic dependency detected at computed {node}")]
    CyclicDependency { node: NodeId },

    /// Reactions kept writing to their own inputs past the pass limit.
    #[error("reactions did not settle after {passes} flush passes")]
    ReactionLoop { passes: usize },

    /// A disposed reaction or computed cell was used.
    #[error("{node} used after dispose")]
    UseAfterDispose { node: NodeId },

    /// Runtime configuration rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for ReactiveError {
    fn from(err: serde_json::Error) -> Self {
        ReactiveError::InvalidConfig(err.to_string())
    }
}
