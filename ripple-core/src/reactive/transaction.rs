//! Transactions
//!
//! A transaction batches writes so that a multi-field mutation produces a
//! single notification pass instead of one per write.
//!
//! Transactions nest. Writes at any depth mark dependents dirty immediately
//! but queue their notifications; only the outermost commit hands the
//! pending set to the scheduler.

use indexmap::IndexSet;

use super::runtime::Runtime;
use crate::error::Result;
use crate::graph::NodeId;

/// Depth counter and pending notifications of a runtime.
#[derive(Debug, Default)]
pub(crate) struct TransactionState {
    depth: usize,
    pending: IndexSet<NodeId>,
}

impl TransactionState {
    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn begin(&mut self) -> usize {
        if self.depth == 0 {
            self.pending.clear();
        }
        self.depth += 1;
        self.depth
    }

    pub(crate) fn enqueue(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        self.pending.extend(nodes);
    }

    /// Leave one level. Returns the pending set when the outermost
    /// transaction closes.
    pub(crate) fn commit(&mut self) -> Option<IndexSet<NodeId>> {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn pending_ids(&self) -> Vec<NodeId> {
        self.pending.iter().copied().collect()
    }
}

/// An open transaction.
///
/// Commit it explicitly to observe delivery errors. Dropping an uncommitted
/// transaction commits it and logs any error.
#[must_use = "a transaction delivers its notifications when committed"]
pub struct Transaction<'rt> {
    runtime: &'rt Runtime,
    depth: usize,
    committed: bool,
}

impl<'rt> Transaction<'rt> {
    pub(crate) fn begin(runtime: &'rt Runtime) -> Self {
        let depth = runtime.inner.transaction.lock().begin();
        tracing::trace!(depth, "transaction begin");
        Self {
            runtime,
            depth,
            committed: false,
        }
    }

    /// Nesting depth of this transaction (1 for the outermost).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Close the transaction. The outermost commit delivers every
    /// notification collected since it began.
    pub fn commit(mut self) -> Result<()> {
        self.committed = true;
        self.close()
    }

    fn close(&self) -> Result<()> {
        let pending = self.runtime.inner.transaction.lock().commit();
        match pending {
            Some(pending) => {
                tracing::debug!(pending = pending.len(), "transaction committed");
                self.runtime.schedule(pending)
            }
            None => Ok(()),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(err) = self.close() {
                tracing::error!(error = %err, "dropped transaction failed to deliver notifications");
            }
        }
    }
}
