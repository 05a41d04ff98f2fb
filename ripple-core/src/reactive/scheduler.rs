//! Scheduler
//!
//! The scheduler decides when queued reactions run.
//!
//! # Algorithm
//!
//! 1. At the outermost commit, the pending set is split into computed cells
//!    (already marked dirty, nothing to run) and reactions
//! 2. Reactions join the queue
//! 3. A flush drains the queue in passes. Each pass runs every queued,
//!    still-stale reaction at most once, in queue order
//! 4. Writes made by reactions during a pass queue more reactions for the
//!    next pass instead of recursing
//! 5. A flush that needs more than `max_flush_passes` passes fails with
//!    [`ReactiveError::ReactionLoop`]
//!
//! In [`FlushMode::Synchronous`] the commit flushes immediately. In
//! [`FlushMode::Deferred`] the commit only queues and calls the host's
//! schedule hook; the host then calls [`Runtime::flush`].

use std::sync::Arc;

use indexmap::IndexSet;

use super::runtime::Runtime;
use crate::config::FlushMode;
use crate::error::{ReactiveError, Result};
use crate::graph::{NodeId, NodeKind};

/// Counters describing the work a runtime's scheduler has done.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Flushes that ran at least one pass.
    pub flushes: u64,
    /// Notification passes across all flushes.
    pub passes: u64,
    /// Reaction executions triggered by flushes.
    pub reactions_run: u64,
}

#[derive(Debug, Default)]
pub(crate) struct SchedulerState {
    queue: IndexSet<NodeId>,
    flushing: bool,
    stats: SchedulerStats,
}

/// Resets the flushing flag even if a reaction panics.
struct FlushGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.runtime.inner.scheduler.lock().flushing = false;
    }
}

impl Runtime {
    /// Hand a committed pending set to the scheduler.
    pub(crate) fn schedule(&self, pending: IndexSet<NodeId>) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }

        let (reactions, computed): (Vec<NodeId>, Vec<NodeId>) = {
            let graph = self.graph();
            pending
                .into_iter()
                .filter(|id| graph.contains(*id))
                .partition(|id| graph.kind(*id) == Some(NodeKind::Reaction))
        };
        tracing::trace!(
            reactions = reactions.len(),
            computed = computed.len(),
            "pending set received"
        );
        if reactions.is_empty() {
            return Ok(());
        }

        let (flushing, was_idle) = {
            let mut scheduler = self.inner.scheduler.lock();
            let was_idle = scheduler.queue.is_empty();
            scheduler.queue.extend(reactions);
            (scheduler.flushing, was_idle)
        };
        if flushing {
            // The running flush picks these up in its next pass.
            return Ok(());
        }

        match self.config().flush_mode {
            FlushMode::Synchronous => self.flush(),
            FlushMode::Deferred => {
                if was_idle {
                    let hook = self.inner.on_schedule.read().clone();
                    if let Some(hook) = hook {
                        hook();
                    }
                }
                Ok(())
            }
        }
    }

    /// Run queued reactions until the queue is empty.
    ///
    /// Calling `flush` while a flush is already running is a no-op. Returns
    /// the first reaction error of the flush; the remaining reactions still
    /// run.
    pub fn flush(&self) -> Result<()> {
        {
            let mut scheduler = self.inner.scheduler.lock();
            if scheduler.flushing || scheduler.queue.is_empty() {
                return Ok(());
            }
            scheduler.flushing = true;
        }
        let _guard = FlushGuard { runtime: self };
        let span = tracing::debug_span!("flush");
        let _enter = span.enter();

        let max_passes = self.config().max_flush_passes;
        let mut passes = 0usize;
        let mut ran = 0u64;
        let mut first_error = None;

        loop {
            let batch = std::mem::take(&mut self.inner.scheduler.lock().queue);
            if batch.is_empty() {
                break;
            }

            passes += 1;
            if passes > max_passes {
                let mut scheduler = self.inner.scheduler.lock();
                scheduler.queue.clear();
                scheduler.stats.passes += max_passes as u64;
                scheduler.stats.reactions_run += ran;
                scheduler.stats.flushes += 1;
                tracing::error!(passes = max_passes, "reactions did not settle");
                return Err(ReactiveError::ReactionLoop { passes: max_passes });
            }

            tracing::debug!(pass = passes, reactions = batch.len(), "flush pass");
            for id in batch {
                match self.refresh(id) {
                    Ok(true) => ran += 1,
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(node = %id, error = %err, "reaction failed");
                        first_error.get_or_insert(err);
                    }
                }
            }
        }

        {
            let mut scheduler = self.inner.scheduler.lock();
            scheduler.stats.flushes += 1;
            scheduler.stats.passes += passes as u64;
            scheduler.stats.reactions_run += ran;
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Install the hook called when reactions are queued in deferred mode.
    pub fn set_on_schedule<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.on_schedule.write() = Some(Arc::new(hook));
    }

    /// Remove the deferred-mode hook.
    pub fn clear_on_schedule(&self) {
        *self.inner.on_schedule.write() = None;
    }

    /// Number of reactions waiting for a flush, including those held by an
    /// open transaction.
    pub fn pending_count(&self) -> usize {
        let queued = self.inner.scheduler.lock().queue.len();
        let held: Vec<NodeId> = {
            let transaction = self.inner.transaction.lock();
            if transaction.pending_len() == 0 {
                return queued;
            }
            transaction.pending_ids()
        };
        let graph = self.graph();
        queued
            + held
                .into_iter()
                .filter(|id| graph.kind(*id) == Some(NodeKind::Reaction))
                .count()
    }

    /// Snapshot of the scheduler counters.
    pub fn stats(&self) -> SchedulerStats {
        self.inner.scheduler.lock().stats
    }
}
