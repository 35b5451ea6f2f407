//! The stabilization driver.
//!
//! One pass drains the recompute heap a height-batch at a time. Nodes in a
//! batch share a height and are independent of each other; everything at a
//! lower height has already finished by the time a batch runs.

use std::time::Instant;

use crate::graph::{
    Graph, GraphState, STATUS_NOT_STABILIZING, STATUS_RUNNING_UPDATE_HANDLERS, STATUS_STABILIZING,
};
use crate::node::ErasedIncr;
use crate::{Context, GraphError};

impl Graph {
    /// Run one stabilization pass.
    ///
    /// Drains pending nodes in height order, firing cutoffs, stabilize
    /// callbacks, and staleness propagation. Fails with
    /// [`GraphError::AlreadyStabilizing`] if a pass is already running.
    ///
    /// On a recompute error the pass stops at the failing node: its
    /// on-error handlers fire, pending nodes stay queued, and the error is
    /// returned; the next successful call picks up where this one stopped.
    /// The stabilization number advances either way.
    pub fn stabilize(&self, ctx: &Context) -> Result<(), GraphError> {
        self.state.stabilize(ctx)
    }
}

impl GraphState {
    pub(crate) fn stabilize(&self, ctx: &Context) -> Result<(), GraphError> {
        if !self.try_begin_stabilizing() {
            return Err(GraphError::AlreadyStabilizing);
        }
        let started = self.stabilize_start(ctx);
        let result = self.stabilize_drain(ctx);
        self.stabilize_end(ctx, started, &result);
        result
    }

    fn stabilize_start(&self, ctx: &Context) -> Instant {
        let handlers = self.on_stabilization_start.lock().clone();
        for handler in handlers {
            handler(ctx);
        }
        let started = Instant::now();
        *self.stabilization_started.lock() = Some(started);
        tracing::debug!(
            graph = %self.id.short(),
            stabilization_num = self.stabilization_num(),
            pending = self.recompute_heap.len(),
            "stabilization starting"
        );
        started
    }

    fn stabilize_drain(&self, ctx: &Context) -> Result<(), GraphError> {
        // `always` nodes fire at most once per pass; they are re-added
        // after the drain so the next pass picks them up.
        let mut immediate_recompute: Vec<ErasedIncr> = Vec::new();
        let mut result = Ok(());

        'drain: while self.recompute_heap.len() > 0 {
            let batch = self.recompute_heap.remove_min_height();
            let mut batch_iter = batch.into_iter();
            for node in batch_iter.by_ref() {
                if let Err(err) = self.recompute(ctx, &node) {
                    // Still-valid failing nodes (e.g. a cancellation) go
                    // back in the heap so the next pass retries them.
                    if node.meta().valid() {
                        self.recompute_heap.add(node.clone());
                    }
                    result = Err(err);
                    break;
                }
                if node.meta().always() {
                    immediate_recompute.push(node);
                }
            }
            if result.is_err() {
                // The unprocessed remainder of the batch goes back in the
                // heap so the next pass resumes it.
                for node in batch_iter {
                    self.recompute_heap.add(node);
                }
                break 'drain;
            }
        }

        for node in immediate_recompute {
            self.recompute_heap.add(node);
        }
        result
    }

    fn stabilize_end(&self, ctx: &Context, started: Instant, result: &Result<(), GraphError>) {
        self.run_update_handlers(ctx);
        self.apply_set_during_stabilization(ctx);
        self.increment_stabilization_num();
        *self.stabilization_started.lock() = None;

        match result {
            Ok(()) => tracing::debug!(
                graph = %self.id.short(),
                elapsed = ?started.elapsed(),
                "stabilization complete"
            ),
            Err(err) => tracing::debug!(
                graph = %self.id.short(),
                elapsed = ?started.elapsed(),
                error = %err,
                "stabilization failed"
            ),
        }

        let handlers = self.on_stabilization_end.lock().clone();
        for handler in handlers {
            handler(ctx, started, result.as_ref().err());
        }
        self.set_status(STATUS_NOT_STABILIZING);
    }

    fn run_update_handlers(&self, ctx: &Context) {
        self.set_status(STATUS_RUNNING_UPDATE_HANDLERS);
        let queued: Vec<_> = {
            let mut map = self.handle_after_stabilization.lock();
            map.drain(..).collect()
        };
        for (_, handlers) in queued {
            for handler in handlers {
                handler(ctx);
            }
        }
        self.set_status(STATUS_STABILIZING);
    }

    /// Variables set while the pass ran: apply the staged value now and
    /// leave them stale for the next pass.
    fn apply_set_during_stabilization(&self, ctx: &Context) {
        loop {
            let node = {
                let mut staged = self.set_during_stabilization.lock();
                let values = staged.values();
                match values.first() {
                    Some(first) => {
                        let id = first.meta().id();
                        staged.remove(id)
                    }
                    None => None,
                }
            };
            let Some(node) = node else { break };
            let _ = node.stabilize_erased(ctx);
            self.set_stale_erased(&node);
        }
    }
}
