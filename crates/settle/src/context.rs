//! Cancellation-aware call context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::GraphError;

/// Call context threaded through stabilization, cutoffs, bind functions,
/// and handlers.
///
/// The context carries a cancellation flag. Cancelling mid-pass makes the
/// currently recomputing node surface [`GraphError::Cancelled`] through its
/// error path and aborts the pass; queued nodes remain queued and a later
/// [`Graph::stabilize`](crate::Graph::stabilize) resumes them.
///
/// Cloning is cheap; clones share the flag, so a context handed to another
/// thread can cancel a running pass.
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<ContextInner>,
}

#[derive(Default)]
struct ContextInner {
    cancelled: AtomicBool,
}

impl Context {
    /// Create a fresh, uncancelled context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag the context as cancelled.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(GraphError::Cancelled)` if the context is cancelled.
    ///
    /// Long-running user callbacks can poll this to stay cancellation-aware.
    pub fn ensure_not_cancelled(&self) -> Result<(), GraphError> {
        if self.is_cancelled() {
            Err(GraphError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
