//! The typed public node handle.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::Context;
use crate::node::{ErasedIncr, HEIGHT_UNSET};
use crate::{GraphError, Identifier};

/// A typed handle to a node with a current value of type `T`.
///
/// `Incr` is cheap to clone and keeps the node (and, through it, the
/// node's inputs) alive. The graph's tables are type-erased internally;
/// `T` is re-introduced here by downcast, so the handle is the only place
/// the value type appears.
pub struct Incr<T> {
    node: ErasedIncr,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Incr<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Incr<T> {
    pub(crate) fn from_erased(node: ErasedIncr) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn erased(&self) -> &ErasedIncr {
        &self.node
    }

    /// The node's unique identifier.
    pub fn id(&self) -> Identifier {
        self.node.meta().id()
    }

    /// The node kind tag (`"var"`, `"map"`, `"bind"`, ...).
    pub fn kind(&self) -> &'static str {
        self.node.meta().kind()
    }

    pub fn label(&self) -> Option<String> {
        self.node.meta().label()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        self.node.meta().set_label(label);
    }

    /// Caller-assigned metadata attached to the node.
    pub fn metadata(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.node.meta().metadata()
    }

    pub fn set_metadata<M: Any + Send + Sync>(&self, metadata: M) {
        self.node.meta().set_metadata(Arc::new(metadata));
    }

    /// Register a handler fired after a pass in which this node changed.
    ///
    /// Handlers run once the pass finishes, in registration order for this
    /// node; ordering across nodes is unspecified.
    pub fn on_update(&self, handler: impl Fn(&Context) + Send + Sync + 'static) {
        self.node.meta().on_update.lock().push(Arc::new(handler));
    }

    /// Register a handler fired when this node's recompute fails.
    pub fn on_error(&self, handler: impl Fn(&Context, &GraphError) + Send + Sync + 'static) {
        self.node.meta().on_error.lock().push(Arc::new(handler));
    }

    /// Register a handler fired when an observer starts anchoring this
    /// node. Receives the observer's identifier.
    pub fn on_observed(&self, handler: impl Fn(Identifier) + Send + Sync + 'static) {
        self.node.meta().on_observed.lock().push(Arc::new(handler));
    }

    /// Register a handler fired when an observer stops anchoring this node.
    pub fn on_unobserved(&self, handler: impl Fn(Identifier) + Send + Sync + 'static) {
        self.node
            .meta()
            .on_unobserved
            .lock()
            .push(Arc::new(handler));
    }

    /// The node's current pseudo-height, or `-1` while unscheduled.
    ///
    /// The height orders recomputation: every parent a node reads from has
    /// a strictly smaller height.
    pub fn height(&self) -> i64 {
        self.node.meta().height()
    }

    /// Whether the node is still valid (not invalidated through a bind).
    pub fn is_valid(&self) -> bool {
        self.node.meta().valid()
    }

    /// Mark this node as recomputing on every pass it participates in.
    ///
    /// An `always` node still fires at most once per pass; after a pass in
    /// which it ran it is re-queued for the next one.
    pub fn set_always(&self, always: bool) {
        let meta = self.node.meta();
        meta.set_always(always);
        if always {
            if let Some(graph) = meta.graph() {
                if meta.in_graph() && meta.height_in_recompute_heap() == HEIGHT_UNSET {
                    graph.recompute_heap.add(self.node.clone());
                }
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Incr<T> {
    /// The node's current value.
    ///
    /// `None` until the node has computed at least once (and for observers
    /// that have been unobserved).
    pub fn value(&self) -> Option<T> {
        self.value_arc().map(|arc| (*arc).clone())
    }
}

impl<T: Send + Sync + 'static> Incr<T> {
    pub(crate) fn value_arc(&self) -> Option<Arc<T>> {
        self.node
            .value_dyn()
            .and_then(|value| value.downcast::<T>().ok())
    }
}

impl<T> std::fmt::Debug for Incr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.node.meta().describe())
    }
}
