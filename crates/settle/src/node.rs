//! Per-node metadata and the type-erased dispatch seam.
//!
//! Every node kind embeds a [`NodeMeta`]: the universal record holding the
//! node's identity, topology (parents / children / observers), scheduling
//! state (height, heap positions), staleness timestamps, validity, and
//! handler lists. Kind-specific behavior is reached through the
//! [`ErasedNode`] trait; values cross the erased boundary as
//! `Arc<dyn Any>` and are re-typed at the public handles.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::context::Context;
use crate::graph::GraphState;
use crate::node_set::{NodeSet, WeakNodeSet};
use crate::scope::Scope;
use crate::{GraphError, Identifier};

/// Sentinel height for a node that is not scheduled anywhere.
pub(crate) const HEIGHT_UNSET: i64 = -1;

pub(crate) type ErasedIncr = Arc<dyn ErasedNode>;

pub(crate) type UpdateHandler = Arc<dyn Fn(&Context) + Send + Sync>;
pub(crate) type ErrorHandler = Arc<dyn Fn(&Context, &GraphError) + Send + Sync>;
pub(crate) type ObservationHandler = Arc<dyn Fn(Identifier) + Send + Sync>;

/// Capability flags fixed when a node kind is constructed.
///
/// The scheduler consults these instead of probing dispatch: a node without
/// a stabilize callback is never stale past its first computation, and only
/// nodes with a cutoff get the cutoff call.
#[derive(Clone, Copy, Default)]
pub(crate) struct NodeCaps {
    pub has_stabilize: bool,
    pub has_cutoff: bool,
    pub is_observer: bool,
    /// A stabilize error invalidates the node (binds).
    pub invalidates_on_error: bool,
}

/// Kind-specific behavior, object safe.
pub(crate) trait ErasedNode: Send + Sync + 'static {
    /// The node's universal metadata record.
    fn meta(&self) -> &Arc<NodeMeta>;

    /// The canonical inputs of this kind: the nodes it reads from.
    ///
    /// Edges are (re)constructed from this list when the node is
    /// discovered, so unobserving and re-observing round-trips.
    fn inputs(&self) -> Vec<ErasedIncr>;

    /// Recompute the node's value. Only called when `has_stabilize`.
    fn stabilize_erased(&self, ctx: &Context) -> Result<(), GraphError> {
        let _ = ctx;
        Ok(())
    }

    /// Decide whether propagation stops here. Only called when `has_cutoff`.
    fn cutoff_erased(&self, ctx: &Context) -> Result<bool, GraphError> {
        let _ = ctx;
        Ok(false)
    }

    /// The current value, type-erased.
    fn value_dyn(&self) -> Option<Arc<dyn Any + Send + Sync>>;

    /// Kind-level teardown on invalidation (binds drop their bound node).
    fn invalidate_kind(&self) {}
}

/// The universal per-node record.
pub(crate) struct NodeMeta {
    id: Identifier,
    kind: &'static str,
    created_in: Scope,
    graph: Weak<GraphState>,
    caps: NodeCaps,

    label: Mutex<Option<String>>,
    metadata: Mutex<Option<Arc<dyn Any + Send + Sync>>>,

    /// Nodes this node reads from (strong: a node keeps its inputs alive).
    pub(crate) parents: Mutex<NodeSet>,
    /// Nodes reading from this node.
    pub(crate) children: Mutex<WeakNodeSet>,
    /// Observer nodes transitively anchoring this node.
    pub(crate) observers: Mutex<WeakNodeSet>,

    height: AtomicI64,
    height_in_recompute_heap: AtomicI64,
    height_in_adjust_heights_heap: AtomicI64,

    changed_at: AtomicU64,
    set_at: AtomicU64,
    bound_at: AtomicU64,
    recomputed_at: AtomicU64,

    num_recomputes: AtomicU64,
    num_changes: AtomicU64,

    valid: AtomicBool,
    always: AtomicBool,
    /// Keeps a node necessary through a bind swap while its replacement is
    /// linked in.
    force_necessary: AtomicBool,
    in_graph: AtomicBool,

    pub(crate) on_update: Mutex<Vec<UpdateHandler>>,
    pub(crate) on_error: Mutex<Vec<ErrorHandler>>,
    pub(crate) on_observed: Mutex<Vec<ObservationHandler>>,
    pub(crate) on_unobserved: Mutex<Vec<ObservationHandler>>,
}

impl NodeMeta {
    pub fn new(kind: &'static str, created_in: Scope, caps: NodeCaps) -> Arc<Self> {
        let graph = created_in.graph_weak();
        Arc::new(Self {
            id: Identifier::new(),
            kind,
            created_in,
            graph,
            caps,
            label: Mutex::new(None),
            metadata: Mutex::new(None),
            parents: Mutex::new(NodeSet::new()),
            children: Mutex::new(WeakNodeSet::new()),
            observers: Mutex::new(WeakNodeSet::new()),
            height: AtomicI64::new(HEIGHT_UNSET),
            height_in_recompute_heap: AtomicI64::new(HEIGHT_UNSET),
            height_in_adjust_heights_heap: AtomicI64::new(HEIGHT_UNSET),
            changed_at: AtomicU64::new(0),
            set_at: AtomicU64::new(0),
            bound_at: AtomicU64::new(0),
            recomputed_at: AtomicU64::new(0),
            num_recomputes: AtomicU64::new(0),
            num_changes: AtomicU64::new(0),
            valid: AtomicBool::new(true),
            always: AtomicBool::new(false),
            force_necessary: AtomicBool::new(false),
            in_graph: AtomicBool::new(false),
            on_update: Mutex::new(Vec::new()),
            on_error: Mutex::new(Vec::new()),
            on_observed: Mutex::new(Vec::new()),
            on_unobserved: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> Identifier {
        self.id
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn created_in(&self) -> &Scope {
        &self.created_in
    }

    pub fn graph(&self) -> Option<Arc<GraphState>> {
        self.graph.upgrade()
    }

    pub fn caps(&self) -> NodeCaps {
        self.caps
    }

    pub fn label(&self) -> Option<String> {
        self.label.lock().clone()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        *self.label.lock() = Some(label.into());
    }

    pub fn metadata(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.metadata.lock().clone()
    }

    pub fn set_metadata(&self, metadata: Arc<dyn Any + Send + Sync>) {
        *self.metadata.lock() = Some(metadata);
    }

    // Scheduling state.

    pub fn height(&self) -> i64 {
        self.height.load(Ordering::SeqCst)
    }

    pub fn set_height(&self, height: i64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn height_in_recompute_heap(&self) -> i64 {
        self.height_in_recompute_heap.load(Ordering::SeqCst)
    }

    pub fn set_height_in_recompute_heap(&self, height: i64) {
        self.height_in_recompute_heap.store(height, Ordering::SeqCst);
    }

    pub fn height_in_adjust_heights_heap(&self) -> i64 {
        self.height_in_adjust_heights_heap.load(Ordering::SeqCst)
    }

    pub fn set_height_in_adjust_heights_heap(&self, height: i64) {
        self.height_in_adjust_heights_heap
            .store(height, Ordering::SeqCst);
    }

    // Timestamps and counters.

    pub fn changed_at(&self) -> u64 {
        self.changed_at.load(Ordering::SeqCst)
    }

    pub fn set_changed_at(&self, at: u64) {
        self.changed_at.store(at, Ordering::SeqCst);
    }

    pub fn set_at(&self) -> u64 {
        self.set_at.load(Ordering::SeqCst)
    }

    pub fn set_set_at(&self, at: u64) {
        self.set_at.store(at, Ordering::SeqCst);
    }

    pub fn bound_at(&self) -> u64 {
        self.bound_at.load(Ordering::SeqCst)
    }

    pub fn set_bound_at(&self, at: u64) {
        self.bound_at.store(at, Ordering::SeqCst);
    }

    pub fn recomputed_at(&self) -> u64 {
        self.recomputed_at.load(Ordering::SeqCst)
    }

    pub fn set_recomputed_at(&self, at: u64) {
        self.recomputed_at.store(at, Ordering::SeqCst);
    }

    pub fn num_recomputes(&self) -> u64 {
        self.num_recomputes.load(Ordering::SeqCst)
    }

    pub fn increment_recomputes(&self) {
        self.num_recomputes.fetch_add(1, Ordering::SeqCst);
    }

    pub fn num_changes(&self) -> u64 {
        self.num_changes.load(Ordering::SeqCst)
    }

    pub fn increment_changes(&self) {
        self.num_changes.fetch_add(1, Ordering::SeqCst);
    }

    // Flags.

    pub fn valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    pub fn always(&self) -> bool {
        self.always.load(Ordering::SeqCst)
    }

    pub fn set_always(&self, always: bool) {
        self.always.store(always, Ordering::SeqCst);
    }

    pub fn force_necessary(&self) -> bool {
        self.force_necessary.load(Ordering::SeqCst)
    }

    pub fn set_force_necessary(&self, force: bool) {
        self.force_necessary.store(force, Ordering::SeqCst);
    }

    pub fn in_graph(&self) -> bool {
        self.in_graph.load(Ordering::SeqCst)
    }

    pub fn set_in_graph(&self, in_graph: bool) {
        self.in_graph.store(in_graph, Ordering::SeqCst);
    }

    // Derived predicates.

    /// A node is necessary iff an observer anchors it: it is itself an
    /// observer, an observer reaches it transitively (its `observers` set is
    /// non-empty), a necessary child still reads from it, or it is pinned
    /// through a bind swap.
    pub fn is_necessary(&self) -> bool {
        if self.caps.is_observer || self.force_necessary() {
            return true;
        }
        if !self.observers.lock().is_empty_alive() {
            return true;
        }
        self.children
            .lock()
            .alive()
            .iter()
            .any(|child| child.meta().in_graph())
    }

    /// Whether the node's current value may not reflect its inputs.
    pub fn is_stale(&self) -> bool {
        let recomputed_at = self.recomputed_at();
        if recomputed_at == 0 {
            return true;
        }
        if self.always() {
            return true;
        }
        if !self.caps.has_stabilize {
            return false;
        }
        if self.set_at() > recomputed_at
            || self.bound_at() > recomputed_at
            || self.changed_at() > recomputed_at
        {
            return true;
        }
        let parents = self.parents.lock().values();
        parents.iter().any(|parent| {
            parent.meta().changed_at() > recomputed_at || parent.meta().bound_at() > recomputed_at
        })
    }

    /// Diagnostic form: `kind[short]:label@height`.
    pub fn describe(&self) -> String {
        match self.label() {
            Some(label) => format!(
                "{}[{}]:{}@{}",
                self.kind,
                self.id.short(),
                label,
                self.height()
            ),
            None => format!("{}[{}]@{}", self.kind, self.id.short(), self.height()),
        }
    }
}

/// Register the mutual parent/child edge between two nodes.
pub(crate) fn link(child: &ErasedIncr, parent: &ErasedIncr) {
    child.meta().parents.lock().push(parent.clone());
    parent.meta().children.lock().push(child);
}

/// Remove the mutual parent/child edge between two nodes.
pub(crate) fn unlink(child: &ErasedIncr, parent: &ErasedIncr) {
    child.meta().parents.lock().remove(parent.meta().id());
    parent.meta().children.lock().remove(child.meta().id());
}

#[cfg(test)]
mod tests {
    use crate::{Context, Graph};

    #[test]
    fn test_linked_edges_are_mutual() {
        let graph = Graph::new();
        let scope = graph.scope();
        let a = scope.constant(1i64);
        let b = scope.map(&a, |x| x + 1);

        let a_meta = a.erased().meta();
        let b_meta = b.erased().meta();
        assert!(b_meta.parents.lock().contains(a_meta.id()));
        assert!(a_meta.children.lock().contains(b_meta.id()));
    }

    #[test]
    fn test_fresh_node_is_stale_until_computed() {
        let graph = Graph::new();
        let scope = graph.scope();
        let v = scope.var(1i64);
        assert!(v.incr().erased().meta().is_stale());

        let obs = graph.observe(&v.incr()).unwrap();
        graph.stabilize(&Context::new()).unwrap();
        assert!(!v.incr().erased().meta().is_stale());
        drop(obs);
    }
}
