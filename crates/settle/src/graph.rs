//! The graph: shared state for one computation DAG.
//!
//! The graph owns the tables of necessary nodes and observers, the two
//! height-bucketed heaps, and the stabilization bookkeeping. Nodes join the
//! graph when an observer anchors them (`discover_nodes`) and leave it when
//! the last anchor goes away (`check_if_unnecessary`). All mutation funnels
//! through the methods here so the invariants hold at every return.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::adjust_heights_heap::AdjustHeightsHeap;
use crate::context::Context;
use crate::incr::Incr;
use crate::node::{link, unlink, ErasedIncr, UpdateHandler, HEIGHT_UNSET};
use crate::node_set::NodeSet;
use crate::recompute_heap::RecomputeHeap;
use crate::scope::Scope;
use crate::{GraphError, Identifier};

/// The default maximum pseudo-height a node may reach.
pub const DEFAULT_MAX_HEIGHT: usize = 256;

pub(crate) const STATUS_NOT_STABILIZING: u8 = 0;
pub(crate) const STATUS_STABILIZING: u8 = 1;
pub(crate) const STATUS_RUNNING_UPDATE_HANDLERS: u8 = 2;

pub(crate) type StartHandler = Arc<dyn Fn(&Context) + Send + Sync>;
pub(crate) type EndHandler = Arc<dyn Fn(&Context, Instant, Option<&GraphError>) + Send + Sync>;

/// A computation graph.
///
/// `Graph` is a cheap-to-clone handle; all state sits behind an `Arc`.
/// Build nodes through [`Graph::scope`], anchor them with
/// [`Graph::observe`], and run [`Graph::stabilize`] after inputs change.
///
/// # Example
///
/// ```
/// use settle::{Context, Graph};
///
/// let graph = Graph::new();
/// let scope = graph.scope();
/// let v = scope.var(1i64);
/// let doubled = scope.map(&v.incr(), |x| x * 2);
/// let obs = graph.observe(&doubled).unwrap();
///
/// graph.stabilize(&Context::new()).unwrap();
/// assert_eq!(obs.value(), Some(2));
///
/// v.set(21);
/// graph.stabilize(&Context::new()).unwrap();
/// assert_eq!(obs.value(), Some(42));
/// ```
#[derive(Clone)]
pub struct Graph {
    pub(crate) state: Arc<GraphState>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Create a graph with the default maximum height.
    pub fn new() -> Self {
        Self::with_max_height(DEFAULT_MAX_HEIGHT)
    }

    /// Create a graph whose nodes may reach heights up to `max_height`.
    pub fn with_max_height(max_height: usize) -> Self {
        Self {
            state: Arc::new(GraphState::new(max_height)),
        }
    }

    /// The graph's identifier.
    pub fn id(&self) -> Identifier {
        self.state.id
    }

    /// The top-level scope, used to construct nodes.
    pub fn scope(&self) -> Scope {
        Scope::top(&self.state)
    }

    pub fn label(&self) -> Option<String> {
        self.state.label.lock().clone()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        *self.state.label.lock() = Some(label.into());
    }

    /// Whether a stabilization pass is currently in flight.
    pub fn is_stabilizing(&self) -> bool {
        self.state.status() != STATUS_NOT_STABILIZING
    }

    /// Whether the graph currently computes `incr` (it is necessary).
    pub fn has<T>(&self, incr: &Incr<T>) -> bool {
        self.state
            .nodes
            .lock()
            .contains(incr.erased().meta().id())
    }

    /// Mark a node explicitly stale, scheduling it if it is necessary.
    pub fn set_stale<T>(&self, incr: &Incr<T>) {
        self.state.set_stale_erased(incr.erased());
    }

    /// Register a handler fired when a stabilization pass starts.
    pub fn on_stabilization_start(&self, handler: impl Fn(&Context) + Send + Sync + 'static) {
        self.state
            .on_stabilization_start
            .lock()
            .push(Arc::new(handler));
    }

    /// Register a handler fired when a stabilization pass ends.
    ///
    /// Receives the pass start time and the pass error, if any.
    pub fn on_stabilization_end(
        &self,
        handler: impl Fn(&Context, Instant, Option<&GraphError>) + Send + Sync + 'static,
    ) {
        self.state
            .on_stabilization_end
            .lock()
            .push(Arc::new(handler));
    }

    /// Check the engine's structural invariants, returning a description
    /// of the first violation found.
    ///
    /// Checked: the height invariant along every live edge, recompute-heap
    /// bucket consistency, necessity of every tracked node, and, when the
    /// graph is quiescent (nothing pending, not stabilizing), freshness:
    /// no necessary node still reads a parent that changed after its last
    /// recompute. Intended for tests and fuzz harnesses.
    pub fn check_invariants(&self) -> Result<(), String> {
        let state = &self.state;
        state.recompute_heap.sanity_check()?;

        let nodes = state.nodes.lock().values();
        let quiescent =
            state.recompute_heap.len() == 0 && self.state.status() == STATUS_NOT_STABILIZING;
        for node in &nodes {
            let meta = node.meta();
            if !meta.in_graph() {
                return Err(format!(
                    "graph: tracked node {} not flagged in-graph",
                    meta.describe()
                ));
            }
            if !meta.is_necessary() {
                return Err(format!(
                    "graph: tracked node {} is not necessary",
                    meta.describe()
                ));
            }
            for parent in meta.parents.lock().values() {
                let parent_meta = parent.meta();
                if parent_meta.in_graph() && parent_meta.height() >= meta.height() {
                    return Err(format!(
                        "graph: edge {} -> {} violates the height invariant",
                        parent_meta.describe(),
                        meta.describe()
                    ));
                }
                if quiescent
                    && meta.valid()
                    && meta.caps().has_stabilize
                    && parent_meta.changed_at() > meta.recomputed_at()
                {
                    return Err(format!(
                        "graph: node {} is stale after a quiescent stabilize (parent {})",
                        meta.describe(),
                        parent_meta.describe()
                    ));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.state.id.short())
            .field("nodes", &self.state.nodes.lock().len())
            .field("stabilization_num", &self.state.stabilization_num())
            .finish()
    }
}

pub(crate) struct GraphState {
    pub(crate) id: Identifier,
    pub(crate) label: Mutex<Option<String>>,

    /// Necessary non-observer nodes, by id.
    pub(crate) nodes: Mutex<NodeSet>,
    /// Registered observer nodes, by id.
    pub(crate) observers: Mutex<NodeSet>,

    pub(crate) recompute_heap: RecomputeHeap,
    pub(crate) adjust_heights_heap: AdjustHeightsHeap,

    /// Variables set while a pass was running; applied at end of pass.
    pub(crate) set_during_stabilization: Mutex<NodeSet>,
    /// Update handlers queued by recomputed nodes, run after the pass.
    pub(crate) handle_after_stabilization:
        Mutex<IndexMap<Identifier, Vec<UpdateHandler>, ahash::RandomState>>,
    /// Children suspected of needing invalidation.
    pub(crate) propagate_invalidity: Mutex<VecDeque<ErasedIncr>>,

    stabilization_num: AtomicU64,
    status: AtomicU8,
    pub(crate) stabilization_started: Mutex<Option<Instant>>,

    pub(crate) num_nodes: AtomicU64,
    pub(crate) num_nodes_recomputed: AtomicU64,
    pub(crate) num_nodes_changed: AtomicU64,

    pub(crate) on_stabilization_start: Mutex<Vec<StartHandler>>,
    pub(crate) on_stabilization_end: Mutex<Vec<EndHandler>>,
}

impl GraphState {
    fn new(max_height: usize) -> Self {
        Self {
            id: Identifier::new(),
            label: Mutex::new(None),
            nodes: Mutex::new(NodeSet::new()),
            observers: Mutex::new(NodeSet::new()),
            recompute_heap: RecomputeHeap::new(max_height),
            adjust_heights_heap: AdjustHeightsHeap::new(max_height),
            set_during_stabilization: Mutex::new(NodeSet::new()),
            handle_after_stabilization: Mutex::new(IndexMap::default()),
            propagate_invalidity: Mutex::new(VecDeque::new()),
            stabilization_num: AtomicU64::new(1),
            status: AtomicU8::new(STATUS_NOT_STABILIZING),
            stabilization_started: Mutex::new(None),
            num_nodes: AtomicU64::new(0),
            num_nodes_recomputed: AtomicU64::new(0),
            num_nodes_changed: AtomicU64::new(0),
            on_stabilization_start: Mutex::new(Vec::new()),
            on_stabilization_end: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn stabilization_num(&self) -> u64 {
        self.stabilization_num.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_stabilization_num(&self) {
        self.stabilization_num.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn status(&self) -> u8 {
        self.status.load(Ordering::SeqCst)
    }

    pub(crate) fn set_status(&self, status: u8) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub(crate) fn try_begin_stabilizing(&self) -> bool {
        self.status
            .compare_exchange(
                STATUS_NOT_STABILIZING,
                STATUS_STABILIZING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    //
    // Discovery & necessity
    //

    /// Add a node to the necessary set. Returns `true` when newly added.
    pub(crate) fn add_node(&self, node: &ErasedIncr) -> bool {
        let meta = node.meta();
        let mut nodes = self.nodes.lock();
        if nodes.contains(meta.id()) {
            return false;
        }
        nodes.push(node.clone());
        drop(nodes);
        meta.set_in_graph(true);
        self.num_nodes.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub(crate) fn add_observer_node(&self, node: &ErasedIncr) -> bool {
        let meta = node.meta();
        let mut observers = self.observers.lock();
        if observers.contains(meta.id()) {
            return false;
        }
        observers.push(node.clone());
        drop(observers);
        meta.set_in_graph(true);
        self.num_nodes.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub(crate) fn remove_node(&self, node: &ErasedIncr) {
        self.nodes.lock().remove(node.meta().id());
        node.meta().set_in_graph(false);
        self.zero_node(node);
    }

    pub(crate) fn remove_observer_node(&self, node: &ErasedIncr) {
        self.observers.lock().remove(node.meta().id());
        node.meta().set_in_graph(false);
        self.zero_node(node);
    }

    /// Reset a node that left the graph so a later re-observation starts
    /// from scratch.
    fn zero_node(&self, node: &ErasedIncr) {
        let meta = node.meta();
        if meta.height_in_recompute_heap() != HEIGHT_UNSET {
            self.recompute_heap.remove(node);
        }
        if meta.height_in_adjust_heights_heap() != HEIGHT_UNSET {
            self.adjust_heights_heap.remove(node);
        }
        self.num_nodes.fetch_sub(1, Ordering::SeqCst);
        self.handle_after_stabilization.lock().shift_remove(&meta.id());
        meta.set_set_at(0);
        meta.set_changed_at(0);
        meta.set_recomputed_at(0);
        meta.set_height(HEIGHT_UNSET);
        meta.set_height_in_recompute_heap(HEIGHT_UNSET);
        meta.set_height_in_adjust_heights_heap(HEIGHT_UNSET);
    }

    /// Walk `node` and its transitive inputs, anchoring them to `obs` (when
    /// given) and pulling newly necessary nodes into the graph: join the
    /// table, floor the height at the creation scope, link edges, and
    /// enqueue stale nodes.
    pub(crate) fn discover_nodes(
        &self,
        obs: Option<&ErasedIncr>,
        node: &ErasedIncr,
    ) -> Result<(), GraphError> {
        let meta = node.meta();
        let observer_added = match obs {
            Some(o) => {
                let added = meta.observers.lock().push(o);
                if added {
                    let handlers = meta.on_observed.lock().clone();
                    let observer_id = o.meta().id();
                    for handler in handlers {
                        handler(observer_id);
                    }
                }
                added
            }
            None => false,
        };
        let newly_in_graph = self.add_node(node);
        if !observer_added && !newly_in_graph {
            // Already discovered under this anchor.
            return Ok(());
        }
        if newly_in_graph {
            self.adjust_heights_heap
                .set_height(node, meta.created_in().height() + 1)?;
        }
        for parent in node.inputs() {
            let was_necessary = parent.meta().is_necessary();
            link(node, &parent);
            if !parent.meta().valid() {
                self.propagate_invalidity.lock().push_back(node.clone());
            }
            if obs.is_some() || !was_necessary {
                self.discover_nodes(obs, &parent)?;
            }
            if parent.meta().height() >= meta.height() {
                self.adjust_heights_heap
                    .set_height(node, parent.meta().height() + 1)?;
            }
        }
        if meta.is_stale() && meta.height_in_recompute_heap() == HEIGHT_UNSET {
            self.recompute_heap.add(node.clone());
        }
        Ok(())
    }

    /// Make `node` necessary (anchor-free entry point used by linking).
    pub(crate) fn became_necessary(&self, node: &ErasedIncr) -> Result<(), GraphError> {
        self.discover_nodes(None, node)?;
        self.propagate_invalidity();
        Ok(())
    }

    /// Remove the anchor `obs` from `node` and its transitive inputs,
    /// collapsing whatever is no longer necessary.
    pub(crate) fn undiscover_nodes(&self, obs: &ErasedIncr, node: &ErasedIncr) {
        let meta = node.meta();
        let obs_id = obs.meta().id();
        if !meta.observers.lock().contains(obs_id) {
            return;
        }
        // A child inside the graph still carrying this anchor keeps the
        // node anchored too: it is reachable from the observer through that
        // child. This protects subtrees shared between an old and a new
        // bind result.
        let children = meta.children.lock().alive();
        let still_anchored = children.iter().any(|child| {
            child.meta().in_graph() && child.meta().observers.lock().contains(obs_id)
        });
        if still_anchored {
            return;
        }
        meta.observers.lock().remove(obs_id);
        let handlers = meta.on_unobserved.lock().clone();
        for handler in handlers {
            handler(obs_id);
        }
        let parents = meta.parents.lock().values();
        for parent in parents {
            self.undiscover_nodes(obs, &parent);
        }
        self.check_if_unnecessary(node);
    }

    pub(crate) fn check_if_unnecessary(&self, node: &ErasedIncr) {
        let meta = node.meta();
        if meta.caps().is_observer {
            return;
        }
        if meta.in_graph() && !meta.is_necessary() {
            self.became_unnecessary(node);
        }
    }

    fn became_unnecessary(&self, node: &ErasedIncr) {
        tracing::trace!(node = %node.meta().describe(), "became unnecessary");
        self.remove_node(node);
        self.remove_parents(node);
    }

    pub(crate) fn remove_parents(&self, child: &ErasedIncr) {
        let parents = child.meta().parents.lock().values();
        for parent in parents {
            self.remove_parent(child, &parent);
        }
    }

    pub(crate) fn remove_parent(&self, child: &ErasedIncr, parent: &ErasedIncr) {
        unlink(child, parent);
        self.check_if_unnecessary(parent);
    }

    //
    // Linking
    //

    fn edge_is_stale(&self, child: &ErasedIncr, parent: &ErasedIncr) -> bool {
        parent.meta().changed_at() > child.meta().recomputed_at()
    }

    fn add_child_without_adjusting_heights(
        &self,
        child: &ErasedIncr,
        parent: &ErasedIncr,
    ) -> Result<(), GraphError> {
        let was_necessary = parent.meta().is_necessary();
        link(child, parent);
        if !parent.meta().valid() {
            self.propagate_invalidity.lock().push_back(child.clone());
        }
        if !was_necessary {
            self.discover_nodes(None, parent)?;
        }
        Ok(())
    }

    /// Link `parent -> child`, repairing heights, propagating invalidity,
    /// and scheduling the child when the new edge makes it stale.
    pub(crate) fn add_child(
        &self,
        child: &ErasedIncr,
        parent: &ErasedIncr,
    ) -> Result<(), GraphError> {
        self.add_child_without_adjusting_heights(child, parent)?;
        if parent.meta().height() >= child.meta().height() {
            self.adjust_heights_heap
                .adjust_heights(&self.recompute_heap, child, parent)?;
        }
        self.propagate_invalidity();
        let child_meta = child.meta();
        if child_meta.height_in_recompute_heap() == HEIGHT_UNSET
            && (child_meta.recomputed_at() == 0 || self.edge_is_stale(child, parent))
        {
            self.recompute_heap.add(child.clone());
        }
        Ok(())
    }

    /// Swap the parent of `child` from `old` to `new` (bind swaps).
    ///
    /// The old parent is pinned necessary until the new edge is in place,
    /// so a subtree shared between both sides is not torn down and rebuilt.
    pub(crate) fn change_parent(
        &self,
        child: &ErasedIncr,
        old: Option<&ErasedIncr>,
        new: &ErasedIncr,
    ) -> Result<(), GraphError> {
        match old {
            Some(old) if old.meta().id() == new.meta().id() => Ok(()),
            Some(old) => {
                old.meta().set_force_necessary(true);
                unlink(child, old);
                let result = self.add_child(child, new);
                old.meta().set_force_necessary(false);
                self.check_if_unnecessary(old);
                result
            }
            None => self.add_child(child, new),
        }
    }

    //
    // Invalidity
    //

    fn should_be_invalidated(&self, node: &ErasedIncr) -> bool {
        let meta = node.meta();
        if !meta.valid() {
            return false;
        }
        if !meta.created_in().is_valid() {
            return true;
        }
        let parents = meta.parents.lock().values();
        parents.iter().any(|parent| !parent.meta().valid())
    }

    pub(crate) fn invalidate_node(&self, node: &ErasedIncr) {
        let meta = node.meta();
        if !meta.valid() {
            return;
        }
        tracing::debug!(node = %meta.describe(), "invalidating");
        let num = self.stabilization_num();
        meta.set_changed_at(num);
        meta.set_recomputed_at(num);
        if meta.is_necessary() {
            self.remove_parents(node);
            meta.set_height(meta.created_in().height() + 1);
        }
        node.invalidate_kind();
        meta.set_valid(false);
        let children = meta.children.lock().alive();
        let mut queue = self.propagate_invalidity.lock();
        for child in children {
            queue.push_back(child);
        }
        drop(queue);
        self.recompute_heap.remove(node);
    }

    /// Drain the invalidity queue: invalidate what must be, re-schedule the
    /// rest.
    pub(crate) fn propagate_invalidity(&self) {
        loop {
            let node = self.propagate_invalidity.lock().pop_front();
            let Some(node) = node else { break };
            let meta = node.meta();
            if !meta.valid() {
                continue;
            }
            if self.should_be_invalidated(&node) {
                self.invalidate_node(&node);
            } else if meta.in_graph() && meta.height_in_recompute_heap() == HEIGHT_UNSET {
                self.recompute_heap.add(node.clone());
            }
        }
    }

    //
    // Staleness
    //

    pub(crate) fn set_stale_erased(&self, node: &ErasedIncr) {
        let meta = node.meta();
        meta.set_set_at(self.stabilization_num() + 1);
        if meta.in_graph() && meta.height_in_recompute_heap() == HEIGHT_UNSET {
            self.recompute_heap.add(node.clone());
        }
    }

    pub(crate) fn stage_set_during_stabilization(&self, node: ErasedIncr) {
        self.set_during_stabilization.lock().push(node);
    }

    //
    // Recompute
    //

    pub(crate) fn fire_error_handlers(&self, ctx: &Context, node: &ErasedIncr, err: &GraphError) {
        let handlers = node.meta().on_error.lock().clone();
        for handler in handlers {
            handler(ctx, err);
        }
    }

    /// Recompute one node: cutoff first, then stabilize, then propagate to
    /// stale necessary children.
    pub(crate) fn recompute(&self, ctx: &Context, node: &ErasedIncr) -> Result<(), GraphError> {
        let meta = node.meta();
        self.num_nodes_recomputed.fetch_add(1, Ordering::SeqCst);
        meta.increment_recomputes();
        let num = self.stabilization_num();
        meta.set_recomputed_at(num);

        if let Err(err) = ctx.ensure_not_cancelled() {
            self.fire_error_handlers(ctx, node, &err);
            return Err(err);
        }

        if meta.caps().has_cutoff {
            match node.cutoff_erased(ctx) {
                Err(err) => {
                    self.fire_error_handlers(ctx, node, &err);
                    return Err(err);
                }
                Ok(true) => {
                    tracing::trace!(node = %meta.describe(), "cutoff");
                    return Ok(());
                }
                Ok(false) => {}
            }
        }

        tracing::trace!(node = %meta.describe(), "recomputing");
        self.num_nodes_changed.fetch_add(1, Ordering::SeqCst);
        meta.increment_changes();

        if meta.caps().has_stabilize {
            if let Err(err) = node.stabilize_erased(ctx) {
                self.fire_error_handlers(ctx, node, &err);
                if meta.caps().invalidates_on_error {
                    self.invalidate_node(node);
                    self.propagate_invalidity();
                }
                return Err(err);
            }
        }

        meta.set_changed_at(num);

        let update_handlers = meta.on_update.lock().clone();
        if !update_handlers.is_empty() {
            self.handle_after_stabilization
                .lock()
                .entry(meta.id())
                .or_default()
                .extend(update_handlers);
        }

        let children = meta.children.lock().alive();
        for child in children {
            let child_meta = child.meta();
            if child_meta.is_necessary()
                && child_meta.is_stale()
                && child_meta.height_in_recompute_heap() == HEIGHT_UNSET
            {
                self.recompute_heap.add(child);
            }
        }
        let observers = meta.observers.lock().alive();
        for observer in observers {
            let observer_meta = observer.meta();
            if observer_meta.is_stale()
                && observer_meta.height_in_recompute_heap() == HEIGHT_UNSET
            {
                self.recompute_heap.add(observer);
            }
        }
        Ok(())
    }
}
