//! Bind nodes: swap a whole subgraph based on an input's value.

use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::cycle::detect_cycle_if_linked_erased;
use crate::incr::Incr;
use crate::node::{link, ErasedIncr, ErasedNode, NodeCaps, NodeMeta, HEIGHT_UNSET};
use crate::scope::Scope;
use crate::{Context, GraphError};

impl Scope {
    /// A node whose output is another node, chosen by `f` from the current
    /// value of `input`.
    ///
    /// `f` receives the bind's right-hand-side [`Scope`]; nodes it builds
    /// must be constructed through that scope so their heights sit above
    /// the bind and their lifetime follows the bind's validity. When `f`
    /// returns a different node than last time, the old subgraph is
    /// detached (and collapses unless anchored elsewhere) and the new one
    /// is discovered, heights repaired, and scheduled.
    pub fn bind<A, B>(
        &self,
        input: &Incr<A>,
        f: impl Fn(&Scope, &A) -> Incr<B> + Send + Sync + 'static,
    ) -> Incr<B>
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
    {
        self.bind_ctx(input, move |_ctx, scope, value| Ok(f(scope, value)))
    }

    /// Like [`bind`](Scope::bind), but the function is fallible and
    /// cancellation-aware.
    ///
    /// An error from `f` aborts the pass, fires the node's on-error
    /// handlers, and invalidates the bind: its descendants detach and the
    /// node stops participating until rebuilt.
    pub fn bind_ctx<A, B>(
        &self,
        input: &Incr<A>,
        f: impl Fn(&Context, &Scope, &A) -> Result<Incr<B>, GraphError> + Send + Sync + 'static,
    ) -> Incr<B>
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
    {
        let meta = NodeMeta::new(
            "bind",
            self.clone(),
            NodeCaps {
                has_stabilize: true,
                invalidates_on_error: true,
                ..Default::default()
            },
        );
        let rhs_scope = self.bind_rhs(&meta);
        let node = Arc::new_cyclic(|weak: &Weak<BindNode<A, B>>| BindNode {
            self_weak: weak.clone(),
            meta,
            input: input.clone(),
            f: Box::new(f),
            rhs_scope,
            bound: Mutex::new(None),
        });
        let erased: ErasedIncr = node.clone();
        link(&erased, input.erased());
        Incr::from_erased(erased)
    }
}

struct BindNode<A, B> {
    self_weak: Weak<BindNode<A, B>>,
    meta: Arc<NodeMeta>,
    input: Incr<A>,
    f: Box<dyn Fn(&Context, &Scope, &A) -> Result<Incr<B>, GraphError> + Send + Sync>,
    rhs_scope: Scope,
    /// The node currently produced by the bind function, linked as a
    /// parent of this node.
    bound: Mutex<Option<Incr<B>>>,
}

impl<A, B> ErasedNode for BindNode<A, B>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
{
    fn meta(&self) -> &Arc<NodeMeta> {
        &self.meta
    }

    fn inputs(&self) -> Vec<ErasedIncr> {
        let mut inputs = vec![self.input.erased().clone()];
        if let Some(bound) = self.bound.lock().as_ref() {
            inputs.push(bound.erased().clone());
        }
        inputs
    }

    fn stabilize_erased(&self, ctx: &Context) -> Result<(), GraphError> {
        let graph = self
            .meta
            .graph()
            .ok_or_else(|| GraphError::MissingDependency {
                description: format!("{} has no graph", self.meta.describe()),
            })?;
        let input_value =
            self.input
                .value_arc()
                .ok_or_else(|| GraphError::MissingDependency {
                    description: format!("input of {} has no value yet", self.meta.describe()),
                })?;

        let new = (self.f)(ctx, &self.rhs_scope, &input_value)?;
        let old = self.bound.lock().clone();

        if let Some(old) = &old {
            if old.id() == new.id() {
                // Same bound node; nothing to relink.
                return Ok(());
            }
        }

        let this = self
            .self_weak
            .upgrade()
            .map(|node| node as ErasedIncr)
            .ok_or_else(|| GraphError::MissingDependency {
                description: "bind node dropped mid-stabilization".to_string(),
            })?;
        let new_erased = new.erased().clone();
        let old_erased = old.as_ref().map(|o| o.erased().clone());

        tracing::debug!(
            bind = %self.meta.describe(),
            old = ?old_erased.as_ref().map(|o| o.meta().describe()),
            new = %new_erased.meta().describe(),
            "bind swapping"
        );

        detect_cycle_if_linked_erased(&this, &new_erased)?;
        graph.change_parent(&this, old_erased.as_ref(), &new_erased)?;

        // Re-anchor this bind's observers onto the new subgraph before
        // stripping them from the old, so shared nodes stay put.
        let observers = self.meta.observers.lock().alive();
        for observer in &observers {
            graph.discover_nodes(Some(observer), &new_erased)?;
        }
        if let Some(old_erased) = &old_erased {
            for observer in &observers {
                graph.undiscover_nodes(observer, old_erased);
            }
        }

        let num = graph.stabilization_num();
        new_erased.meta().set_changed_at(num);
        if new_erased.meta().height_in_recompute_heap() == HEIGHT_UNSET {
            graph.recompute_heap.add(new_erased);
        }
        self.meta.set_bound_at(num);
        *self.bound.lock() = Some(new);
        Ok(())
    }

    fn value_dyn(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.bound
            .lock()
            .as_ref()
            .and_then(|bound| bound.erased().value_dyn())
    }

    fn invalidate_kind(&self) {
        // Unbind: strip this bind's anchors from the old subgraph so it
        // collapses unless something else still observes it.
        let old = self.bound.lock().take();
        if let (Some(old), Some(graph)) = (old, self.meta.graph()) {
            let observers = self.meta.observers.lock().alive();
            for observer in &observers {
                graph.undiscover_nodes(observer, old.erased());
            }
        }
    }
}
