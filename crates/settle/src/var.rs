//! Variable nodes: the settable inputs of a graph.

use std::any::Any;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::graph::STATUS_NOT_STABILIZING;
use crate::incr::Incr;
use crate::node::{ErasedIncr, ErasedNode, NodeCaps, NodeMeta};
use crate::scope::Scope;
use crate::{Context, GraphError, Identifier};

impl Scope {
    /// A settable input node.
    pub fn var<T>(&self, value: T) -> Var<T>
    where
        T: Send + Sync + 'static,
    {
        let node = Arc::new(VarNode {
            meta: NodeMeta::new(
                "var",
                self.clone(),
                NodeCaps {
                    has_stabilize: true,
                    ..Default::default()
                },
            ),
            value: RwLock::new(Arc::new(value)),
            staged: Mutex::new(None),
        });
        Var { node }
    }
}

/// Handle to a variable node.
///
/// [`set`](Var::set) schedules dependents for the next stabilization. Use
/// [`incr`](Var::incr) to pass the variable as an input to other nodes.
pub struct Var<T> {
    node: Arc<VarNode<T>>,
}

impl<T> Clone for Var<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Var<T> {
    /// The variable as a graph input.
    pub fn incr(&self) -> Incr<T> {
        Incr::from_erased(self.node.clone() as ErasedIncr)
    }

    pub fn id(&self) -> Identifier {
        self.node.meta.id()
    }

    /// The variable's current value.
    ///
    /// A value set during stabilization stays staged until the pass ends,
    /// so reads from inside the pass see the pre-set value.
    pub fn value(&self) -> T
    where
        T: Clone,
    {
        (*self.node.value.read()).as_ref().clone()
    }

    /// Set the variable.
    ///
    /// Outside stabilization the value is applied immediately, the node is
    /// marked stale for the next pass, and scheduled if the variable is
    /// observed. During stabilization the value is staged and applied once
    /// the running pass finishes, taking effect on the pass after it.
    ///
    /// Safe to call from any thread.
    pub fn set(&self, value: T) {
        let erased: ErasedIncr = self.node.clone();
        match self.node.meta.graph() {
            Some(graph) if graph.status() != STATUS_NOT_STABILIZING => {
                *self.node.staged.lock() = Some(Arc::new(value));
                graph.stage_set_during_stabilization(erased);
            }
            Some(graph) => {
                *self.node.value.write() = Arc::new(value);
                graph.set_stale_erased(&erased);
            }
            None => {
                *self.node.value.write() = Arc::new(value);
            }
        }
    }

    /// Replace the underlying value without marking the variable stale.
    ///
    /// An expert back-door for rebuilding graph state (e.g. after
    /// deserializing inputs): dependents are *not* scheduled and will keep
    /// their current values until something else makes them stale. Prefer
    /// [`set`](Var::set) everywhere else.
    pub fn set_internal(&self, value: T) {
        *self.node.value.write() = Arc::new(value);
    }
}

impl<T> std::fmt::Debug for Var<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.node.meta.describe())
    }
}

struct VarNode<T> {
    meta: Arc<NodeMeta>,
    value: RwLock<Arc<T>>,
    /// Value set during a stabilization pass, applied at end of pass.
    staged: Mutex<Option<Arc<T>>>,
}

impl<T: Send + Sync + 'static> ErasedNode for VarNode<T> {
    fn meta(&self) -> &Arc<NodeMeta> {
        &self.meta
    }

    fn inputs(&self) -> Vec<ErasedIncr> {
        Vec::new()
    }

    fn stabilize_erased(&self, _ctx: &Context) -> Result<(), GraphError> {
        if let Some(staged) = self.staged.lock().take() {
            *self.value.write() = staged;
        }
        Ok(())
    }

    fn value_dyn(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        Some(self.value.read().clone())
    }
}
