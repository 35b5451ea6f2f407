//! Cutoff nodes: short-circuit propagation.

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::incr::Incr;
use crate::node::{link, ErasedIncr, ErasedNode, NodeCaps, NodeMeta};
use crate::scope::Scope;
use crate::{Context, GraphError};

impl Scope {
    /// Pass `input` through, but stop downstream recomputation while
    /// `eq(previous, latest)` holds.
    ///
    /// When the cutoff fires, the node's `changed_at` is left untouched, so
    /// children never become stale through this edge.
    pub fn cutoff<T>(
        &self,
        input: &Incr<T>,
        eq: impl Fn(&T, &T) -> bool + Send + Sync + 'static,
    ) -> Incr<T>
    where
        T: Send + Sync + 'static,
    {
        let node = Arc::new(CutoffNode {
            meta: NodeMeta::new(
                "cutoff",
                self.clone(),
                NodeCaps {
                    has_stabilize: true,
                    has_cutoff: true,
                    ..Default::default()
                },
            ),
            input: input.clone(),
            eq: Box::new(eq),
            value: RwLock::new(None),
        });
        let erased: ErasedIncr = node.clone();
        link(&erased, input.erased());
        Incr::from_erased(erased)
    }
}

struct CutoffNode<T> {
    meta: Arc<NodeMeta>,
    input: Incr<T>,
    eq: Box<dyn Fn(&T, &T) -> bool + Send + Sync>,
    value: RwLock<Option<Arc<T>>>,
}

impl<T: Send + Sync + 'static> ErasedNode for CutoffNode<T> {
    fn meta(&self) -> &Arc<NodeMeta> {
        &self.meta
    }

    fn inputs(&self) -> Vec<ErasedIncr> {
        vec![self.input.erased().clone()]
    }

    fn stabilize_erased(&self, _ctx: &Context) -> Result<(), GraphError> {
        let latest = self.input.value_arc().ok_or_else(|| {
            GraphError::MissingDependency {
                description: format!("input of {} has no value yet", self.meta.describe()),
            }
        })?;
        *self.value.write() = Some(latest);
        Ok(())
    }

    fn cutoff_erased(&self, _ctx: &Context) -> Result<bool, GraphError> {
        let previous = self.value.read().clone();
        match (previous, self.input.value_arc()) {
            (Some(previous), Some(latest)) => Ok((self.eq)(&previous, &latest)),
            _ => Ok(false),
        }
    }

    fn value_dyn(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.value
            .read()
            .clone()
            .map(|value| value as Arc<dyn Any + Send + Sync>)
    }
}
