//! Constant nodes.

use std::any::Any;
use std::sync::Arc;

use crate::incr::Incr;
use crate::node::{ErasedIncr, ErasedNode, NodeCaps, NodeMeta};
use crate::scope::Scope;

impl Scope {
    /// A node holding a fixed value.
    ///
    /// Its stabilize is a no-op, so it computes once (stamping
    /// `changed_at` on the first pass) and never again.
    pub fn constant<T>(&self, value: T) -> Incr<T>
    where
        T: Send + Sync + 'static,
    {
        let node = Arc::new(ConstantNode {
            meta: NodeMeta::new(
                "constant",
                self.clone(),
                NodeCaps {
                    has_stabilize: true,
                    ..Default::default()
                },
            ),
            value: Arc::new(value),
        });
        Incr::from_erased(node)
    }
}

struct ConstantNode<T> {
    meta: Arc<NodeMeta>,
    value: Arc<T>,
}

impl<T: Send + Sync + 'static> ErasedNode for ConstantNode<T> {
    fn meta(&self) -> &Arc<NodeMeta> {
        &self.meta
    }

    fn inputs(&self) -> Vec<ErasedIncr> {
        Vec::new()
    }

    fn value_dyn(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        Some(self.value.clone())
    }
}
