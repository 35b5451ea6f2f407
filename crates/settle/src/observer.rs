//! Observer nodes: the sinks that anchor a subgraph for computation.

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::graph::Graph;
use crate::incr::Incr;
use crate::node::{link, unlink, ErasedIncr, ErasedNode, NodeCaps, NodeMeta};
use crate::{GraphError, Identifier};

impl Graph {
    /// Observe `input`: pull it and everything it transitively reads from
    /// into the active computation.
    ///
    /// The returned [`Observer`] mirrors the input's value and keeps the
    /// subgraph necessary until [`Observer::unobserve`] is called.
    ///
    /// Fails with [`GraphError::HeightTooLarge`] if discovery pushes a node
    /// past the graph's maximum height.
    pub fn observe<T>(&self, input: &Incr<T>) -> Result<Observer<T>, GraphError>
    where
        T: Send + Sync + 'static,
    {
        let node = Arc::new(ObserverNode {
            meta: NodeMeta::new(
                "observer",
                self.scope(),
                NodeCaps {
                    is_observer: true,
                    ..Default::default()
                },
            ),
            input: RwLock::new(Some(input.clone())),
        });
        let erased: ErasedIncr = node.clone();
        link(&erased, input.erased());
        self.state.add_observer_node(&erased);
        self.state.discover_nodes(Some(&erased), input.erased())?;
        self.state.propagate_invalidity();
        self.state
            .adjust_heights_heap
            .set_height(&erased, input.erased().meta().height() + 1)?;
        self.state.recompute_heap.add(erased);
        Ok(Observer { node })
    }

    /// Whether the graph still holds the given observer.
    pub fn has_observer<T>(&self, observer: &Observer<T>) -> bool {
        self.state
            .observers
            .lock()
            .contains(observer.node.meta.id())
    }
}

/// Handle to an observer node.
///
/// Dropping the handle does not unobserve: the graph keeps the observer
/// (and the subgraph it anchors) until [`Observer::unobserve`] runs.
pub struct Observer<T> {
    node: Arc<ObserverNode<T>>,
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Observer<T> {
    pub fn id(&self) -> Identifier {
        self.node.meta.id()
    }

    /// The observed value: the input's value, or `None` once unobserved
    /// (or before the first stabilization).
    pub fn value(&self) -> Option<T>
    where
        T: Clone,
    {
        self.incr().value()
    }

    /// The observer as a node handle (for labels and handlers).
    pub fn incr(&self) -> Incr<T> {
        Incr::from_erased(self.node.clone() as ErasedIncr)
    }

    /// Detach this observer, letting the subgraph it anchored collapse out
    /// of the active computation.
    ///
    /// Nodes that no other observer reaches leave the graph: their heights
    /// and timestamps reset, and a later re-observation re-initializes
    /// them. Idempotent.
    pub fn unobserve(&self) {
        let input = self.node.input.write().take();
        let Some(input) = input else { return };
        let erased: ErasedIncr = self.node.clone();
        if let Some(graph) = self.node.meta.graph() {
            unlink(&erased, input.erased());
            graph.undiscover_nodes(&erased, input.erased());
            graph.remove_observer_node(&erased);
        }
    }
}

impl<T> std::fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.node.meta.describe())
    }
}

struct ObserverNode<T> {
    meta: Arc<NodeMeta>,
    /// Cleared on unobserve; the observer then reads as `None`.
    input: RwLock<Option<Incr<T>>>,
}

impl<T: Send + Sync + 'static> ErasedNode for ObserverNode<T> {
    fn meta(&self) -> &Arc<NodeMeta> {
        &self.meta
    }

    fn inputs(&self) -> Vec<ErasedIncr> {
        self.input
            .read()
            .as_ref()
            .map(|input| vec![input.erased().clone()])
            .unwrap_or_default()
    }

    fn value_dyn(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.input
            .read()
            .as_ref()
            .and_then(|input| input.erased().value_dyn())
    }
}
