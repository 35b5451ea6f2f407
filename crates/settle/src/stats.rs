//! Node and graph statistics.

use std::sync::atomic::Ordering;

use crate::graph::Graph;
use crate::incr::Incr;

/// Counters for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeStats {
    /// Times the node was recomputed.
    pub recomputes: u64,
    /// Times a recompute actually changed the node (cutoffs excluded).
    pub changes: u64,
    /// Currently linked parents.
    pub parents: usize,
    /// Currently linked children.
    pub children: usize,
}

/// Counters for a whole graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GraphStats {
    /// The current stabilization number.
    pub stabilization_num: u64,
    /// Nodes (and observers) currently in the graph.
    pub nodes: u64,
    /// Recomputes across the graph's history.
    pub nodes_recomputed: u64,
    /// Changes across the graph's history.
    pub nodes_changed: u64,
}

impl<T> Incr<T> {
    /// A snapshot of this node's counters.
    pub fn stats(&self) -> NodeStats {
        let meta = self.erased().meta();
        NodeStats {
            recomputes: meta.num_recomputes(),
            changes: meta.num_changes(),
            parents: meta.parents.lock().len(),
            children: meta.children.lock().len_alive(),
        }
    }
}

impl Graph {
    /// A snapshot of this graph's counters.
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            stabilization_num: self.state.stabilization_num(),
            nodes: self.state.num_nodes.load(Ordering::SeqCst),
            nodes_recomputed: self.state.num_nodes_recomputed.load(Ordering::SeqCst),
            nodes_changed: self.state.num_nodes_changed.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Context, Graph};

    #[test]
    fn test_counters_track_recomputes_and_changes() {
        let graph = Graph::new();
        let scope = graph.scope();
        let v = scope.var(1i64);
        let m = scope.map(&v.incr(), |x| x * 10);
        let obs = graph.observe(&m).unwrap();

        graph.stabilize(&Context::new()).unwrap();
        let first = m.stats();
        assert_eq!(first.recomputes, 1);
        assert_eq!(first.changes, 1);
        assert_eq!(first.parents, 1);

        v.set(2);
        graph.stabilize(&Context::new()).unwrap();
        let second = m.stats();
        assert_eq!(second.recomputes, 2);

        let graph_stats = graph.stats();
        assert!(graph_stats.stabilization_num >= 3);
        assert!(graph_stats.nodes_recomputed >= 4);
        assert_eq!(graph_stats.nodes, 3);
        drop(obs);
    }
}
