//! Pre-link cycle detection.

use std::collections::HashSet;

use crate::incr::Incr;
use crate::node::ErasedIncr;
use crate::{GraphError, Identifier};

/// Would linking `parent -> child` create a cycle?
///
/// Walks `parent`'s ancestry (its inputs, transitively) looking for
/// `child`; linking a node to itself is a cycle. Visited nodes are
/// memoized per call, so the walk is bounded by the reachable ancestor
/// set. Returns [`GraphError::CycleDetected`] with the offending path, and
/// leaves the graph untouched either way.
pub fn detect_cycle_if_linked<T, U>(child: &Incr<T>, parent: &Incr<U>) -> Result<(), GraphError> {
    detect_cycle_if_linked_erased(child.erased(), parent.erased())
}

pub(crate) fn detect_cycle_if_linked_erased(
    child: &ErasedIncr,
    parent: &ErasedIncr,
) -> Result<(), GraphError> {
    let child_id = child.meta().id();
    if parent.meta().id() == child_id {
        return Err(GraphError::CycleDetected {
            path: vec![child.meta().describe()],
        });
    }
    let mut seen: HashSet<Identifier, ahash::RandomState> = HashSet::default();
    let mut path = Vec::new();
    if ancestry_contains(parent, child_id, &mut seen, &mut path) {
        path.reverse();
        return Err(GraphError::CycleDetected { path });
    }
    Ok(())
}

/// Depth-first walk of `node`'s ancestry; on a hit, `path` holds the chain
/// from the needle up to `node` (in child-to-parent order).
fn ancestry_contains(
    node: &ErasedIncr,
    needle: Identifier,
    seen: &mut HashSet<Identifier, ahash::RandomState>,
    path: &mut Vec<String>,
) -> bool {
    if node.meta().id() == needle {
        path.push(node.meta().describe());
        return true;
    }
    if !seen.insert(node.meta().id()) {
        return false;
    }
    for parent in node.inputs() {
        if ancestry_contains(&parent, needle, seen, path) {
            path.push(node.meta().describe());
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Graph;

    #[test]
    fn test_no_cycle_in_a_chain() {
        let graph = Graph::new();
        let scope = graph.scope();
        let n1 = scope.mapn(vec![], |_values: &[std::sync::Arc<i64>]| 0i64);
        let n2 = scope.mapn(vec![n1.incr()], |_| 0i64);
        let n3 = scope.mapn(vec![n2.incr()], |_| 0i64);

        // Linking n3 as an input of a fresh sibling is fine.
        let n4 = scope.mapn(vec![], |_values: &[std::sync::Arc<i64>]| 0i64);
        detect_cycle_if_linked(&n4.incr(), &n3.incr()).unwrap();
    }

    #[test]
    fn test_rejects_back_edge() {
        let graph = Graph::new();
        let scope = graph.scope();
        let n1 = scope.mapn(vec![], |_values: &[std::sync::Arc<i64>]| 0i64);
        let n2 = scope.mapn(vec![n1.incr()], |_| 0i64);
        let n3 = scope.mapn(vec![n2.incr()], |_| 0i64);

        let err = detect_cycle_if_linked(&n1.incr(), &n3.incr()).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
        // The graph is unchanged: the link was never made.
        assert!(n1.incr().erased().meta().parents.lock().is_empty());
    }

    #[test]
    fn test_rejects_self_link() {
        let graph = Graph::new();
        let scope = graph.scope();
        let n = scope.mapn(vec![], |_values: &[std::sync::Arc<i64>]| 0i64);
        let err = detect_cycle_if_linked(&n.incr(), &n.incr()).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn test_add_input_refuses_cycles() {
        let graph = Graph::new();
        let scope = graph.scope();
        let n1 = scope.mapn(vec![], |values: &[std::sync::Arc<i64>]| {
            values.iter().map(|v| **v).sum::<i64>()
        });
        let n2 = scope.mapn(vec![n1.incr()], |values| {
            values.iter().map(|v| **v).sum::<i64>()
        });

        assert!(n1.add_input(&n2.incr()).is_err());
        assert!(n2.add_input(&n2.incr()).is_err());
    }
}
