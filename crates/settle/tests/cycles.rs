//! Cycle rejection at link time.

use std::sync::Arc;

use settle::{detect_cycle_if_linked, Context, Graph, GraphError};

fn sum(values: &[Arc<i64>]) -> i64 {
    values.iter().map(|v| **v).sum()
}

#[test]
fn test_detect_cycle_in_chain() {
    let graph = Graph::new();
    let scope = graph.scope();
    let n1 = scope.mapn(vec![], sum);
    let n2 = scope.mapn(vec![n1.incr()], sum);
    let n3 = scope.mapn(vec![n2.incr()], sum);

    // Linking n3 beneath n1 closes the loop.
    let err = detect_cycle_if_linked(&n1.incr(), &n3.incr()).unwrap_err();
    match err {
        GraphError::CycleDetected { path } => assert!(path.len() >= 2),
        other => panic!("expected a cycle, got {other}"),
    }

    // The probe left the graph untouched: the edge does not exist.
    assert_eq!(n1.incr().stats().parents, 0);
    assert_eq!(n3.incr().stats().children, 0);

    // An edge between disconnected branches is fine.
    let n4 = scope.mapn(vec![], sum);
    detect_cycle_if_linked(&n4.incr(), &n3.incr()).unwrap();
}

#[test]
fn test_detect_cycle_across_branches() {
    let graph = Graph::new();
    let scope = graph.scope();
    let root = scope.mapn(vec![], sum);
    let trunk = scope.mapn(vec![root.incr()], sum);

    let branch_a = scope.mapn(vec![trunk.incr()], sum);
    let tip_a = scope.mapn(vec![branch_a.incr()], sum);

    let branch_b = scope.mapn(vec![trunk.incr()], sum);
    let tip_b = scope.mapn(vec![branch_b.incr()], sum);

    assert!(detect_cycle_if_linked(&trunk.incr(), &tip_a.incr()).is_err());
    assert!(detect_cycle_if_linked(&trunk.incr(), &tip_b.incr()).is_err());
    assert!(detect_cycle_if_linked(&root.incr(), &tip_b.incr()).is_err());
    // Cross-branch edges do not cycle.
    assert!(detect_cycle_if_linked(&tip_a.incr(), &tip_b.incr()).is_ok());
    assert!(detect_cycle_if_linked(&tip_b.incr(), &tip_a.incr()).is_ok());
}

#[test]
fn test_bind_returning_own_ancestor_fails_the_pass() {
    let graph = Graph::new();
    let scope = graph.scope();
    let loop_back = scope.var(false);

    // Once flipped, the bind function returns a map over the bind itself.
    let slot: Arc<parking_lot::Mutex<Option<settle::Incr<i64>>>> =
        Arc::new(parking_lot::Mutex::new(None));
    let slot_inner = slot.clone();
    let b = scope.bind(&loop_back.incr(), move |rhs, loop_back| {
        if *loop_back {
            let this = slot_inner.lock().clone().unwrap();
            rhs.map(&this, |x| *x)
        } else {
            rhs.constant(0i64)
        }
    });
    *slot.lock() = Some(b.clone());
    let obs = graph.observe(&b).unwrap();

    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value(), Some(0));

    loop_back.set(true);
    let err = graph.stabilize(&Context::new()).unwrap_err();
    assert!(matches!(err, GraphError::CycleDetected { .. }));
}
