//! Observation lifecycle: anchoring, unobservation, re-observation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use settle::{Context, Graph};

#[test]
fn test_unobserve_detaches_a_disjoint_subgraph() {
    let graph = Graph::new();
    let scope = graph.scope();

    let v0 = scope.var(1i64);
    let m0 = scope.map(&v0.incr(), |x| x + 1);
    let o0 = graph.observe(&m0).unwrap();

    let v1 = scope.var(10i64);
    let m1 = scope.map(&v1.incr(), |x| x + 1);
    let o1 = graph.observe(&m1).unwrap();

    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(o0.value(), Some(2));
    assert_eq!(o1.value(), Some(11));

    o1.unobserve();
    assert!(!graph.has(&m1));
    assert!(!graph.has(&v1.incr()));
    assert!(!graph.has_observer(&o1));
    assert!(graph.has(&m0));

    // Sets on the detached subgraph do not reach the dead observer.
    v1.set(100);
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(o1.value(), None);
    let m1_runs = m1.stats().recomputes;

    // The live observer still works.
    v0.set(5);
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(o0.value(), Some(6));
    assert_eq!(m1.stats().recomputes, m1_runs);
    graph.check_invariants().unwrap();
}

#[test]
fn test_unobserve_keeps_shared_nodes_for_other_observers() {
    let graph = Graph::new();
    let scope = graph.scope();

    let shared = scope.var(1i64);
    let left = scope.map(&shared.incr(), |x| x + 1);
    let right = scope.map(&shared.incr(), |x| x * 10);
    let o_left = graph.observe(&left).unwrap();
    let o_right = graph.observe(&right).unwrap();

    graph.stabilize(&Context::new()).unwrap();

    o_right.unobserve();
    assert!(!graph.has(&right));
    assert!(graph.has(&shared.incr()));
    assert!(graph.has(&left));

    shared.set(2);
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(o_left.value(), Some(3));
    graph.check_invariants().unwrap();
}

#[test]
fn test_reobservation_reinitializes() {
    let graph = Graph::new();
    let scope = graph.scope();
    let v = scope.var(1i64);
    let m = scope.map(&v.incr(), |x| x * 2);

    let o1 = graph.observe(&m).unwrap();
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(o1.value(), Some(2));
    o1.unobserve();
    assert!(!graph.has(&m));

    // A set while unobserved lands once the node is re-observed.
    v.set(21);
    let o2 = graph.observe(&m).unwrap();
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(o2.value(), Some(42));
    graph.check_invariants().unwrap();
}

#[test]
fn test_unobserve_is_idempotent() {
    let graph = Graph::new();
    let scope = graph.scope();
    let v = scope.var(1i64);
    let obs = graph.observe(&v.incr()).unwrap();
    graph.stabilize(&Context::new()).unwrap();

    obs.unobserve();
    obs.unobserve();
    assert_eq!(obs.value(), None);
    assert_eq!(graph.stats().nodes, 0);
}

#[test]
fn test_observed_and_unobserved_handlers() {
    let graph = Graph::new();
    let scope = graph.scope();
    let v = scope.var(1i64);
    let m = scope.map(&v.incr(), |x| *x);

    let observed = Arc::new(AtomicU64::new(0));
    let unobserved = Arc::new(AtomicU64::new(0));
    let observed_inner = observed.clone();
    let unobserved_inner = unobserved.clone();
    v.incr().on_observed(move |_observer_id| {
        observed_inner.fetch_add(1, Ordering::SeqCst);
    });
    v.incr().on_unobserved(move |_observer_id| {
        unobserved_inner.fetch_add(1, Ordering::SeqCst);
    });

    // Observing the map anchors the var transitively.
    let obs = graph.observe(&m).unwrap();
    assert_eq!(observed.load(Ordering::SeqCst), 1);
    graph.stabilize(&Context::new()).unwrap();

    obs.unobserve();
    assert_eq!(unobserved.load(Ordering::SeqCst), 1);
}

#[test]
fn test_two_observers_on_one_node() {
    let graph = Graph::new();
    let scope = graph.scope();
    let v = scope.var(7i64);
    let o1 = graph.observe(&v.incr()).unwrap();
    let o2 = graph.observe(&v.incr()).unwrap();

    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(o1.value(), Some(7));
    assert_eq!(o2.value(), Some(7));

    o1.unobserve();
    assert!(graph.has(&v.incr()));

    v.set(8);
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(o1.value(), None);
    assert_eq!(o2.value(), Some(8));
    graph.check_invariants().unwrap();
}
