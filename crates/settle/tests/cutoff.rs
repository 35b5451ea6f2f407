//! Cutoff nodes: short-circuit propagation.

use settle::{Context, Graph};

#[test]
fn test_cutoff_suppresses_small_changes() {
    let graph = Graph::new();
    let scope = graph.scope();
    let v = scope.var(3.0f64);
    let c = scope.cutoff(&v.incr(), |prev, next| (prev - next).abs() < 0.5);
    let m = scope.map(&c, |x| x * 2.0);
    let obs = graph.observe(&m).unwrap();

    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value(), Some(6.0));
    let computed_once = m.stats().recomputes;

    // Inside the cutoff window: the map never runs, the value holds.
    v.set(3.2);
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(m.stats().recomputes, computed_once);
    assert_eq!(obs.value(), Some(6.0));

    // Outside the window: propagation resumes.
    v.set(5.0);
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value(), Some(10.0));
    assert_eq!(m.stats().recomputes, computed_once + 1);
    graph.check_invariants().unwrap();
}

#[test]
fn test_cutoff_node_itself_still_recomputes() {
    let graph = Graph::new();
    let scope = graph.scope();
    let v = scope.var(10i64);
    let c = scope.cutoff(&v.incr(), |prev, next| prev == next);
    let obs = graph.observe(&c).unwrap();

    graph.stabilize(&Context::new()).unwrap();
    let first = c.stats();
    assert_eq!(first.recomputes, 1);
    assert_eq!(first.changes, 1);

    // Same value set again: the cutoff runs but registers no change.
    v.set(10);
    graph.stabilize(&Context::new()).unwrap();
    let second = c.stats();
    assert_eq!(second.recomputes, 2);
    assert_eq!(second.changes, 1);
    assert_eq!(obs.value(), Some(10));
}

#[test]
fn test_cutoff_value_tracks_last_accepted() {
    let graph = Graph::new();
    let scope = graph.scope();
    let v = scope.var(0.0f64);
    let c = scope.cutoff(&v.incr(), |prev, next| (prev - next).abs() < 1.0);
    let obs = graph.observe(&c).unwrap();

    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value(), Some(0.0));

    // Two sub-threshold nudges do not accumulate into an update.
    v.set(0.6);
    graph.stabilize(&Context::new()).unwrap();
    v.set(0.9);
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value(), Some(0.0));

    // A jump past the threshold (relative to the accepted value) lands.
    v.set(1.5);
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value(), Some(1.5));
}
