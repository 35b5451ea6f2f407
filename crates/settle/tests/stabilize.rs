//! End-to-end stabilization: constants, maps, vars, handlers, errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use settle::{Context, Graph, GraphError};

#[test]
fn test_map2_over_constants() {
    let graph = Graph::new();
    let scope = graph.scope();
    let foo = scope.constant("foo".to_string());
    let bar = scope.constant("bar".to_string());
    let joined = scope.map2(&foo, &bar, |a, b| format!("{a} {b}"));
    let obs = graph.observe(&joined).unwrap();

    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value().as_deref(), Some("foo bar"));
    graph.check_invariants().unwrap();
}

#[test]
fn test_var_propagation_and_idempotence() {
    let graph = Graph::new();
    let scope = graph.scope();
    let v = scope.var("hello".to_string());
    let m = scope.map(&v.incr(), |x| format!("not {x}"));
    let obs = graph.observe(&m).unwrap();

    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value().as_deref(), Some("not hello"));

    v.set("x".to_string());
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value().as_deref(), Some("not x"));
    let after_set = m.stats().recomputes;

    // A pass with no mutations recomputes nothing.
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(m.stats().recomputes, after_set);
    graph.check_invariants().unwrap();
}

#[test]
fn test_map3_and_mapn() {
    let graph = Graph::new();
    let scope = graph.scope();
    let a = scope.var(1i64);
    let b = scope.var(2i64);
    let c = scope.var(3i64);
    let summed = scope.map3(&a.incr(), &b.incr(), &c.incr(), |x, y, z| x + y + z);

    let spread = scope.mapn(vec![a.incr(), b.incr(), c.incr()], |values| {
        let max = values.iter().map(|v| **v).max().unwrap_or(0);
        let min = values.iter().map(|v| **v).min().unwrap_or(0);
        max - min
    });

    let sum_obs = graph.observe(&summed).unwrap();
    let spread_obs = graph.observe(&spread.incr()).unwrap();

    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(sum_obs.value(), Some(6));
    assert_eq!(spread_obs.value(), Some(2));

    b.set(10);
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(sum_obs.value(), Some(14));
    assert_eq!(spread_obs.value(), Some(9));
    graph.check_invariants().unwrap();
}

#[test]
fn test_mapn_add_input_while_observed() {
    let graph = Graph::new();
    let scope = graph.scope();
    let a = scope.var(1i64);
    let total = scope.mapn(vec![a.incr()], |values| {
        values.iter().map(|v| **v).sum::<i64>()
    });
    let obs = graph.observe(&total.incr()).unwrap();

    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value(), Some(1));

    let b = scope.var(10i64);
    total.add_input(&b.incr()).unwrap();
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value(), Some(11));
    graph.check_invariants().unwrap();
}

#[test]
fn test_shared_input_diamond() {
    let graph = Graph::new();
    let scope = graph.scope();
    let v = scope.var(2i64);
    let left = scope.map(&v.incr(), |x| x + 1);
    let right = scope.map(&v.incr(), |x| x * 10);
    let joined = scope.map2(&left, &right, |l, r| l + r);
    let obs = graph.observe(&joined).unwrap();

    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value(), Some(23));

    // One set recomputes the whole diamond exactly once per node.
    v.set(3);
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value(), Some(34));
    assert_eq!(joined.stats().recomputes, 2);
    graph.check_invariants().unwrap();
}

#[test]
fn test_set_during_stabilization_applies_at_end_of_pass() {
    let graph = Graph::new();
    let scope = graph.scope();
    let v = scope.var(1i64);
    let m = scope.map(&v.incr(), |x| *x);
    let obs = graph.observe(&m).unwrap();

    // The map's function runs mid-pass; setting the var from inside it
    // must not take effect until the pass finishes.
    let v_inner = v.clone();
    let fired = Arc::new(AtomicU64::new(0));
    let fired_inner = fired.clone();
    let probe = scope.map(&v.incr(), move |x| {
        if fired_inner.fetch_add(1, Ordering::SeqCst) == 0 {
            v_inner.set(99);
        }
        *x
    });
    let probe_obs = graph.observe(&probe).unwrap();

    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value(), Some(1));
    assert_eq!(probe_obs.value(), Some(1));
    assert_eq!(v.value(), 99);

    // The staged set is stale for the next pass.
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value(), Some(99));
    graph.check_invariants().unwrap();
}

#[test]
fn test_on_update_fires_after_pass() {
    let graph = Graph::new();
    let scope = graph.scope();
    let v = scope.var(1i64);
    let m = scope.map(&v.incr(), |x| x * 2);
    let obs = graph.observe(&m).unwrap();

    let updates = Arc::new(AtomicU64::new(0));
    let updates_inner = updates.clone();
    m.on_update(move |_ctx| {
        updates_inner.fetch_add(1, Ordering::SeqCst);
    });

    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(updates.load(Ordering::SeqCst), 1);

    // No change, no recompute, no update handler.
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(updates.load(Ordering::SeqCst), 1);

    v.set(2);
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(updates.load(Ordering::SeqCst), 2);
    drop(obs);
}

#[test]
fn test_stabilization_start_and_end_handlers() {
    let graph = Graph::new();
    let scope = graph.scope();
    let v = scope.var(1i64);
    let obs = graph.observe(&v.incr()).unwrap();

    let starts = Arc::new(AtomicU64::new(0));
    let ends = Arc::new(AtomicU64::new(0));
    let starts_inner = starts.clone();
    let ends_inner = ends.clone();
    graph.on_stabilization_start(move |_ctx| {
        starts_inner.fetch_add(1, Ordering::SeqCst);
    });
    graph.on_stabilization_end(move |_ctx, _started, err| {
        assert!(err.is_none());
        ends_inner.fetch_add(1, Ordering::SeqCst);
    });

    graph.stabilize(&Context::new()).unwrap();
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    assert_eq!(ends.load(Ordering::SeqCst), 2);
    drop(obs);
}

#[test]
fn test_stabilize_inside_update_handler_is_rejected() {
    let graph = Graph::new();
    let scope = graph.scope();
    let v = scope.var(1i64);
    let obs = graph.observe(&v.incr()).unwrap();

    let saw_already_stabilizing = Arc::new(AtomicU64::new(0));
    let saw = saw_already_stabilizing.clone();
    let reentrant = graph.clone();
    v.incr().on_update(move |ctx| {
        if matches!(
            reentrant.stabilize(ctx),
            Err(GraphError::AlreadyStabilizing)
        ) {
            saw.fetch_add(1, Ordering::SeqCst);
        }
    });

    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(saw_already_stabilizing.load(Ordering::SeqCst), 1);
    assert!(!graph.is_stabilizing());
    drop(obs);
}

#[test]
fn test_cancellation_aborts_the_pass() {
    let graph = Graph::new();
    let scope = graph.scope();
    let ctx = Context::new();

    let v = scope.var(1i64);
    // The first map cancels mid-pass; the map above it surfaces the
    // cancellation through its error path.
    let cancel_ctx = ctx.clone();
    let tripwire = scope.map(&v.incr(), move |x| {
        cancel_ctx.cancel();
        *x
    });
    let downstream = scope.map(&tripwire, |x| x + 100);
    let obs = graph.observe(&downstream).unwrap();

    let errors = Arc::new(AtomicU64::new(0));
    let errors_inner = errors.clone();
    downstream.on_error(move |_ctx, err| {
        assert!(matches!(err, GraphError::Cancelled));
        errors_inner.fetch_add(1, Ordering::SeqCst);
    });

    let err = graph.stabilize(&ctx).unwrap_err();
    assert!(matches!(err, GraphError::Cancelled));
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(obs.value(), None);

    // Queued work survives; a fresh context resumes it.
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value(), Some(101));
}

#[test]
fn test_always_node_reruns_each_pass() {
    let graph = Graph::new();
    let scope = graph.scope();
    let v = scope.var(1i64);
    let m = scope.map(&v.incr(), |x| *x);
    let obs = graph.observe(&m).unwrap();
    m.set_always(true);

    graph.stabilize(&Context::new()).unwrap();
    let first = m.stats().recomputes;
    graph.stabilize(&Context::new()).unwrap();
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(m.stats().recomputes, first + 2);
    drop(obs);
}

#[test]
fn test_var_value_readable_before_observation() {
    let graph = Graph::new();
    let scope = graph.scope();
    let v = scope.var(5i64);
    assert_eq!(v.value(), 5);
    assert_eq!(v.incr().value(), Some(5));

    v.set(6);
    assert_eq!(v.value(), 6);
    // Unobserved: nothing is scheduled.
    assert_eq!(graph.stats().nodes, 0);
}

#[test]
fn test_set_internal_bypasses_staleness() {
    let graph = Graph::new();
    let scope = graph.scope();
    let v = scope.var(1i64);
    let m = scope.map(&v.incr(), |x| *x);
    let obs = graph.observe(&m).unwrap();
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value(), Some(1));

    v.set_internal(42);
    graph.stabilize(&Context::new()).unwrap();
    // The dependent did not recompute; the raw value moved regardless.
    assert_eq!(obs.value(), Some(1));
    assert_eq!(v.value(), 42);

    graph.set_stale(&v.incr());
    graph.stabilize(&Context::new()).unwrap();
    assert_eq!(obs.value(), Some(42));
}
