//! Fuzz execution engine: mutation cycles, validation, concurrency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use settle::Context;

use crate::config::FuzzConfig;
use crate::generator::{build, BuiltGraph, GraphPlan, NodeId, PlanGenerator};
use crate::validator::{validate, Oracle, ValidationResult};

/// Result of a fuzz run.
#[derive(Debug, Default)]
pub struct FuzzResult {
    pub cycles: u32,
    pub sets: usize,
    pub validation: ValidationResult,
    pub stabilize_errors: Vec<String>,
}

impl FuzzResult {
    pub fn is_success(&self) -> bool {
        self.validation.is_success() && self.stabilize_errors.is_empty()
    }
}

/// Drives one generated graph through mutation/stabilize/validate cycles.
pub struct FuzzRunner {
    config: FuzzConfig,
    plan: GraphPlan,
    built: BuiltGraph,
    oracle: Oracle,
    var_values: HashMap<NodeId, i64>,
    rng: SmallRng,
}

impl FuzzRunner {
    pub fn new(config: FuzzConfig) -> Self {
        let plan = PlanGenerator::new(config.clone()).generate();
        let built = build(&plan);
        // A separate stream from the generator's, still seed-determined.
        let rng = SmallRng::seed_from_u64(config.seed.wrapping_add(1));
        Self {
            config,
            plan,
            built,
            oracle: Oracle::new(),
            var_values: HashMap::new(),
            rng,
        }
    }

    pub fn plan(&self) -> &GraphPlan {
        &self.plan
    }

    /// Run the configured number of sequential mutation cycles.
    pub fn run(&mut self) -> FuzzResult {
        let ctx = Context::new();
        let mut result = FuzzResult::default();

        self.stabilize_and_validate(&ctx, &mut result);
        for _ in 0..self.config.update_cycles {
            result.cycles += 1;
            result.sets += self.mutate_vars();
            self.maybe_flip_observer();
            self.stabilize_and_validate(&ctx, &mut result);
            self.check_idempotence(&ctx, &mut result);
        }
        result
    }

    /// Concurrent mode: worker threads hammer disjoint variable
    /// partitions while one thread stabilizes in a loop; a final pass
    /// settles the graph and the end state is validated against the
    /// oracle.
    ///
    /// Requires a cutoff-free plan: with sets landing mid-pass, the
    /// acceptance path of a cutoff is interleaving-dependent and no
    /// sequential oracle matches it.
    pub fn run_concurrent(&mut self) -> FuzzResult {
        assert!(
            self.config.cutoff_probability == 0.0,
            "concurrent mode needs a cutoff-free plan"
        );
        let mut result = FuzzResult::default();
        let ctx = Context::new();
        let threads = self.config.threads;
        let cycles = self.config.update_cycles;
        let seed = self.config.seed;

        let var_ids: Vec<NodeId> = self.plan.vars.clone();
        let final_values: Mutex<HashMap<NodeId, i64>> = Mutex::new(HashMap::new());
        let remaining_setters = AtomicUsize::new(threads);
        let stabilize_errors: Mutex<Vec<String>> = Mutex::new(Vec::new());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads + 1)
            .build()
            .expect("building the fuzz thread pool");

        let built = &self.built;
        pool.scope(|scope| {
            for thread_index in 0..threads {
                let partition: Vec<NodeId> = var_ids
                    .iter()
                    .copied()
                    .filter(|id| id % threads == thread_index)
                    .collect();
                let final_values = &final_values;
                let remaining_setters = &remaining_setters;
                scope.spawn(move |_| {
                    let mut rng = SmallRng::seed_from_u64(seed ^ (thread_index as u64 + 1));
                    let mut last: HashMap<NodeId, i64> = HashMap::new();
                    for _ in 0..cycles {
                        for &var_id in &partition {
                            let value = rng.gen_range(-1000..=1000);
                            if let Some(var) = built.vars.get(&var_id) {
                                var.set(value);
                                last.insert(var_id, value);
                            }
                        }
                    }
                    final_values.lock().extend(last);
                    remaining_setters.fetch_sub(1, Ordering::SeqCst);
                });
            }

            // Stabilize continuously until every setter has finished.
            let remaining_setters = &remaining_setters;
            let stabilize_errors = &stabilize_errors;
            let ctx = ctx.clone();
            scope.spawn(move |_| {
                while remaining_setters.load(Ordering::SeqCst) > 0 {
                    if let Err(err) = built.graph.stabilize(&ctx) {
                        stabilize_errors.lock().push(err.to_string());
                        return;
                    }
                }
            });
        });

        self.var_values.extend(final_values.into_inner());
        result.cycles = cycles;
        result.stabilize_errors.extend(stabilize_errors.into_inner());

        // Quiesce and validate the final state. A set can land in the
        // closing pass's window after its staged values were applied, so
        // flush once before the validated pass.
        if let Err(err) = self.built.graph.stabilize(&ctx) {
            result.stabilize_errors.push(err.to_string());
        }
        self.stabilize_and_validate(&ctx, &mut result);
        result
    }

    fn mutate_vars(&mut self) -> usize {
        let count = self
            .rng
            .gen_range(self.config.sets_per_cycle.clone())
            .min(self.plan.vars.len());
        for _ in 0..count {
            let var_id = self.plan.vars[self.rng.gen_range(0..self.plan.vars.len())];
            let value = self.rng.gen_range(-1000..=1000);
            if let Some(var) = self.built.vars.get(&var_id) {
                var.set(value);
                self.var_values.insert(var_id, value);
            }
        }
        count
    }

    fn maybe_flip_observer(&mut self) {
        if self.config.flip_observer_probability == 0.0 {
            return;
        }
        if !self.rng.gen_bool(self.config.flip_observer_probability) {
            return;
        }
        let root = self.plan.roots[self.rng.gen_range(0..self.plan.roots.len())];
        let mut observers = self.built.observers.lock();
        if let Some(observer) = observers.remove(&root) {
            observer.unobserve();
        } else if let Ok(observer) = self.built.graph.observe(&self.built.incrs[root]) {
            observers.insert(root, observer);
        }
    }

    fn stabilize_and_validate(&mut self, ctx: &Context, result: &mut FuzzResult) {
        if let Err(err) = self.built.graph.stabilize(ctx) {
            result.stabilize_errors.push(err.to_string());
        }
        let expected = self.oracle.stabilize(&self.plan, &self.var_values);
        result.validation.merge(validate(&self.built, &expected));
    }

    /// With nothing set since the last pass, another pass must recompute
    /// nothing.
    fn check_idempotence(&mut self, ctx: &Context, result: &mut FuzzResult) {
        let before = self.built.graph.stats().nodes_recomputed;
        if let Err(err) = self.built.graph.stabilize(ctx) {
            result.stabilize_errors.push(err.to_string());
            return;
        }
        let after = self.built.graph.stats().nodes_recomputed;
        if after != before {
            result.validation.invariant_errors.push(format!(
                "idempotence: a quiescent stabilize recomputed {} nodes",
                after - before
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_run() {
        let config = FuzzConfig::minimal().with_seed(42).with_update_cycles(10);
        let mut runner = FuzzRunner::new(config);
        let result = runner.run();
        assert!(result.is_success(), "run failed: {result:?}");
        assert_eq!(result.cycles, 10);
        assert!(result.validation.successes > 0);
    }

    #[test]
    fn test_run_with_cutoffs() {
        let config = FuzzConfig::minimal()
            .with_seed(43)
            .with_layers(4)
            .with_layer_width(6)
            .with_cutoff_probability(0.3)
            .with_update_cycles(25);
        let mut runner = FuzzRunner::new(config);
        let result = runner.run();
        assert!(result.is_success(), "run failed: {result:?}");
    }

    #[test]
    fn test_run_with_binds() {
        let config = FuzzConfig::minimal()
            .with_seed(44)
            .with_layers(4)
            .with_layer_width(5)
            .with_bind_probability(0.3)
            .with_update_cycles(25);
        let mut runner = FuzzRunner::new(config);
        let result = runner.run();
        assert!(result.is_success(), "run failed: {result:?}");
    }

    #[test]
    fn test_run_with_binds_and_cutoffs() {
        let config = FuzzConfig::minimal()
            .with_seed(45)
            .with_layers(5)
            .with_layer_width(6)
            .with_var_count(6)
            .with_bind_probability(0.2)
            .with_cutoff_probability(0.2)
            .with_update_cycles(40)
            .with_sets_per_cycle(1..4);
        let mut runner = FuzzRunner::new(config);
        let result = runner.run();
        assert!(result.is_success(), "run failed: {result:?}");
    }

    #[test]
    fn test_run_with_observer_flips() {
        let config = FuzzConfig::minimal()
            .with_seed(46)
            .with_layers(4)
            .with_layer_width(5)
            .with_bind_probability(0.2)
            .with_observer_flips(0.5)
            .with_update_cycles(30);
        let mut runner = FuzzRunner::new(config);
        let result = runner.run();
        assert!(result.is_success(), "run failed: {result:?}");
    }

    #[test]
    fn test_determinism() {
        let config = FuzzConfig::minimal()
            .with_seed(12345)
            .with_layers(4)
            .with_bind_probability(0.2)
            .with_cutoff_probability(0.2)
            .with_update_cycles(15);

        let result_a = FuzzRunner::new(config.clone()).run();
        let result_b = FuzzRunner::new(config).run();
        assert!(result_a.is_success());
        assert_eq!(result_a.sets, result_b.sets);
        assert_eq!(result_a.validation.successes, result_b.validation.successes);
    }

    #[test]
    fn test_concurrent_sets_while_stabilizing() {
        let config = FuzzConfig::minimal()
            .with_seed(47)
            .with_layers(3)
            .with_layer_width(4)
            .with_var_count(8)
            .with_bind_probability(0.2)
            .with_threads(4)
            .with_update_cycles(50);
        let mut runner = FuzzRunner::new(config);
        let result = runner.run_concurrent();
        assert!(result.is_success(), "run failed: {result:?}");
    }
}
