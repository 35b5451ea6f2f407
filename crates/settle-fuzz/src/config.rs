//! Fuzz run configuration.

use std::ops::Range;

/// Configuration for one fuzz run.
///
/// Built with `FuzzConfig::minimal()` plus `with_*` chaining. The same
/// config and seed always produce the same plan, mutations, and outcome.
#[derive(Clone, Debug)]
pub struct FuzzConfig {
    /// Seed for every random decision in the run.
    pub seed: u64,
    /// Derived layers stacked above the variable layer.
    pub layers: usize,
    /// Nodes per derived layer.
    pub layer_width: usize,
    /// Input variables in layer zero.
    pub var_count: usize,
    /// Probability a derived node is a cutoff.
    ///
    /// Cutoffs are stateful, so runs that unobserve subtrees mid-stream
    /// (observer flips, concurrent mode) should disable them: the oracle
    /// tracks acceptance per stabilization and diverges if the engine
    /// skips passes the oracle sees.
    pub cutoff_probability: f64,
    /// Probability a derived node is a bind over earlier nodes.
    pub bind_probability: f64,
    /// Mutation cycles to run.
    pub update_cycles: u32,
    /// Variables set per cycle (sampled uniformly from this range).
    pub sets_per_cycle: Range<usize>,
    /// Probability per cycle of unobserving (or re-observing) a root.
    pub flip_observer_probability: f64,
    /// Worker threads for the concurrent mode.
    pub threads: usize,
}

impl FuzzConfig {
    /// A small, fast configuration to build on.
    pub fn minimal() -> Self {
        Self {
            seed: 0,
            layers: 3,
            layer_width: 4,
            var_count: 4,
            cutoff_probability: 0.0,
            bind_probability: 0.0,
            update_cycles: 10,
            sets_per_cycle: 1..3,
            flip_observer_probability: 0.0,
            threads: 1,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_layers(mut self, layers: usize) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_layer_width(mut self, width: usize) -> Self {
        self.layer_width = width;
        self
    }

    pub fn with_var_count(mut self, vars: usize) -> Self {
        self.var_count = vars.max(1);
        self
    }

    pub fn with_cutoff_probability(mut self, probability: f64) -> Self {
        self.cutoff_probability = probability;
        self
    }

    pub fn with_bind_probability(mut self, probability: f64) -> Self {
        self.bind_probability = probability;
        self
    }

    pub fn with_update_cycles(mut self, cycles: u32) -> Self {
        self.update_cycles = cycles;
        self
    }

    pub fn with_sets_per_cycle(mut self, sets: Range<usize>) -> Self {
        self.sets_per_cycle = sets;
        self
    }

    pub fn with_observer_flips(mut self, probability: f64) -> Self {
        self.flip_observer_probability = probability;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }
}
