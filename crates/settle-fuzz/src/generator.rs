//! Seeded random graph plans and their realization as settle graphs.
//!
//! A plan is a layered DAG description: layer zero holds variables, each
//! derived layer reads from strictly earlier nodes. The plan doubles as
//! the oracle's model, so node ids index both the plan and the built
//! graph.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use settle::{Graph, Incr, Observer, Var};

use crate::config::FuzzConfig;

pub type NodeId = usize;

/// One node of a graph plan.
#[derive(Clone, Debug)]
pub enum NodeSpec {
    /// An input variable with its initial value.
    Var { initial: i64 },
    /// `input + constant`.
    Add { input: NodeId, constant: i64 },
    /// `a + b`.
    Sum { a: NodeId, b: NodeId },
    /// Pass-through suppressing changes smaller than `threshold`.
    Cutoff { input: NodeId, threshold: i64 },
    /// Selects `branches[input mod len]`.
    Bind {
        selector: NodeId,
        branches: Vec<NodeId>,
    },
}

/// A complete layered DAG description.
#[derive(Clone, Debug)]
pub struct GraphPlan {
    /// Node specs; inputs always have smaller ids than their readers.
    pub specs: Vec<NodeSpec>,
    /// Ids of the variables.
    pub vars: Vec<NodeId>,
    /// Observed roots: the top layer of the plan.
    pub roots: Vec<NodeId>,
}

impl GraphPlan {
    /// Whether a cutoff sits in `node`'s input cone.
    ///
    /// Bind branches must avoid such nodes: a cutoff that stops being
    /// necessary mid-run freezes engine-side state the oracle cannot see.
    pub fn has_cutoff_in_cone(&self, node: NodeId) -> bool {
        match &self.specs[node] {
            NodeSpec::Var { .. } => false,
            NodeSpec::Add { input, .. } => self.has_cutoff_in_cone(*input),
            NodeSpec::Sum { a, b } => self.has_cutoff_in_cone(*a) || self.has_cutoff_in_cone(*b),
            NodeSpec::Cutoff { .. } => true,
            NodeSpec::Bind {
                selector, branches, ..
            } => {
                self.has_cutoff_in_cone(*selector)
                    || branches.iter().any(|b| self.has_cutoff_in_cone(*b))
            }
        }
    }
}

/// Generates a [`GraphPlan`] from a config's seed.
pub struct PlanGenerator {
    config: FuzzConfig,
    rng: SmallRng,
}

impl PlanGenerator {
    pub fn new(config: FuzzConfig) -> Self {
        let rng = SmallRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    pub fn generate(&mut self) -> GraphPlan {
        let mut plan = GraphPlan {
            specs: Vec::new(),
            vars: Vec::new(),
            roots: Vec::new(),
        };

        for _ in 0..self.config.var_count {
            let id = plan.specs.len();
            plan.specs.push(NodeSpec::Var {
                initial: self.rng.gen_range(-100..=100),
            });
            plan.vars.push(id);
        }

        let mut previous_layer: Vec<NodeId> = plan.vars.clone();
        for _ in 0..self.config.layers {
            let mut layer = Vec::with_capacity(self.config.layer_width);
            for _ in 0..self.config.layer_width {
                let id = plan.specs.len();
                let spec = self.derived_spec(&plan, &previous_layer);
                plan.specs.push(spec);
                layer.push(id);
            }
            previous_layer = layer;
        }

        plan.roots = previous_layer;
        plan
    }

    fn derived_spec(&mut self, plan: &GraphPlan, previous_layer: &[NodeId]) -> NodeSpec {
        // Read mostly from the previous layer, sometimes from anywhere
        // lower, so the DAG has both deep chains and skip edges.
        let pick = |rng: &mut SmallRng, plan: &GraphPlan, previous_layer: &[NodeId]| {
            if rng.gen_bool(0.7) {
                previous_layer[rng.gen_range(0..previous_layer.len())]
            } else {
                rng.gen_range(0..plan.specs.len())
            }
        };

        let roll: f64 = self.rng.gen();
        if roll < self.config.bind_probability {
            let selector = pick(&mut self.rng, plan, previous_layer);
            let candidates: Vec<NodeId> = (0..plan.specs.len())
                .filter(|&id| !plan.has_cutoff_in_cone(id))
                .collect();
            if candidates.len() >= 2 {
                let count = self.rng.gen_range(2..=candidates.len().min(4));
                let mut branches = Vec::with_capacity(count);
                for _ in 0..count {
                    branches.push(candidates[self.rng.gen_range(0..candidates.len())]);
                }
                return NodeSpec::Bind { selector, branches };
            }
        } else if roll < self.config.bind_probability + self.config.cutoff_probability {
            return NodeSpec::Cutoff {
                input: pick(&mut self.rng, plan, previous_layer),
                threshold: self.rng.gen_range(1..=10),
            };
        }

        if self.rng.gen_bool(0.5) {
            NodeSpec::Add {
                input: pick(&mut self.rng, plan, previous_layer),
                constant: self.rng.gen_range(-10..=10),
            }
        } else {
            NodeSpec::Sum {
                a: pick(&mut self.rng, plan, previous_layer),
                b: pick(&mut self.rng, plan, previous_layer),
            }
        }
    }
}

/// A plan realized as a live settle graph.
pub struct BuiltGraph {
    pub graph: Graph,
    pub vars: HashMap<NodeId, Var<i64>>,
    pub incrs: Vec<Incr<i64>>,
    /// Live observers per root; absent while a root is flipped off.
    pub observers: Mutex<HashMap<NodeId, Observer<i64>>>,
}

/// Build the plan's nodes and observe every root.
pub fn build(plan: &GraphPlan) -> BuiltGraph {
    // Bind swaps ratchet heights upward, so leave generous headroom.
    let graph = Graph::with_max_height(1 << 16);
    let scope = graph.scope();

    let mut vars = HashMap::new();
    let mut incrs: Vec<Incr<i64>> = Vec::with_capacity(plan.specs.len());
    for spec in &plan.specs {
        let incr = match spec {
            NodeSpec::Var { initial } => {
                let var = scope.var(*initial);
                let incr = var.incr();
                vars.insert(incrs.len(), var);
                incr
            }
            NodeSpec::Add { input, constant } => {
                let constant = *constant;
                scope.map(&incrs[*input], move |x| x + constant)
            }
            NodeSpec::Sum { a, b } => scope.map2(&incrs[*a], &incrs[*b], |a, b| a + b),
            NodeSpec::Cutoff { input, threshold } => {
                let threshold = *threshold;
                scope.cutoff(&incrs[*input], move |prev, next| {
                    (prev - next).abs() < threshold
                })
            }
            NodeSpec::Bind { selector, branches } => {
                let branch_incrs: Vec<Incr<i64>> =
                    branches.iter().map(|&id| incrs[id].clone()).collect();
                scope.bind(&incrs[*selector], move |_rhs, selector| {
                    let index = selector.rem_euclid(branch_incrs.len() as i64) as usize;
                    branch_incrs[index].clone()
                })
            }
        };
        incrs.push(incr);
    }

    let observers = plan
        .roots
        .iter()
        .map(|&root| {
            let observer = graph
                .observe(&incrs[root])
                .expect("observing a generated root");
            (root, observer)
        })
        .collect();

    BuiltGraph {
        graph,
        vars,
        incrs,
        observers: Mutex::new(observers),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plans_are_deterministic_per_seed() {
        let config = FuzzConfig::minimal()
            .with_seed(7)
            .with_bind_probability(0.2)
            .with_cutoff_probability(0.2);
        let a = PlanGenerator::new(config.clone()).generate();
        let b = PlanGenerator::new(config).generate();
        assert_eq!(format!("{a:?}"), format!("{b:?}"));
    }

    #[test]
    fn test_plan_inputs_precede_readers() {
        let config = FuzzConfig::minimal()
            .with_seed(11)
            .with_layers(4)
            .with_bind_probability(0.3)
            .with_cutoff_probability(0.2);
        let plan = PlanGenerator::new(config).generate();
        for (id, spec) in plan.specs.iter().enumerate() {
            let inputs: Vec<NodeId> = match spec {
                NodeSpec::Var { .. } => vec![],
                NodeSpec::Add { input, .. } => vec![*input],
                NodeSpec::Sum { a, b } => vec![*a, *b],
                NodeSpec::Cutoff { input, .. } => vec![*input],
                NodeSpec::Bind { selector, branches } => {
                    let mut inputs = vec![*selector];
                    inputs.extend_from_slice(branches);
                    inputs
                }
            };
            assert!(inputs.iter().all(|&input| input < id));
        }
    }

    #[test]
    fn test_bind_branches_avoid_cutoff_cones() {
        let config = FuzzConfig::minimal()
            .with_seed(13)
            .with_layers(5)
            .with_layer_width(6)
            .with_bind_probability(0.4)
            .with_cutoff_probability(0.4);
        let plan = PlanGenerator::new(config).generate();
        for spec in &plan.specs {
            if let NodeSpec::Bind { branches, .. } = spec {
                for &branch in branches {
                    assert!(!plan.has_cutoff_in_cone(branch));
                }
            }
        }
    }
}
