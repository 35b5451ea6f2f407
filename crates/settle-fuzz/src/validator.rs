//! Oracle evaluation and result validation.
//!
//! The oracle recomputes every plan node from scratch per stabilization,
//! in id order (inputs always precede readers), carrying only the cutoff
//! acceptance state across passes. Observer values from the engine must
//! match it exactly.

use std::collections::HashMap;

use crate::generator::{BuiltGraph, GraphPlan, NodeId, NodeSpec};

/// Reference evaluator for a [`GraphPlan`].
#[derive(Default)]
pub struct Oracle {
    /// Last accepted value per cutoff node.
    accepted: HashMap<NodeId, i64>,
}

impl Oracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expected values for every node after one stabilization against the
    /// given variable assignment.
    pub fn stabilize(
        &mut self,
        plan: &GraphPlan,
        var_values: &HashMap<NodeId, i64>,
    ) -> Vec<i64> {
        let mut values = vec![0i64; plan.specs.len()];
        for (id, spec) in plan.specs.iter().enumerate() {
            values[id] = match spec {
                NodeSpec::Var { initial } => var_values.get(&id).copied().unwrap_or(*initial),
                NodeSpec::Add { input, constant } => values[*input] + constant,
                NodeSpec::Sum { a, b } => values[*a] + values[*b],
                NodeSpec::Cutoff { input, threshold } => {
                    let current = values[*input];
                    match self.accepted.get(&id).copied() {
                        Some(accepted) if (current - accepted).abs() < *threshold => accepted,
                        _ => {
                            self.accepted.insert(id, current);
                            current
                        }
                    }
                }
                NodeSpec::Bind { selector, branches } => {
                    let index = values[*selector].rem_euclid(branches.len() as i64) as usize;
                    values[branches[index]]
                }
            };
        }
        values
    }
}

/// One observed root disagreeing with the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub node: NodeId,
    pub expected: i64,
    pub actual: Option<i64>,
}

/// Result of validating one cycle.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub successes: u32,
    pub failures: Vec<ValidationFailure>,
    pub invariant_errors: Vec<String>,
}

impl ValidationResult {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.invariant_errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.successes += other.successes;
        self.failures.extend(other.failures);
        self.invariant_errors.extend(other.invariant_errors);
    }
}

/// Compare every live observer against the oracle and check the engine's
/// structural invariants.
pub fn validate(built: &BuiltGraph, expected: &[i64]) -> ValidationResult {
    let mut result = ValidationResult::default();

    let observers = built.observers.lock();
    for (&root, observer) in observers.iter() {
        let actual = observer.value();
        if actual == Some(expected[root]) {
            result.successes += 1;
        } else {
            result.failures.push(ValidationFailure {
                node: root,
                expected: expected[root],
                actual,
            });
        }
    }
    drop(observers);

    if let Err(violation) = built.graph.check_invariants() {
        result.invariant_errors.push(violation);
    }
    result
}
