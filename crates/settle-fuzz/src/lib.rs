//! Randomized stress harness for the [`settle`] incremental engine.
//!
//! A run generates a seeded layered DAG of variables, maps, cutoffs, and
//! binds, then drives mutation cycles against it. After every
//! stabilization the engine is held to account twice over:
//!
//! - an **oracle** recomputes every node from scratch and each live
//!   observer must match it exactly;
//! - the engine's own structural invariants (heights along edges, heap
//!   consistency, necessity, freshness, idempotence of a quiescent pass)
//!   are checked via [`settle::Graph::check_invariants`].
//!
//! Runs are deterministic per seed, so a failure reproduces from its
//! config alone.
//!
//! # Example
//!
//! ```
//! use settle_fuzz::{FuzzConfig, FuzzRunner};
//!
//! let config = FuzzConfig::minimal()
//!     .with_seed(7)
//!     .with_bind_probability(0.2)
//!     .with_cutoff_probability(0.2)
//!     .with_update_cycles(5);
//! let result = FuzzRunner::new(config).run();
//! assert!(result.is_success());
//! ```

mod config;
mod generator;
mod runner;
mod validator;

pub use config::FuzzConfig;
pub use generator::{build, BuiltGraph, GraphPlan, NodeId, NodeSpec, PlanGenerator};
pub use runner::{FuzzResult, FuzzRunner};
pub use validator::{validate, Oracle, ValidationFailure, ValidationResult};
