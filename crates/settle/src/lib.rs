//! Settle: an incremental computation engine.
//!
//! Build a DAG of computations whose outputs derive from inputs, then
//! re-stabilize efficiently when inputs change: only the transitively
//! affected nodes recompute, in topological (pseudo-height) order.
//!
//! # Key Features
//!
//! - **Observation-driven**: only subgraphs anchored by an
//!   [`Observer`] participate in computation; unobserved nodes cost
//!   nothing.
//! - **Height-ordered scheduling**: a node never recomputes before the
//!   inputs it reads from.
//! - **Early cutoff**: a [`cutoff`](Scope::cutoff) node stops propagation
//!   when the new value is close enough to the old one.
//! - **Dynamic structure**: a [`bind`](Scope::bind) node swaps whole
//!   subgraphs based on a runtime value; heights are repaired and the old
//!   subgraph collapses out of the computation.
//! - **Lifecycle hooks**: per-node on-update / on-error / on-observed /
//!   on-unobserved handlers plus graph-level stabilization hooks.
//!
//! # Example
//!
//! ```
//! use settle::{Context, Graph};
//!
//! let graph = Graph::new();
//! let scope = graph.scope();
//!
//! let base = scope.var("hello".to_string());
//! let shouted = scope.map(&base.incr(), |s| s.to_uppercase());
//! let obs = graph.observe(&shouted).unwrap();
//!
//! graph.stabilize(&Context::new()).unwrap();
//! assert_eq!(obs.value().as_deref(), Some("HELLO"));
//!
//! base.set("goodbye".to_string());
//! graph.stabilize(&Context::new()).unwrap();
//! assert_eq!(obs.value().as_deref(), Some("GOODBYE"));
//! ```
//!
//! # Concurrency
//!
//! Stabilization is single-threaded and cooperative per graph: one pass at
//! a time, enforced by an atomic status. Variables may be set from other
//! threads at any moment; a set landing mid-pass is staged and applied
//! when the pass ends. The [`Context`] threads cancellation through the
//! pass and into user callbacks.

mod adjust_heights_heap;
mod bind;
mod constant;
mod context;
mod cutoff;
mod cycle;
mod dot;
mod error;
mod graph;
mod identifier;
mod incr;
mod map;
mod node;
mod node_set;
mod observer;
mod recompute_heap;
mod scope;
mod stabilize;
mod stats;
mod var;

pub use context::Context;
pub use cycle::detect_cycle_if_linked;
pub use error::GraphError;
pub use graph::{Graph, DEFAULT_MAX_HEIGHT};
pub use identifier::Identifier;
pub use incr::Incr;
pub use map::MapN;
pub use observer::Observer;
pub use scope::Scope;
pub use stats::{GraphStats, NodeStats};
pub use var::Var;
