//! Error types for graph construction and stabilization.

use std::fmt;
use std::sync::Arc;

/// System-level graph errors.
///
/// Structural errors (`CycleDetected`, `HeightTooLarge`) are returned from
/// the call that caused them and leave the graph unchanged. Pass errors are
/// returned from [`Graph::stabilize`](crate::Graph::stabilize); nodes that
/// were still queued stay queued, so the next successful stabilization
/// resumes where the failed one stopped.
#[derive(Debug, Clone)]
pub enum GraphError {
    /// A stabilization pass is already in flight on this graph.
    ///
    /// Non-fatal; retry once the current pass finishes.
    AlreadyStabilizing,

    /// Linking the proposed edge would create a dependency cycle.
    ///
    /// The `path` holds short-id representations of the offending ancestry.
    CycleDetected {
        /// Short ids from the proposed parent back to the child.
        path: Vec<String>,
    },

    /// A height adjustment pushed a node past the graph's maximum height.
    HeightTooLarge {
        /// The height the node would have needed.
        height: i64,
        /// The configured ceiling.
        max_height: i64,
    },

    /// Stabilization was cancelled through the [`Context`](crate::Context).
    Cancelled,

    /// A node was asked for a value it has not computed yet.
    MissingDependency {
        /// Description of the missing input.
        description: String,
    },

    /// An error returned by a caller-supplied function (a bind function or
    /// a fallible stabilize callback).
    Callback {
        /// The underlying error.
        source: Arc<dyn std::error::Error + Send + Sync>,
    },
}

impl GraphError {
    /// Wrap a caller-supplied error.
    pub fn callback<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        GraphError::Callback {
            source: Arc::new(err),
        }
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::AlreadyStabilizing => {
                write!(f, "stabilize: a pass is already in progress")
            }
            GraphError::CycleDetected { path } => {
                write!(f, "cycle detected: {}", path.join(" -> "))
            }
            GraphError::HeightTooLarge { height, max_height } => {
                write!(
                    f,
                    "height {} exceeds the graph maximum of {}",
                    height, max_height
                )
            }
            GraphError::Cancelled => write!(f, "stabilization cancelled"),
            GraphError::MissingDependency { description } => {
                write!(f, "missing dependency: {}", description)
            }
            GraphError::Callback { source } => write!(f, "callback error: {}", source),
        }
    }
}

impl std::error::Error for GraphError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GraphError::Callback { source } => Some(source.as_ref()),
            _ => None,
        }
    }
}
