//! Creation scopes.
//!
//! Every node records where it was constructed: at the top level of a
//! graph, or inside the right-hand side of a [`bind`](Scope::bind)
//! function. The scope bounds the node's starting height (a bind's RHS
//! nodes begin above the bind itself) and carries validity: when a bind is
//! invalidated, nodes created in its scope are invalidated too.

use std::sync::{Arc, Weak};

use crate::graph::GraphState;
use crate::node::{NodeMeta, HEIGHT_UNSET};

/// A handle to the place node constructors attach their nodes.
///
/// Obtain the top-level scope with [`Graph::scope`](crate::Graph::scope);
/// bind functions receive the bind's RHS scope as an argument. All node
/// constructors ([`constant`](Scope::constant), [`var`](Scope::var),
/// [`map`](Scope::map), [`bind`](Scope::bind), ...) live on this type so
/// they work identically in both places.
#[derive(Clone)]
pub struct Scope {
    graph: Weak<GraphState>,
    kind: ScopeKind,
}

#[derive(Clone)]
enum ScopeKind {
    /// The top level of the graph.
    Top,
    /// The right-hand side of a bind node.
    Bind(Weak<NodeMeta>),
}

impl Scope {
    pub(crate) fn top(graph: &Arc<GraphState>) -> Self {
        Self {
            graph: Arc::downgrade(graph),
            kind: ScopeKind::Top,
        }
    }

    pub(crate) fn bind_rhs(&self, bind: &Arc<NodeMeta>) -> Self {
        Self {
            graph: self.graph.clone(),
            kind: ScopeKind::Bind(Arc::downgrade(bind)),
        }
    }

    pub(crate) fn graph_weak(&self) -> Weak<GraphState> {
        self.graph.clone()
    }

    pub(crate) fn graph(&self) -> Option<Arc<GraphState>> {
        self.graph.upgrade()
    }

    /// The height floor for nodes created in this scope: nodes start at
    /// `height() + 1`.
    pub(crate) fn height(&self) -> i64 {
        match &self.kind {
            ScopeKind::Top => HEIGHT_UNSET,
            ScopeKind::Bind(bind) => bind
                .upgrade()
                .map(|meta| meta.height())
                .unwrap_or(HEIGHT_UNSET),
        }
    }

    /// A scope is valid while the bind that created it is alive and valid;
    /// the top-level scope is always valid.
    pub(crate) fn is_valid(&self) -> bool {
        match &self.kind {
            ScopeKind::Top => true,
            ScopeKind::Bind(bind) => bind.upgrade().map(|meta| meta.valid()).unwrap_or(false),
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ScopeKind::Top => write!(f, "Scope::Top"),
            ScopeKind::Bind(bind) => match bind.upgrade() {
                Some(meta) => write!(f, "Scope::Bind({})", meta.id().short()),
                None => write!(f, "Scope::Bind(<dropped>)"),
            },
        }
    }
}
