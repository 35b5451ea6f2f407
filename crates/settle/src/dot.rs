//! Graphviz rendering of the active graph.

use std::fmt::Write;

use crate::graph::Graph;
use crate::node::ErasedIncr;

impl Graph {
    /// Render the observed graph in Graphviz dot format.
    ///
    /// Each node is labeled with its kind, short id, optional label, and
    /// height; edges point from parents to the nodes reading them.
    pub fn to_dot<W: Write>(&self, out: &mut W) -> std::fmt::Result {
        let mut nodes: Vec<ErasedIncr> = self.state.nodes.lock().values();
        nodes.extend(self.state.observers.lock().values());

        writeln!(out, "digraph {{")?;
        writeln!(out, "  rankdir=TB;")?;
        writeln!(out, "  node [shape=box, fontname=\"monospace\"];")?;
        for node in &nodes {
            let meta = node.meta();
            writeln!(
                out,
                "  \"{}\" [label=\"{}\"];",
                meta.id().short(),
                meta.describe()
            )?;
        }
        for node in &nodes {
            let meta = node.meta();
            for parent in meta.parents.lock().values() {
                writeln!(
                    out,
                    "  \"{}\" -> \"{}\";",
                    parent.meta().id().short(),
                    meta.id().short()
                )?;
            }
        }
        writeln!(out, "}}")
    }

    /// [`to_dot`](Graph::to_dot) into a fresh `String`.
    pub fn dot_string(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = self.to_dot(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::{Context, Graph};

    #[test]
    fn test_dot_contains_observed_nodes_and_edges() {
        let graph = Graph::new();
        let scope = graph.scope();
        let v = scope.var(1i64);
        v.incr().set_label("input");
        let m = scope.map(&v.incr(), |x| x + 1);
        let obs = graph.observe(&m).unwrap();
        graph.stabilize(&Context::new()).unwrap();

        let dot = graph.dot_string();
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains(&v.id().short()));
        assert!(dot.contains(&m.id().short()));
        assert!(dot.contains("var"));
        assert!(dot.contains(":input@"));
        assert!(dot.contains(&format!(
            "\"{}\" -> \"{}\"",
            v.id().short(),
            m.id().short()
        )));
        drop(obs);
    }

    #[test]
    fn test_dot_omits_unobserved_nodes() {
        let graph = Graph::new();
        let scope = graph.scope();
        let v = scope.var(1i64);
        let _m = scope.map(&v.incr(), |x| x + 1);
        let dot = graph.dot_string();
        assert!(!dot.contains(&v.id().short()));
    }
}
