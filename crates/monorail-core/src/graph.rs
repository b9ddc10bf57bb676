//! Dependency Graph - petgraph-based package dependency tracking
//!
//! Edges point consumer -> dependency. Note the two "root" notions in this
//! system: `roots()` here means nodes with zero incoming edges (nothing
//! depends on them), while scheduler readiness is tracked separately as a
//! per-run remaining-dependency count.

use std::collections::{HashMap, HashSet};

use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::{Error, Result};
use crate::workspace::PackageRegistry;

/// Dependency graph for monorepo packages
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// One node per registry package; one edge per dependency that is itself
    /// a registry package. External dependency names are silently dropped.
    pub fn build(packages: &PackageRegistry) -> Self {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();

        for name in packages.keys() {
            let idx = graph.add_node(name.clone());
            indices.insert(name.clone(), idx);
        }

        for (name, pkg) in packages {
            for dep in &pkg.dependencies {
                if let (Some(&from), Some(&to)) = (indices.get(name), indices.get(dep)) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        Self { graph, indices }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Node names in insertion order.
    pub fn nodes(&self) -> Vec<&str> {
        self.graph
            .node_indices()
            .map(|idx| self.graph[idx].as_str())
            .collect()
    }

    /// (consumer, dependency) pairs in insertion order.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.graph
            .edge_references()
            .map(|edge| {
                (
                    self.graph[edge.source()].as_str(),
                    self.graph[edge.target()].as_str(),
                )
            })
            .collect()
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<String> {
        self.indices
            .get(name)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, direction)
                    .map(|n| self.graph[n].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Packages that depend on `name`.
    pub fn predecessors(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Packages `name` depends on.
    pub fn successors(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Edges entering `name`, as (consumer, dependency) pairs.
    pub fn in_edges(&self, name: &str) -> Vec<(String, String)> {
        self.directed_edges(name, Direction::Incoming)
    }

    /// Edges leaving `name`, as (consumer, dependency) pairs.
    pub fn out_edges(&self, name: &str) -> Vec<(String, String)> {
        self.directed_edges(name, Direction::Outgoing)
    }

    fn directed_edges(&self, name: &str, direction: Direction) -> Vec<(String, String)> {
        self.indices
            .get(name)
            .map(|&idx| {
                self.graph
                    .edges_directed(idx, direction)
                    .map(|edge| {
                        (
                            self.graph[edge.source()].clone(),
                            self.graph[edge.target()].clone(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove every node not in `selected`, and any edge touching a removed
    /// node. Rebuilds the graph so insertion order stays stable.
    pub fn prune(&self, selected: &HashSet<String>) -> Self {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();

        for idx in self.graph.node_indices() {
            let name = &self.graph[idx];
            if selected.contains(name) {
                let new_idx = graph.add_node(name.clone());
                indices.insert(name.clone(), new_idx);
            }
        }

        for edge in self.graph.edge_references() {
            let source = &self.graph[edge.source()];
            let target = &self.graph[edge.target()];
            if let (Some(&from), Some(&to)) = (indices.get(source), indices.get(target)) {
                graph.add_edge(from, to, ());
            }
        }

        Self { graph, indices }
    }

    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.graph)
    }

    /// Dependencies-first order; fails if the graph is cyclic.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            Error::Graph(format!(
                "dependency cycle involving '{}'",
                self.graph[cycle.node_id()]
            ))
        })?;
        Ok(sorted
            .into_iter()
            .rev()
            .map(|idx| self.graph[idx].clone())
            .collect())
    }

    /// Nodes with zero incoming edges: no other package depends on them.
    pub fn roots(&self) -> Vec<String> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|idx| self.graph[idx].clone())
            .collect()
    }

    /// Deterministic DOT export, nodes and edges in insertion order.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph G {\n");
        for idx in self.graph.node_indices() {
            let name = &self.graph[idx];
            dot.push_str(&format!("  \"{name}\" [label=\"{name}\"];\n"));
        }
        for edge in self.graph.edge_references() {
            dot.push_str(&format!(
                "  \"{}\" -> \"{}\";\n",
                self.graph[edge.source()],
                self.graph[edge.target()]
            ));
        }
        dot.push('}');
        dot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::WorkspacePackage;
    use std::path::PathBuf;

    fn registry(entries: &[(&str, &[&str])]) -> PackageRegistry {
        entries
            .iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    WorkspacePackage {
                        name: name.to_string(),
                        dir: PathBuf::from(format!("/ws/{name}")),
                        manifest_path: PathBuf::from(format!("/ws/{name}/package.json")),
                        dependencies: deps.iter().map(|d| d.to_string()).collect(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn external_dependencies_are_dropped() {
        let packages = registry(&[("a", &["b", "react"]), ("b", &[])]);
        let graph = DependencyGraph::build(&packages);

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edges(), vec![("a", "b")]);
    }

    #[test]
    fn topological_order_puts_dependencies_first() {
        let packages = registry(&[("app", &["ui", "core"]), ("core", &[]), ("ui", &["core"])]);
        let graph = DependencyGraph::build(&packages);

        let order = graph.topological_order().unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("core") < pos("ui"));
        assert!(pos("ui") < pos("app"));
    }

    #[test]
    fn cyclic_graph_fails_ordering() {
        let packages = registry(&[("a", &["b"]), ("b", &["a"])]);
        let graph = DependencyGraph::build(&packages);

        assert!(!graph.is_acyclic());
        assert!(matches!(
            graph.topological_order(),
            Err(Error::Graph(_))
        ));
    }

    #[test]
    fn roots_have_no_incoming_edges() {
        let packages = registry(&[("app", &["lib"]), ("lib", &["base"]), ("base", &[])]);
        let graph = DependencyGraph::build(&packages);

        assert_eq!(graph.roots(), vec!["app"]);
    }

    #[test]
    fn prune_keeps_selected_nodes_and_inner_edges() {
        let packages = registry(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        let graph = DependencyGraph::build(&packages);

        let selected: HashSet<String> = ["b".to_string(), "c".to_string()].into();
        let pruned = graph.prune(&selected);

        assert_eq!(pruned.nodes(), vec!["b", "c"]);
        assert_eq!(pruned.edges(), vec![("b", "c")]);
        assert!(!pruned.contains("a"));
    }

    #[test]
    fn predecessors_and_successors_follow_edge_direction() {
        let packages = registry(&[("a", &["b"]), ("b", &[])]);
        let graph = DependencyGraph::build(&packages);

        assert_eq!(graph.successors("a"), vec!["b"]);
        assert_eq!(graph.predecessors("b"), vec!["a"]);
        assert_eq!(graph.out_edges("a").len(), 1);
        assert_eq!(graph.in_edges("a").len(), 0);
    }

    #[test]
    fn dot_export_is_deterministic() {
        let packages = registry(&[("a", &["b"]), ("b", &[])]);
        let graph = DependencyGraph::build(&packages);

        let dot = graph.to_dot();
        assert_eq!(
            dot,
            "digraph G {\n  \"a\" [label=\"a\"];\n  \"b\" [label=\"b\"];\n  \"a\" -> \"b\";\n}"
        );
        assert_eq!(dot, graph.to_dot());
    }
}
