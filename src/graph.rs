//! The dependency graph between the controls of a wizard.
//!
//! Nodes are controls and an edge `A -> B` means "B reads the value of A", so
//! walking outgoing edges from a changed control visits everything that must
//! be refreshed. The graph is built once per wizard definition and is
//! immutable afterwards, which makes it safe to share between threads.
//!
//! Besides the edges, the graph keeps the topological rank of every node. A
//! cascade is ordered by rank, which guarantees a control is only refreshed
//! after every control it reads has been brought up to date.

use std::collections::HashMap;
use std::fmt;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use crate::core::{ArcStr, ControlDescriptor};
use crate::error::DefinitionError;

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<ArcStr, ()>,
    indices: HashMap<ArcStr, NodeIndex>,
    dynamic: Vec<bool>,
    rank: Vec<usize>,
}

impl DependencyGraph {
    /// Validates the declarations and builds the graph.
    ///
    /// Fails on duplicate names, on dependencies that name a control missing
    /// from `controls`, and on cycles. Nothing is returned on failure.
    pub fn build(controls: &[ControlDescriptor]) -> Result<Self, DefinitionError> {
        let mut graph = DiGraph::with_capacity(controls.len(), controls.len());
        let mut indices = HashMap::with_capacity(controls.len());
        let mut dynamic = Vec::with_capacity(controls.len());

        for control in controls {
            if indices.contains_key(control.name()) {
                return Err(DefinitionError::DuplicateControl(control.name().clone()));
            }

            let index = graph.add_node(control.name().clone());
            indices.insert(control.name().clone(), index);
            dynamic.push(control.is_dynamic());
        }

        for control in controls.iter().filter(|c| c.is_dynamic()) {
            if control.source().is_none() {
                return Err(DefinitionError::MissingSource(control.name().clone()));
            }

            let index = indices[control.name()];

            for dependency in control.dependencies() {
                let Some(&source) = indices.get(dependency) else {
                    return Err(DefinitionError::UnknownDependency {
                        control: control.name().clone(),
                        missing: dependency.clone(),
                    });
                };

                graph.add_edge(source, index, ());
            }
        }

        if let Some(path) = find_cycle(&graph) {
            return Err(DefinitionError::CycleDetected(path));
        }

        // Acyclic at this point, the sort cannot fail.
        let order = petgraph::algo::toposort(&graph, None).unwrap_or_default();

        let mut rank = vec![0; graph.node_count()];
        for (position, index) in order.into_iter().enumerate() {
            rank[index.index()] = position;
        }

        Ok(Self {
            graph,
            indices,
            dynamic,
            rank,
        })
    }

    /// Every dynamic control that transitively reads `changed`, in refresh
    /// order. Never contains `changed` itself. Unknown names have no
    /// dependents.
    pub fn affected_by(&self, changed: &str) -> Vec<ArcStr> {
        let Some(&start) = self.indices.get(changed) else {
            return Vec::new();
        };

        let mut reached = Vec::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(index) = dfs.next(&self.graph) {
            if index != start && self.dynamic[index.index()] {
                reached.push(index);
            }
        }

        self.ordered(reached)
    }

    /// Controls reading `name` directly.
    pub fn dependents_of(&self, name: &str) -> Vec<ArcStr> {
        let Some(&index) = self.indices.get(name) else {
            return Vec::new();
        };

        let direct = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .collect();

        self.ordered(direct)
    }

    /// All dynamic controls in refresh order.
    pub fn topological(&self) -> Vec<ArcStr> {
        let all = self
            .graph
            .node_indices()
            .filter(|index| self.dynamic[index.index()])
            .collect();

        self.ordered(all)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    fn ordered(&self, mut nodes: Vec<NodeIndex>) -> Vec<ArcStr> {
        nodes.sort_by_key(|index| self.rank[index.index()]);
        nodes.dedup();
        nodes
            .into_iter()
            .map(|index| self.graph[index].clone())
            .collect()
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = (usize, &ArcStr, bool)> {
        self.graph
            .node_indices()
            .map(|index| (index.index(), &self.graph[index], self.dynamic[index.index()]))
    }

    pub(crate) fn edges(&self) -> impl Iterator<Item = (usize, usize)> {
        self.graph
            .raw_edges()
            .iter()
            .map(|edge| (edge.source().index(), edge.target().index()))
    }
}

/// Renders the graph as a Mermaid flowchart. Dynamic controls are drawn
/// with rounded corners.
impl fmt::Display for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph LR")?;

        for (index, name, dynamic) in self.nodes() {
            let name = name.replace('"', "\\\"");
            if dynamic {
                writeln!(f, "    {index}(\"{name}\")")?;
            } else {
                writeln!(f, "    {index}[\"{name}\"]")?;
            }
        }

        for (source, target) in self.edges() {
            writeln!(f, "    {source} --> {target}")?;
        }

        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    Active,
    Done,
}

/// Depth-first search reporting the first cycle found as a path that starts
/// and ends with the same control.
fn find_cycle(graph: &DiGraph<ArcStr, ()>) -> Option<Vec<ArcStr>> {
    fn visit(
        graph: &DiGraph<ArcStr, ()>,
        node: NodeIndex,
        marks: &mut [Mark],
        stack: &mut Vec<NodeIndex>,
    ) -> Option<Vec<ArcStr>> {
        marks[node.index()] = Mark::Active;
        stack.push(node);

        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            match marks[next.index()] {
                Mark::Active => {
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut path: Vec<ArcStr> =
                        stack[start..].iter().map(|&n| graph[n].clone()).collect();
                    path.push(graph[next].clone());
                    return Some(path);
                }
                Mark::New => {
                    if let Some(path) = visit(graph, next, marks, stack) {
                        return Some(path);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[node.index()] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::New; graph.node_count()];
    let mut stack = Vec::new();

    for node in graph.node_indices() {
        if marks[node.index()] == Mark::New
            && let Some(path) = visit(graph, node, &mut marks, &mut stack)
        {
            return Some(path);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ScriptBlock;
    use serde_json::json;

    fn dynamic(name: &str, deps: &[&str]) -> ControlDescriptor {
        let params: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
        ControlDescriptor::dynamic(name, ScriptBlock::new(params, |_| Ok(json!([]))).into())
    }

    fn names(list: &[ArcStr]) -> Vec<&str> {
        list.iter().map(AsRef::as_ref).collect()
    }

    fn position(list: &[ArcStr], name: &str) -> usize {
        list.iter().position(|n| n.as_ref() == name).unwrap()
    }

    #[test]
    fn test_chain_order() {
        let graph = DependencyGraph::build(&[
            dynamic("C", &["B"]),
            dynamic("B", &["A"]),
            ControlDescriptor::static_choice("A", ["1", "2"]),
        ])
        .unwrap();

        assert_eq!(names(&graph.affected_by("A")), ["B", "C"]);
        assert_eq!(names(&graph.affected_by("B")), ["C"]);
        assert!(graph.affected_by("C").is_empty());
    }

    #[test]
    fn test_rank_ignores_declaration_order() {
        let graph = DependencyGraph::build(&[
            dynamic("D", &["C"]),
            dynamic("C", &["B"]),
            dynamic("B", &["A"]),
            dynamic("A", &[]),
        ])
        .unwrap();

        assert_eq!(names(&graph.topological()), ["A", "B", "C", "D"]);
    }

    #[test]
    fn test_diamond_respects_dependencies() {
        // Env -> Region -> Server, Env -> Server, Region -> Rack, Server -> Rack
        let graph = DependencyGraph::build(&[
            ControlDescriptor::static_choice("Env", ["Dev", "Prod"]),
            dynamic("Rack", &["Server", "Region"]),
            dynamic("Server", &["Env", "Region"]),
            dynamic("Region", &["Env"]),
        ])
        .unwrap();

        let affected = graph.affected_by("Env");
        assert_eq!(affected.len(), 3);
        assert!(!affected.iter().any(|n| n.as_ref() == "Env"));
        assert!(position(&affected, "Region") < position(&affected, "Server"));
        assert!(position(&affected, "Server") < position(&affected, "Rack"));
    }

    #[test]
    fn test_unknown_control_has_no_dependents() {
        let graph = DependencyGraph::build(&[dynamic("B", &[])]).unwrap();
        assert!(graph.affected_by("Nope").is_empty());
        assert!(graph.dependents_of("Nope").is_empty());
    }

    #[test]
    fn test_static_dependents_are_skipped() {
        let graph = DependencyGraph::build(&[
            ControlDescriptor::new("Name", crate::ControlKind::FreeText),
            ControlDescriptor::new("Notes", crate::ControlKind::FreeText).depends_on(["Name"]),
        ])
        .unwrap();

        assert!(graph.affected_by("Name").is_empty());
    }

    #[test]
    fn test_unknown_dependency() {
        let err = DependencyGraph::build(&[dynamic("B", &["A"])]).unwrap_err();
        assert_eq!(
            err,
            DefinitionError::UnknownDependency {
                control: "B".into(),
                missing: "A".into()
            }
        );
    }

    #[test]
    fn test_duplicate_control() {
        let err = DependencyGraph::build(&[dynamic("A", &[]), dynamic("A", &[])]).unwrap_err();
        assert_eq!(err, DefinitionError::DuplicateControl("A".into()));
    }

    #[test]
    fn test_two_node_cycle() {
        let err = DependencyGraph::build(&[dynamic("A", &["B"]), dynamic("B", &["A"])]).unwrap_err();

        let DefinitionError::CycleDetected(path) = err else {
            panic!("expected a cycle, got {err:?}");
        };

        assert_eq!(path.len(), 3);
        assert_eq!(path.first(), path.last());
        assert!(path.iter().any(|n| n.as_ref() == "A"));
        assert!(path.iter().any(|n| n.as_ref() == "B"));
    }

    #[test]
    fn test_self_cycle() {
        let err = DependencyGraph::build(&[dynamic("A", &["A"])]).unwrap_err();
        assert_eq!(err, DefinitionError::CycleDetected(vec!["A".into(), "A".into()]));
    }

    #[test]
    fn test_long_cycle_behind_valid_nodes() {
        let err = DependencyGraph::build(&[
            ControlDescriptor::static_choice("Root", ["x"]),
            dynamic("A", &["Root", "C"]),
            dynamic("B", &["A"]),
            dynamic("C", &["B"]),
        ])
        .unwrap_err();

        let DefinitionError::CycleDetected(path) = err else {
            panic!("expected a cycle, got {err:?}");
        };

        assert_eq!(path.len(), 4);
        assert!(!path.iter().any(|n| n.as_ref() == "Root"));
    }

    #[test]
    fn test_topological_covers_dynamic_only() {
        let graph = DependencyGraph::build(&[
            dynamic("Server", &["Region"]),
            dynamic("Region", &["Env"]),
            ControlDescriptor::static_choice("Env", ["Dev"]),
        ])
        .unwrap();

        assert_eq!(names(&graph.topological()), ["Region", "Server"]);
        assert_eq!(names(&graph.dependents_of("Env")), ["Region"]);
    }

    #[test]
    fn test_mermaid() {
        let graph = DependencyGraph::build(&[
            ControlDescriptor::static_choice("Env", ["Dev"]),
            dynamic("Region", &["Env"]),
        ])
        .unwrap();

        let text = graph.to_string();
        assert!(text.starts_with("graph LR\n"));
        assert!(text.contains(r#"0["Env"]"#));
        assert!(text.contains(r#"1("Region")"#));
        assert!(text.contains("0 --> 1"));
    }
}
