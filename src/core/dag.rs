//! Dependency graph for build targets.
//!
//! Nodes are keyed purely by target name so the graph algorithms never need
//! the `Target` type. Edges are stored once in a petgraph `DiGraph`, pointing
//! from a dependency to its dependent, and both directions are walked with
//! `neighbors_directed`: "what do I need" uses incoming edges and "what needs
//! me" uses outgoing ones.

use crate::error::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, DfsPostOrder, Reversed};
use petgraph::Direction;
use std::collections::HashMap;
use std::fmt::Write as _;

/// A borrowed view of one node in a [`DependencyGraph`].
#[derive(Clone, Copy)]
pub struct Node<'a> {
    graph: &'a DiGraph<String, ()>,
    index: NodeIndex,
}

impl<'a> Node<'a> {
    /// The target name this node stands for.
    pub fn name(&self) -> &'a str {
        self.graph[self.index].as_str()
    }

    pub fn index(&self) -> NodeIndex {
        self.index
    }

    /// Names of the nodes this node depends on, sorted.
    pub fn dependencies(&self) -> Vec<&'a str> {
        self.neighbor_names(Direction::Incoming)
    }

    /// Names of the nodes that depend on this node, sorted.
    pub fn dependents(&self) -> Vec<&'a str> {
        self.neighbor_names(Direction::Outgoing)
    }

    fn neighbor_names(&self, dir: Direction) -> Vec<&'a str> {
        let graph = self.graph;
        let mut names: Vec<&'a str> = graph
            .neighbors_directed(self.index, dir)
            .map(|n| graph[n].as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

impl std::fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name())
            .field("dependencies", &self.dependencies())
            .finish()
    }
}

/// Traversal mark used by the cycle search.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// One frame of the explicit DFS stack: a node and the next dependency to visit.
struct Frame {
    node: NodeIndex,
    deps: Vec<NodeIndex>,
    next: usize,
}

/// The target dependency graph.
pub struct DependencyGraph {
    /// Edges run from a dependency to the node that depends on it.
    graph: DiGraph<String, ()>,
    /// Name to index lookup.
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Add a node for `name`.
    ///
    /// If the name already exists, returns the existing NodeIndex.
    pub fn add_node(&mut self, name: &str) -> NodeIndex {
        if let Some(&index) = self.index.get(name) {
            return index;
        }
        let index = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), index);
        index
    }

    /// Record that `from` depends on `to`, creating either node if missing.
    ///
    /// Self-edges are accepted here and reported later as a one-node cycle.
    /// Adding the same edge twice is a no-op.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        let dependent = self.add_node(from);
        let dependency = self.add_node(to);
        if self.graph.find_edge(dependency, dependent).is_none() {
            self.graph.add_edge(dependency, dependent, ());
        }
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Option<Node<'_>> {
        self.index.get(name).map(|&index| self.view(index))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
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

    /// All nodes, in insertion order.
    pub fn nodes(&self) -> Vec<Node<'_>> {
        self.graph.node_indices().map(|i| self.view(i)).collect()
    }

    fn view(&self, index: NodeIndex) -> Node<'_> {
        Node {
            graph: &self.graph,
            index,
        }
    }

    fn sorted_dependencies(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .collect();
        deps.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
        deps.dedup();
        deps
    }

    /// Nodes that nothing depends on.
    ///
    /// These are the last things built, not the first.
    pub fn roots(&self) -> Vec<Node<'_>> {
        self.graph
            .node_indices()
            .filter(|&i| {
                self.graph
                    .neighbors_directed(i, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|i| self.view(i))
            .collect()
    }

    /// Search the whole graph for a dependency cycle.
    ///
    /// Returns the cycle as a path that starts and ends on the same name, so a
    /// cycle of `n` nodes yields `n + 1` entries.
    pub fn detect_cycles(&self) -> Option<Vec<String>> {
        self.find_cycle(self.graph.node_indices())
    }

    /// Whether the graph contains a cycle anywhere.
    pub fn has_cycle(&self) -> bool {
        self.detect_cycles().is_some()
    }

    /// Depth-first cycle search from `starts`, following dependency edges.
    ///
    /// Uses an explicit frame stack instead of call recursion so graph depth is
    /// bounded only by memory.
    fn find_cycle(&self, starts: impl IntoIterator<Item = NodeIndex>) -> Option<Vec<String>> {
        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];

        for start in starts {
            if marks[start.index()] != Mark::Unvisited {
                continue;
            }
            marks[start.index()] = Mark::OnStack;
            let mut stack = vec![Frame {
                node: start,
                deps: self.sorted_dependencies(start),
                next: 0,
            }];

            while !stack.is_empty() {
                let step = {
                    let top = stack.len() - 1;
                    let frame = &mut stack[top];
                    if frame.next < frame.deps.len() {
                        frame.next += 1;
                        Some(frame.deps[frame.next - 1])
                    } else {
                        None
                    }
                };

                match step {
                    Some(dep) => match marks[dep.index()] {
                        Mark::OnStack => {
                            let begin = stack.iter().position(|f| f.node == dep).unwrap_or(0);
                            let mut path: Vec<String> = stack[begin..]
                                .iter()
                                .map(|f| self.graph[f.node].clone())
                                .collect();
                            path.push(self.graph[dep].clone());
                            return Some(path);
                        }
                        Mark::Unvisited => {
                            marks[dep.index()] = Mark::OnStack;
                            stack.push(Frame {
                                node: dep,
                                deps: self.sorted_dependencies(dep),
                                next: 0,
                            });
                        }
                        Mark::Done => {}
                    },
                    None => {
                        if let Some(frame) = stack.pop() {
                            marks[frame.node.index()] = Mark::Done;
                        }
                    }
                }
            }
        }

        None
    }

    /// Order every node so that each node's dependencies come before it.
    ///
    /// # Errors
    /// Returns `Error::CycleDetected` with the offending path if the graph is
    /// not acyclic.
    pub fn topological_sort(&self) -> Result<Vec<Node<'_>>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let path = self
                .detect_cycles()
                .unwrap_or_else(|| vec![self.graph[cycle.node_id()].clone()]);
            Error::CycleDetected { path }
        })?;
        Ok(sorted.into_iter().map(|i| self.view(i)).collect())
    }

    /// Dependency-first order of `name` and everything it transitively needs.
    ///
    /// Only the induced subgraph is inspected, so a cycle elsewhere in the
    /// graph does not affect the result.
    ///
    /// # Errors
    /// `Error::TargetNotFound` for an unknown name, `Error::CycleDetected` if
    /// the closure itself contains a cycle.
    pub fn build_order_for(&self, name: &str) -> Result<Vec<Node<'_>>> {
        let start = *self
            .index
            .get(name)
            .ok_or_else(|| Error::TargetNotFound(name.to_string()))?;

        if let Some(path) = self.find_cycle([start]) {
            return Err(Error::CycleDetected { path });
        }

        // Post-order over reversed edges emits every dependency before its dependent.
        let reversed = Reversed(&self.graph);
        let mut dfs = DfsPostOrder::new(reversed, start);
        let mut order = Vec::new();
        while let Some(index) = dfs.next(reversed) {
            order.push(self.view(index));
        }
        Ok(order)
    }

    /// `name` plus every node that transitively depends on it.
    ///
    /// An unknown name yields an empty list.
    pub fn find_affected_nodes(&self, name: &str) -> Vec<Node<'_>> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };
        let mut bfs = Bfs::new(&self.graph, start);
        let mut affected = Vec::new();
        while let Some(index) = bfs.next(&self.graph) {
            affected.push(self.view(index));
        }
        affected
    }

    /// Render the graph as an indented dependency tree, one tree per root.
    ///
    /// Subtrees already printed are shown once and then referenced with `(*)`.
    /// Nodes on a cycle are marked `(cycle)`.
    pub fn visualize(&self) -> String {
        let mut out = String::new();
        if self.is_empty() {
            out.push_str("(empty graph)\n");
            return out;
        }

        let mut roots: Vec<NodeIndex> = self.roots().iter().map(|n| n.index()).collect();
        if roots.is_empty() {
            // Every node sits on a cycle; start from all of them.
            roots = self.graph.node_indices().collect();
        }
        roots.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

        let mut printed = vec![false; self.graph.node_count()];
        // (node, prefix for children, line prefix, ancestors on this branch)
        let mut stack: Vec<(NodeIndex, String, String, Vec<NodeIndex>)> = roots
            .into_iter()
            .rev()
            .map(|r| (r, String::new(), String::new(), Vec::new()))
            .collect();

        while let Some((node, child_prefix, line_prefix, ancestors)) = stack.pop() {
            let name = &self.graph[node];
            if ancestors.contains(&node) {
                let _ = writeln!(out, "{}{} (cycle)", line_prefix, name);
                continue;
            }
            let deps = self.sorted_dependencies(node);
            if printed[node.index()] && !deps.is_empty() {
                let _ = writeln!(out, "{}{} (*)", line_prefix, name);
                continue;
            }
            let _ = writeln!(out, "{}{}", line_prefix, name);
            printed[node.index()] = true;

            let mut branch = ancestors;
            branch.push(node);
            let count = deps.len();
            for (i, dep) in deps.into_iter().enumerate().rev() {
                let last = i + 1 == count;
                let connector = if last { "└── " } else { "├── " };
                let extension = if last { "    " } else { "│   " };
                stack.push((
                    dep,
                    format!("{}{}", child_prefix, extension),
                    format!("{}{}", child_prefix, connector),
                    branch.clone(),
                ));
            }
        }
        out
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}
