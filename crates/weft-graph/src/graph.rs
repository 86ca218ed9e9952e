//! Identifier-keyed dependency graph with an explicit dependents inverse index.
//!
//! Every mutation goes through a small set of invariant-enforcing primitives.
//! Structural violations (duplicate node, self-edge, edge touching a missing
//! node) are programmer errors in the calling layer and panic immediately
//! rather than leaving the graph silently inconsistent.

use std::collections::{HashMap, HashSet};

/// One file (or virtual module) in the dependency graph.
///
/// `dependencies` and `dependents` are insertion-ordered sets kept as vectors;
/// an edge A→B always appears in both `A.dependencies` and `B.dependents`, or
/// in neither.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    dependencies: Vec<String>,
    dependents: Vec<String>,
    is_entry_point: bool,
}

impl Node {
    /// Identifiers this node points to, in the order the edges were added.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Identifiers pointing to this node, in the order the edges were added.
    pub fn dependents(&self) -> &[String] {
        &self.dependents
    }

    /// Whether this node was declared as a build root.
    pub fn is_entry_point(&self) -> bool {
        self.is_entry_point
    }
}

/// The dependency graph: identifier → [`Node`], plus the declared entry
/// points. Entry points are declared independently of node existence, so an
/// identifier can be marked as an entry before it has been traced.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: HashMap<String, Node>,
    entry_points: HashSet<String>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    /// Add a node. Panics if the identifier is already present.
    pub fn add_node(&mut self, id: &str) {
        if self.nodes.contains_key(id) {
            panic!("add_node: node already defined: {id}");
        }
        let node = Node {
            is_entry_point: self.entry_points.contains(id),
            ..Node::default()
        };
        self.nodes.insert(id.to_string(), node);
    }

    /// Remove a node. Panics if the identifier is absent.
    ///
    /// Edges touching the node must already have been removed via
    /// [`Graph::remove_edge`]; removing a node that still participates in
    /// edges leaves dangling references, which is a bug in the caller.
    /// The entry-point declaration survives removal so the identifier can be
    /// re-traced later.
    pub fn remove_node(&mut self, id: &str) {
        if self.nodes.remove(id).is_none() {
            panic!("remove_node: node not defined: {id}");
        }
    }

    /// Add the edge `head → tail`, updating both the dependency list of
    /// `head` and the dependents list of `tail`.
    ///
    /// Panics on a self-edge or if either endpoint is missing. Adding an edge
    /// that already exists is a no-op; tracer retraces legitimately rediscover
    /// existing edges.
    pub fn add_edge(&mut self, head: &str, tail: &str) {
        if head == tail {
            panic!("add_edge: self-edge on {head}");
        }
        if !self.nodes.contains_key(head) {
            panic!("add_edge: head not defined: {head}");
        }
        if !self.nodes.contains_key(tail) {
            panic!("add_edge: tail not defined: {tail}");
        }
        let head_node = self.nodes.get_mut(head).unwrap();
        if head_node.dependencies.iter().any(|d| d == tail) {
            return;
        }
        head_node.dependencies.push(tail.to_string());
        self.nodes
            .get_mut(tail)
            .unwrap()
            .dependents
            .push(head.to_string());
    }

    /// Remove the edge `head → tail`. The exact inverse of
    /// [`Graph::add_edge`]; panics if either endpoint is missing.
    pub fn remove_edge(&mut self, head: &str, tail: &str) {
        if !self.nodes.contains_key(head) {
            panic!("remove_edge: head not defined: {head}");
        }
        if !self.nodes.contains_key(tail) {
            panic!("remove_edge: tail not defined: {tail}");
        }
        self.nodes
            .get_mut(head)
            .unwrap()
            .dependencies
            .retain(|d| d != tail);
        self.nodes
            .get_mut(tail)
            .unwrap()
            .dependents
            .retain(|d| d != head);
    }

    /// Declare an identifier as an entry point. Valid before the node exists;
    /// once the node is (or becomes) present its flag reflects the
    /// declaration.
    pub fn add_entry_point(&mut self, id: &str) {
        self.entry_points.insert(id.to_string());
        if let Some(node) = self.nodes.get_mut(id) {
            node.is_entry_point = true;
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn is_entry_point(&self, id: &str) -> bool {
        self.entry_points.contains(id)
    }

    pub fn entry_points(&self) -> impl Iterator<Item = &str> {
        self.entry_points.iter().map(String::as_str)
    }

    /// Remove a node along with every edge that touches it, detaching each
    /// edge from the surviving endpoint first. Safe to call repeatedly while
    /// sweeping a set of nodes in any order.
    pub fn remove_node_and_edges(&mut self, id: &str) {
        let Some(node) = self.nodes.get(id).cloned() else {
            panic!("remove_node_and_edges: node not defined: {id}");
        };
        for dep in &node.dependencies {
            if self.nodes.contains_key(dep) {
                self.remove_edge(id, dep);
            }
        }
        for dependent in &node.dependents {
            if self.nodes.contains_key(dependent) {
                self.remove_edge(dependent, id);
            }
        }
        self.remove_node(id);
    }
}
