//! Graph traversal utilities: disconnection detection and execution ordering.

use std::collections::HashSet;

use crate::graph::Graph;

/// Find every node unreachable from the declared entry points.
///
/// Reachability is a DFS from each entry point that exists as a node,
/// following dependency edges only. This handles cycles correctly: a fully
/// mutually-referential cluster with no path from any entry is entirely
/// unreached even though every member has nonzero dependents.
pub fn find_disconnected_from_entry_points(graph: &Graph) -> Vec<String> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = graph
        .entry_points()
        .filter(|id| graph.has_node(id))
        .collect();

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        if let Some(node) = graph.node(id) {
            for dep in node.dependencies() {
                if !visited.contains(dep.as_str()) {
                    stack.push(dep);
                }
            }
        }
    }

    let mut disconnected: Vec<String> = graph
        .identifiers()
        .filter(|id| !visited.contains(id))
        .map(str::to_string)
        .collect();
    disconnected.sort();
    disconnected
}

/// Produce an order in which every node appears after all of its
/// dependencies, starting from `entries`.
///
/// Post-order DFS over dependency edges with a pre-marked visited set;
/// cycles are silently broken by the visited check, so the member through
/// which a cycle was entered ends up after its cyclic peers. Identifiers in
/// `entries` that have no node are skipped.
pub fn resolve_execution_order(graph: &Graph, entries: &[String]) -> Vec<String> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut order: Vec<String> = Vec::new();

    fn visit<'a>(
        graph: &'a Graph,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
        order: &mut Vec<String>,
    ) {
        if !visited.insert(id) {
            return;
        }
        let Some(node) = graph.node(id) else {
            return;
        };
        for dep in node.dependencies() {
            visit(graph, dep, visited, order);
        }
        order.push(id.to_string());
    }

    for entry in entries {
        if graph.has_node(entry) {
            visit(graph, entry, &mut visited, &mut order);
        }
    }
    order
}
