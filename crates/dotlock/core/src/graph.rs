// Dotlock
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Resource Allocation Graph
//!
//! Directed graph with one node per process and per resource. A process to
//! resource edge means "holds"; a resource to process edge means "is awaited
//! by". Cycle search is split into a cheap existence check and a full
//! simple-cycle enumeration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{ProcessId, ResourceId, SystemSnapshot};

/// A node in the resource allocation graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Node {
    /// A process node
    Process(ProcessId),
    /// A resource node
    Resource(ResourceId),
}

impl Node {
    /// Check whether this node is a process
    pub fn is_process(&self) -> bool {
        matches!(self, Node::Process(_))
    }

    /// Check whether this node is a resource
    pub fn is_resource(&self) -> bool {
        matches!(self, Node::Resource(_))
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Process(pid) => write!(f, "P{pid}"),
            Node::Resource(rid) => write!(f, "R{rid}"),
        }
    }
}

/// Directed resource allocation graph built from one system snapshot
///
/// Adjacency is kept in ordered maps so traversal order is stable across
/// runs, which makes detection results reproducible and testable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationGraph {
    edges: BTreeMap<Node, BTreeSet<Node>>,
}

impl AllocationGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the allocation graph for a snapshot
    ///
    /// Adds a node for every process and every resource present in the
    /// snapshot (held, holder-indexed or awaited), a holds edge per held
    /// resource, and a waits edge for each process's single wait target.
    pub fn from_snapshot(snapshot: &SystemSnapshot) -> Self {
        let mut graph = Self::new();

        for (pid, record) in &snapshot.processes {
            graph.add_node(Node::Process(*pid));
            for rid in &record.held {
                graph.add_edge(Node::Process(*pid), Node::Resource(rid.clone()));
            }
            if let Some(rid) = &record.waiting_for {
                graph.add_edge(Node::Resource(rid.clone()), Node::Process(*pid));
            }
        }

        for rid in snapshot.resources.keys() {
            graph.add_node(Node::Resource(rid.clone()));
        }

        graph
    }

    /// Ensure a node exists
    pub fn add_node(&mut self, node: Node) {
        self.edges.entry(node).or_default();
    }

    /// Add a directed edge, creating both endpoints as needed
    pub fn add_edge(&mut self, from: Node, to: Node) {
        self.add_node(to.clone());
        self.edges.entry(from).or_default().insert(to);
    }

    /// Iterate over all nodes in ascending order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.edges.keys()
    }

    /// Iterate over all edges as (from, to) pairs
    pub fn iter_edges(&self) -> impl Iterator<Item = (&Node, &Node)> {
        self.edges.iter().flat_map(|(from, tos)| tos.iter().map(move |to| (from, to)))
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of directed edges
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|tos| tos.len()).sum()
    }

    /// Check whether the graph contains no nodes
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    fn successors(&self, node: &Node) -> impl Iterator<Item = &Node> {
        self.edges.get(node).into_iter().flatten()
    }

    /// Check whether any directed cycle exists
    ///
    /// Three-color depth-first search: a node is white until first visited,
    /// gray while on the current path, black once fully explored. An edge
    /// into a gray node closes a cycle. Runs in O(nodes + edges).
    pub fn has_cycle(&self) -> bool {
        let mut gray = BTreeSet::new();
        let mut black = BTreeSet::new();

        for node in self.edges.keys() {
            if !black.contains(node) && self.color_dfs(node, &mut gray, &mut black) {
                return true;
            }
        }
        false
    }

    fn color_dfs(&self, node: &Node, gray: &mut BTreeSet<Node>, black: &mut BTreeSet<Node>) -> bool {
        gray.insert(node.clone());
        for next in self.successors(node) {
            if gray.contains(next) {
                return true;
            }
            if !black.contains(next) && self.color_dfs(next, gray, black) {
                return true;
            }
        }
        gray.remove(node);
        black.insert(node.clone());
        false
    }

    /// Enumerate all simple cycles
    ///
    /// Each cycle is reported exactly once as its node sequence rotated to
    /// start at the smallest node; the closing edge back to the first node is
    /// implied. Enumeration is worst-case exponential in the number of nodes,
    /// which is acceptable here because graphs are bounded by the live
    /// process and resource counts; `has_cycle` is consulted first so
    /// cycle-free graphs pay only the linear check.
    pub fn simple_cycles(&self) -> Vec<Vec<Node>> {
        if !self.has_cycle() {
            return Vec::new();
        }

        let mut cycles = Vec::new();
        for root in self.edges.keys() {
            let mut path = vec![root.clone()];
            let mut on_path = BTreeSet::new();
            on_path.insert(root.clone());
            self.cycle_dfs(root, root, &mut path, &mut on_path, &mut cycles);
        }
        cycles
    }

    fn cycle_dfs(&self, root: &Node, current: &Node, path: &mut Vec<Node>, on_path: &mut BTreeSet<Node>, cycles: &mut Vec<Vec<Node>>) {
        for next in self.successors(current) {
            if next == root {
                cycles.push(path.clone());
            } else if next > root && !on_path.contains(next) {
                // Restricting the walk to nodes greater than the root yields
                // each simple cycle once, anchored at its smallest node.
                path.push(next.clone());
                on_path.insert(next.clone());
                self.cycle_dfs(root, next, path, on_path, cycles);
                on_path.remove(next);
                path.pop();
            }
        }
    }
}
