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

//! Deadlock Detection
//!
//! The detector takes one snapshot from the tracker, materializes the
//! resource allocation graph and enumerates the cycles that qualify as
//! deadlocks. Every detection that finds at least one cycle is appended to an
//! immutable history.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::graph::{AllocationGraph, Node};
use crate::tracker::ProcessResourceTracker;
use crate::types::{ProcessId, ResourceId, generate_timestamp};

/// Configuration for deadlock detection
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Minimum node count for a cycle to qualify as a deadlock
    ///
    /// The default of 4 (two processes, two resources) filters out 2-node
    /// process/resource mutual cycles. Classical single-instance RAG theory
    /// treats those as deadlocks too, so the threshold is a policy knob
    /// rather than hard-wired truth.
    pub min_cycle_len: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self { min_cycle_len: 4 }
    }
}

/// A qualifying cycle in the resource allocation graph
///
/// Nodes alternate between processes and resources and form a closed walk;
/// the edge from the last node back to the first is implied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockCycle {
    nodes: Vec<Node>,
}

impl DeadlockCycle {
    /// Wrap an ordered node sequence
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Nodes of the cycle in walk order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of nodes in the cycle
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check whether the cycle contains no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Process identifiers in the cycle, in walk order
    pub fn processes(&self) -> Vec<ProcessId> {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                Node::Process(pid) => Some(*pid),
                Node::Resource(_) => None,
            })
            .collect()
    }

    /// Resource identifiers in the cycle, in walk order
    pub fn resources(&self) -> Vec<ResourceId> {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                Node::Resource(rid) => Some(rid.clone()),
                Node::Process(_) => None,
            })
            .collect()
    }

    /// Check whether a process takes part in this cycle
    pub fn contains_process(&self, pid: ProcessId) -> bool {
        self.nodes.contains(&Node::Process(pid))
    }
}

impl fmt::Display for DeadlockCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            write!(f, "{node} -> ")?;
        }
        if let Some(first) = self.nodes.first() {
            write!(f, "{first}")?;
        }
        Ok(())
    }
}

/// One detection pass that found deadlocks
///
/// Records are immutable once appended to the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// Nanoseconds since the Unix epoch at detection time
    pub detected_at: u64,
    /// The qualifying cycles found in this pass
    pub cycles: Vec<DeadlockCycle>,
    /// The allocation graph the cycles were found in
    pub graph: AllocationGraph,
}

/// Statistics about deadlock detection
#[derive(Debug, Clone, Default)]
pub struct DetectionStatistics {
    /// Total number of detection passes run
    pub detection_runs: u64,
    /// Total number of qualifying cycles found across all passes
    pub total_deadlocks_detected: u64,
    /// Average detection time in microseconds
    pub average_detection_time_us: u64,
}

/// Detects circular waits over tracker snapshots
pub struct DeadlockDetector {
    /// Source of system snapshots; never mutated from here
    tracker: Arc<ProcessResourceTracker>,
    /// Detection policy
    config: DetectorConfig,
    /// Append-only detection history
    history: Mutex<Vec<DetectionRecord>>,
    /// Running statistics
    statistics: Mutex<DetectionStatistics>,
}

impl DeadlockDetector {
    /// Create a detector with the default policy
    pub fn new(tracker: Arc<ProcessResourceTracker>) -> Self {
        Self::with_config(tracker, DetectorConfig::default())
    }

    /// Create a detector with an explicit policy
    pub fn with_config(tracker: Arc<ProcessResourceTracker>, config: DetectorConfig) -> Self {
        Self {
            tracker,
            config,
            history: Mutex::new(Vec::new()),
            statistics: Mutex::new(DetectionStatistics::default()),
        }
    }

    /// Run one detection pass and return the qualifying cycles
    ///
    /// Takes one atomic snapshot, builds the allocation graph and enumerates
    /// its simple cycles, keeping those at or above the configured minimum
    /// length. A pass that finds deadlocks appends one record to the history;
    /// a pass that finds none leaves the history untouched. The result is
    /// advisory: the live state may have moved on by the time it is read.
    pub fn detect_deadlocks(&self) -> Vec<DeadlockCycle> {
        let detection_start = Instant::now();
        let snapshot = self.tracker.get_system_state();
        let graph = AllocationGraph::from_snapshot(&snapshot);

        let deadlocks: Vec<DeadlockCycle> = graph
            .simple_cycles()
            .into_iter()
            .filter(|cycle| cycle.len() >= self.config.min_cycle_len)
            .map(DeadlockCycle::new)
            .collect();

        self.record_statistics(detection_start, deadlocks.len());

        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            deadlocks = deadlocks.len(),
            "detection pass complete"
        );

        if !deadlocks.is_empty() {
            warn!(count = deadlocks.len(), "deadlocks detected");
            self.history.lock().push(DetectionRecord {
                detected_at: generate_timestamp(),
                cycles: deadlocks.clone(),
                graph,
            });
        }

        deadlocks
    }

    /// All detection records in append order
    pub fn get_detection_history(&self) -> Vec<DetectionRecord> {
        self.history.lock().clone()
    }

    /// Current detection statistics
    pub fn statistics(&self) -> DetectionStatistics {
        self.statistics.lock().clone()
    }

    fn record_statistics(&self, detection_start: Instant, deadlocks_found: usize) {
        let detection_time_us = detection_start.elapsed().as_micros() as u64;
        let mut stats = self.statistics.lock();
        stats.detection_runs += 1;
        stats.total_deadlocks_detected += deadlocks_found as u64;
        if stats.average_detection_time_us == 0 {
            stats.average_detection_time_us = detection_time_us;
        } else {
            stats.average_detection_time_us = (stats.average_detection_time_us + detection_time_us) / 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(s: &str) -> ResourceId {
        ResourceId::from(s)
    }

    /// Two processes, two resources, mutual wait.
    fn classic_deadlock() -> Arc<ProcessResourceTracker> {
        let tracker = Arc::new(ProcessResourceTracker::new());
        tracker.add_process(ProcessId(1), "a");
        tracker.add_process(ProcessId(2), "b");
        tracker.allocate_resource(ProcessId(1), rid("x"));
        tracker.allocate_resource(ProcessId(2), rid("y"));
        tracker.set_waiting_for(ProcessId(1), rid("y"));
        tracker.set_waiting_for(ProcessId(2), rid("x"));
        tracker
    }

    #[test]
    fn test_empty_system_has_no_deadlock() {
        let tracker = Arc::new(ProcessResourceTracker::new());
        let detector = DeadlockDetector::new(tracker);

        assert!(detector.detect_deadlocks().is_empty());
        assert!(detector.get_detection_history().is_empty());
    }

    #[test]
    fn test_classic_two_process_deadlock() {
        let detector = DeadlockDetector::new(classic_deadlock());

        let deadlocks = detector.detect_deadlocks();
        assert_eq!(deadlocks.len(), 1);

        let cycle = &deadlocks[0];
        assert_eq!(cycle.len(), 4);
        assert_eq!(cycle.processes(), vec![ProcessId(1), ProcessId(2)]);
        assert_eq!(cycle.resources().len(), 2);
        assert!(cycle.resources().contains(&rid("x")));
        assert!(cycle.resources().contains(&rid("y")));

        let history = detector.get_detection_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].cycles, deadlocks);
        assert!(history[0].detected_at > 0);
    }

    #[test]
    fn test_no_cycle_leaves_history_untouched() {
        let tracker = Arc::new(ProcessResourceTracker::new());
        tracker.add_process(ProcessId(1), "a");
        tracker.add_process(ProcessId(2), "b");
        tracker.allocate_resource(ProcessId(1), rid("x"));
        // P2 waits for x, P1 waits for nothing: a chain, not a cycle.
        tracker.set_waiting_for(ProcessId(2), rid("x"));

        let detector = DeadlockDetector::new(tracker);
        assert!(detector.detect_deadlocks().is_empty());
        assert!(detector.get_detection_history().is_empty());
    }

    #[test]
    fn test_clear_system_clears_deadlocks() {
        let tracker = classic_deadlock();
        let detector = DeadlockDetector::new(Arc::clone(&tracker));
        assert_eq!(detector.detect_deadlocks().len(), 1);

        tracker.clear_system();
        assert!(detector.detect_deadlocks().is_empty());
        // History keeps the earlier record.
        assert_eq!(detector.get_detection_history().len(), 1);
    }

    #[test]
    fn test_three_process_ring_is_one_cycle_of_six() {
        let tracker = Arc::new(ProcessResourceTracker::new());
        for (pid, name) in [(1, "a"), (2, "b"), (3, "c")] {
            tracker.add_process(ProcessId(pid), name);
        }
        tracker.allocate_resource(ProcessId(1), rid("x"));
        tracker.allocate_resource(ProcessId(2), rid("y"));
        tracker.allocate_resource(ProcessId(3), rid("z"));
        tracker.set_waiting_for(ProcessId(1), rid("y"));
        tracker.set_waiting_for(ProcessId(2), rid("z"));
        tracker.set_waiting_for(ProcessId(3), rid("x"));

        let detector = DeadlockDetector::new(tracker);
        let deadlocks = detector.detect_deadlocks();
        assert_eq!(deadlocks.len(), 1);
        assert_eq!(deadlocks[0].len(), 6);
        let mut processes = deadlocks[0].processes();
        processes.sort();
        assert_eq!(processes, vec![ProcessId(1), ProcessId(2), ProcessId(3)]);
    }

    #[test]
    fn test_disjoint_deadlocks_are_all_reported() {
        let tracker = Arc::new(ProcessResourceTracker::new());
        for (pid, name) in [(1, "a"), (2, "b"), (3, "c"), (4, "d")] {
            tracker.add_process(ProcessId(pid), name);
        }
        tracker.allocate_resource(ProcessId(1), rid("w"));
        tracker.allocate_resource(ProcessId(2), rid("x"));
        tracker.set_waiting_for(ProcessId(1), rid("x"));
        tracker.set_waiting_for(ProcessId(2), rid("w"));
        tracker.allocate_resource(ProcessId(3), rid("y"));
        tracker.allocate_resource(ProcessId(4), rid("z"));
        tracker.set_waiting_for(ProcessId(3), rid("z"));
        tracker.set_waiting_for(ProcessId(4), rid("y"));

        let detector = DeadlockDetector::new(tracker);
        let deadlocks = detector.detect_deadlocks();
        assert_eq!(deadlocks.len(), 2);
        assert!(deadlocks.iter().all(|cycle| cycle.len() == 4));
    }

    #[test]
    fn test_holder_without_wait_is_never_deadlocked() {
        let tracker = Arc::new(ProcessResourceTracker::new());
        tracker.add_process(ProcessId(1), "hoarder");
        for name in ["a", "b", "c", "d", "e"] {
            tracker.allocate_resource(ProcessId(1), rid(name));
        }

        let detector = DeadlockDetector::new(tracker);
        assert!(detector.detect_deadlocks().is_empty());
    }

    #[test]
    fn test_min_cycle_len_policy_admits_two_node_cycles() {
        // A process waiting for a resource it also holds forms a 2-node
        // cycle, filtered by the default policy but reported when the
        // threshold is lowered.
        let tracker = Arc::new(ProcessResourceTracker::new());
        tracker.add_process(ProcessId(1), "a");
        tracker.allocate_resource(ProcessId(1), rid("x"));
        tracker.set_waiting_for(ProcessId(1), rid("x"));

        let default_detector = DeadlockDetector::new(Arc::clone(&tracker));
        assert!(default_detector.detect_deadlocks().is_empty());

        let strict_detector = DeadlockDetector::with_config(tracker, DetectorConfig { min_cycle_len: 2 });
        let deadlocks = strict_detector.detect_deadlocks();
        assert_eq!(deadlocks.len(), 1);
        assert_eq!(deadlocks[0].len(), 2);
    }

    #[test]
    fn test_repeated_detection_appends_one_record_each() {
        let detector = DeadlockDetector::new(classic_deadlock());

        detector.detect_deadlocks();
        detector.detect_deadlocks();

        let history = detector.get_detection_history();
        assert_eq!(history.len(), 2);
        assert!(history[0].detected_at <= history[1].detected_at);
    }

    #[test]
    fn test_detection_is_deterministic_on_unchanged_input() {
        let detector = DeadlockDetector::new(classic_deadlock());
        assert_eq!(detector.detect_deadlocks(), detector.detect_deadlocks());
    }

    #[test]
    fn test_statistics_accounting() {
        let detector = DeadlockDetector::new(classic_deadlock());

        let initial = detector.statistics();
        assert_eq!(initial.detection_runs, 0);
        assert_eq!(initial.total_deadlocks_detected, 0);

        detector.detect_deadlocks();
        detector.detect_deadlocks();

        let stats = detector.statistics();
        assert_eq!(stats.detection_runs, 2);
        assert_eq!(stats.total_deadlocks_detected, 2);
    }

    #[test]
    fn test_cycle_display_closes_the_walk() {
        let cycle = DeadlockCycle::new(vec![
            Node::Process(ProcessId(1)),
            Node::Resource(rid("x")),
            Node::Process(ProcessId(2)),
            Node::Resource(rid("y")),
        ]);
        assert_eq!(cycle.to_string(), "P1 -> Rx -> P2 -> Ry -> P1");
    }
}
