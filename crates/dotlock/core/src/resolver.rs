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

//! Deadlock Resolution
//!
//! Turns one detected cycle into ranked, purely advisory remediation
//! suggestions. The resolver never mutates the tracker or the detector.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::detector::{DeadlockCycle, DeadlockDetector};
use crate::types::{ProcessId, ResourceId};

/// An advisory suggestion for breaking a deadlock cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resolution {
    /// Terminate one of the processes involved in the cycle
    ProcessTermination {
        /// All processes in the cycle, ascending
        processes: Vec<ProcessId>,
        /// The process recommended for termination
        recommended: ProcessId,
    },
    /// Preempt one of the resources involved in the cycle
    ResourcePreemption {
        /// All resources in the cycle, ascending
        resources: Vec<ResourceId>,
        /// The resource recommended for preemption
        recommended: ResourceId,
    },
}

impl Resolution {
    /// Human-readable description of the strategy
    pub fn description(&self) -> &'static str {
        match self {
            Resolution::ProcessTermination { .. } => "Terminate one of the processes involved in the deadlock",
            Resolution::ResourcePreemption { .. } => "Preempt one of the resources involved in the deadlock",
        }
    }

    /// Human-readable recommendation
    pub fn recommendation(&self) -> String {
        match self {
            Resolution::ProcessTermination { recommended, .. } => {
                format!("Terminate process with PID: {recommended} (oldest)")
            }
            Resolution::ResourcePreemption { recommended, .. } => {
                format!("Preempt resource: {recommended}")
            }
        }
    }
}

/// Produces remediation suggestions for detected cycles
///
/// Stateless beyond read access to the detector's history.
pub struct DeadlockResolver {
    detector: Arc<DeadlockDetector>,
}

impl DeadlockResolver {
    /// Create a resolver over a detector's results
    pub fn new(detector: Arc<DeadlockDetector>) -> Self {
        Self { detector }
    }

    /// Suggest resolutions for one detected cycle
    ///
    /// Partitions the cycle's nodes by kind and emits one suggestion per
    /// non-empty partition. Termination recommends the process with the
    /// lowest identifier. Preemption also recommends the lowest identifier;
    /// the origin drew an arbitrary member of the resource set here, and the
    /// fixed tie-break keeps the output reproducible.
    pub fn suggest_resolutions(&self, cycle: &DeadlockCycle) -> Vec<Resolution> {
        let mut resolutions = Vec::new();

        let processes: BTreeSet<ProcessId> = cycle.processes().into_iter().collect();
        if let Some(&recommended) = processes.first() {
            resolutions.push(Resolution::ProcessTermination {
                processes: processes.iter().copied().collect(),
                recommended,
            });
        }

        let resources: BTreeSet<ResourceId> = cycle.resources().into_iter().collect();
        if let Some(recommended) = resources.first().cloned() {
            resolutions.push(Resolution::ResourcePreemption {
                resources: resources.iter().cloned().collect(),
                recommended,
            });
        }

        resolutions
    }

    /// Suggest resolutions for the first cycle of the most recent detection
    ///
    /// Returns `None` when no deadlock has been detected yet; an empty
    /// history is a normal outcome, not an error.
    pub fn suggest_for_latest(&self) -> Option<Vec<Resolution>> {
        let history = self.detector.get_detection_history();
        let record = history.last()?;
        let cycle = record.cycles.first()?;
        Some(self.suggest_resolutions(cycle))
    }
}
