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

// Common types and utilities shared by the tracker, detector and resolver

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Represents a unique identifier for a tracked process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents a unique identifier for a shared resource
///
/// Resources have no lifecycle of their own; one exists the moment any
/// process holds or waits for it. Ordering is lexicographic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub String);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        ResourceId(s.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        ResourceId(s)
    }
}

/// Status of a tracked process, as reported by an external process source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    /// Process is running (the default for manually registered processes)
    #[default]
    Running,
    /// Process is sleeping
    Sleeping,
    /// Process is stopped
    Stopped,
    /// Process has exited but is not yet reaped
    Zombie,
    /// Status could not be determined
    Unknown,
}

/// A tracked process together with its held and awaited resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Display name of the process
    pub name: String,
    /// Last known status
    pub status: ProcessStatus,
    /// Resources currently held by this process
    pub held: BTreeSet<ResourceId>,
    /// Resource this process is currently waiting for, if any
    ///
    /// A process waits for at most one resource at a time in this model.
    pub waiting_for: Option<ResourceId>,
}

impl ProcessRecord {
    /// Create a record for a freshly registered process
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ProcessStatus::Running,
            held: BTreeSet::new(),
            waiting_for: None,
        }
    }
}

/// An atomic, independent copy of the tracked system state
///
/// A snapshot never reflects a partial mutation and shares no mutable
/// storage with the live tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// All tracked processes, keyed by identifier
    pub processes: BTreeMap<ProcessId, ProcessRecord>,
    /// Resource to holders index, derived from the process records
    pub resources: BTreeMap<ResourceId, BTreeSet<ProcessId>>,
}

impl SystemSnapshot {
    /// Number of tracked processes
    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    /// Number of resources that are held or awaited
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Check whether the snapshot contains no processes
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

/// Error types for the deadlock detection core
///
/// The taxonomy is deliberately narrow: unknown process identifiers are
/// reported as boolean `false` from the mutation calls, and an empty
/// detection result or history is a normal outcome, not an error.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for core operations
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Generate a timestamp in nanoseconds since the Unix epoch
pub fn generate_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("Time went backwards").as_nanos() as u64
}
