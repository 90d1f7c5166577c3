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

//! Dotlock Core
//!
//! Models a resource allocation graph over concurrently-executing processes
//! and shared resources, and detects circular waits by cycle analysis.
//! Three components with one-directional data flow: the tracker owns the
//! process/resource state, the detector reads snapshots and enumerates
//! deadlock cycles, and the resolver turns one cycle into advisory
//! remediation suggestions. Front-ends, rendering and live OS process
//! enumeration stay outside the core.

pub mod detector;
pub mod graph;
pub mod resolver;
pub mod tracker;
pub mod types;

// Public exports
pub use detector::{DeadlockCycle, DeadlockDetector, DetectionRecord, DetectionStatistics, DetectorConfig};
pub use graph::{AllocationGraph, Node};
pub use resolver::{DeadlockResolver, Resolution};
pub use tracker::{MonitorConfig, ProcessResourceTracker, ProcessSample, ProcessSource};
pub use types::{CoreError, CoreResult, ProcessId, ProcessRecord, ProcessStatus, ResourceId, SystemSnapshot, generate_timestamp};
