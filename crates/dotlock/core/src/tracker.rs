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

//! Process and Resource Tracking
//!
//! This module owns the authoritative mapping of processes to their held and
//! awaited resources. All access goes through a single mutex; snapshots are
//! deep copies taken atomically with respect to concurrent mutators.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::types::{CoreError, CoreResult, ProcessId, ProcessRecord, ProcessStatus, ResourceId, SystemSnapshot};

/// Configuration for the background maintenance task
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between maintenance ticks
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// One process observation delivered by an external process source
#[derive(Debug, Clone)]
pub struct ProcessSample {
    /// Process identifier
    pub pid: ProcessId,
    /// Display name
    pub name: String,
    /// Reported status
    pub status: ProcessStatus,
}

/// External supplier of live process observations
///
/// The maintenance task folds each poll result into the process map. The
/// source only reports identity and status; resource allocations are always
/// explicit, caller-driven, and never invented from a sample.
pub trait ProcessSource: Send + Sync {
    /// Return the current set of observed processes
    fn poll_processes(&self) -> Vec<ProcessSample>;
}

/// Live process and resource state, guarded by a single mutex
struct TrackerState {
    /// All registered processes, keyed by identifier
    processes: BTreeMap<ProcessId, ProcessRecord>,
    /// Resource to holders index, kept consistent with the held sets
    resources: BTreeMap<ResourceId, BTreeSet<ProcessId>>,
}

impl TrackerState {
    fn new() -> Self {
        Self {
            processes: BTreeMap::new(),
            resources: BTreeMap::new(),
        }
    }

    /// Drop every holder-index entry pointing at `pid` for the given resources
    fn unindex_holder(&mut self, pid: ProcessId, held: &BTreeSet<ResourceId>) {
        for rid in held {
            if let Some(holders) = self.resources.get_mut(rid) {
                holders.remove(&pid);
                if holders.is_empty() {
                    self.resources.remove(rid);
                }
            }
        }
    }
}

/// Tracks processes and the resources they hold or wait for
///
/// The tracker knows nothing about graphs or deadlocks; it only records what
/// it is told and hands out consistent snapshots.
pub struct ProcessResourceTracker {
    /// Guarded live state; the raw maps are never exposed
    state: Arc<Mutex<TrackerState>>,
    /// Optional external process-list supplier
    source: Option<Arc<dyn ProcessSource>>,
    /// Maintenance task configuration
    config: MonitorConfig,
    /// Whether the maintenance task is running
    is_running: Arc<AtomicBool>,
}

impl ProcessResourceTracker {
    /// Create a tracker with the default configuration and no process source
    pub fn new() -> Self {
        Self::with_config(MonitorConfig::default())
    }

    /// Create a tracker with an explicit configuration
    pub fn with_config(config: MonitorConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState::new())),
            source: None,
            config,
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach an external process source consumed by the maintenance task
    pub fn with_source(mut self, source: Arc<dyn ProcessSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Register a process with no held or awaited resources
    ///
    /// Re-registering an existing identifier overwrites the record (last
    /// write wins) and releases any resources indexed under the old record.
    pub fn add_process(&self, pid: ProcessId, name: impl Into<String>) {
        let mut state = self.state.lock();
        if let Some(old) = state.processes.remove(&pid) {
            let held = old.held;
            state.unindex_holder(pid, &held);
        }
        state.processes.insert(pid, ProcessRecord::new(name));
    }

    /// Record that `pid` now holds `rid`
    ///
    /// Multiple holders per resource are permitted. Returns `false` without
    /// effect when the process is unknown.
    pub fn allocate_resource(&self, pid: ProcessId, rid: ResourceId) -> bool {
        let mut state = self.state.lock();
        match state.processes.get_mut(&pid) {
            Some(record) => {
                record.held.insert(rid.clone());
                state.resources.entry(rid).or_default().insert(pid);
                true
            }
            None => false,
        }
    }

    /// Record that `pid` is waiting for `rid`, replacing any prior wait target
    ///
    /// Returns `false` without effect when the process is unknown.
    pub fn set_waiting_for(&self, pid: ProcessId, rid: ResourceId) -> bool {
        let mut state = self.state.lock();
        match state.processes.get_mut(&pid) {
            Some(record) => {
                record.waiting_for = Some(rid);
                true
            }
            None => false,
        }
    }

    /// Clear the wait target of `pid`, typically when its wait was satisfied
    ///
    /// Returns `false` when the process is unknown.
    pub fn clear_waiting(&self, pid: ProcessId) -> bool {
        let mut state = self.state.lock();
        match state.processes.get_mut(&pid) {
            Some(record) => {
                record.waiting_for = None;
                true
            }
            None => false,
        }
    }

    /// Take an atomic, independent snapshot of the current state
    pub fn get_system_state(&self) -> SystemSnapshot {
        let state = self.state.lock();
        SystemSnapshot {
            processes: state.processes.clone(),
            resources: state.resources.clone(),
        }
    }

    /// Remove all processes and resources
    pub fn clear_system(&self) {
        let mut state = self.state.lock();
        state.processes.clear();
        state.resources.clear();
    }

    /// Start the background maintenance task
    ///
    /// The task ticks once per configured interval. Each tick acquires the
    /// same mutex as the mutation operations and folds the attached process
    /// source (if any) into the process map. Returns an error if the task is
    /// already running.
    pub fn start_monitoring(&self) -> CoreResult<()> {
        if self.is_running.swap(true, Ordering::AcqRel) {
            return Err(CoreError::InvalidOperation("Monitoring already running".to_string()));
        }

        let state = Arc::clone(&self.state);
        let source = self.source.clone();
        let is_running = Arc::clone(&self.is_running);
        let poll_interval = self.config.poll_interval;

        info!(interval_ms = poll_interval.as_millis() as u64, "starting process monitor");

        std::thread::spawn(move || {
            while is_running.load(Ordering::Acquire) {
                maintenance_tick(&state, source.as_deref());
                std::thread::sleep(poll_interval);
            }
            debug!("process monitor stopped");
        });

        Ok(())
    }

    /// Signal the maintenance task to terminate
    ///
    /// Cancellation is cooperative: the flag is polled once per interval, so
    /// worst-case shutdown latency equals one interval.
    pub fn stop_monitoring(&self) {
        self.is_running.store(false, Ordering::Release);
    }

    /// Check whether the maintenance task is running
    pub fn is_monitoring(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }
}

/// One pass of background upkeep
///
/// Folds the source's observations into the process map. Only identity and
/// status are taken from a sample; held sets and wait targets are left alone.
fn maintenance_tick(state: &Mutex<TrackerState>, source: Option<&dyn ProcessSource>) {
    let Some(source) = source else {
        // No source attached: nothing to synchronize.
        return;
    };

    let samples = source.poll_processes();
    let mut state = state.lock();
    for sample in samples {
        state
            .processes
            .entry(sample.pid)
            .and_modify(|record| {
                record.name = sample.name.clone();
                record.status = sample.status;
            })
            .or_insert_with(|| {
                let mut record = ProcessRecord::new(sample.name.clone());
                record.status = sample.status;
                record
            });
    }
}

impl Default for ProcessResourceTracker {
    fn default() -> Self {
        Self::new()
    }
}
