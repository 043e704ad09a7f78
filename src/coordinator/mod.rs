//! Integrity Probe Coordinator
//!
//! Schedules the probe catalog as contiguous groups on a small worker pool.
//! Two modes share the same scheduling:
//!
//! - **Fast verdict** ([`race`]): groups race to the first positive probe;
//!   groups that have not started when a positive arrives are skipped.
//! - **Diagnostic report** ([`report`]): every probe runs, nothing is
//!   cancelled, and the full per-probe map is returned.

pub mod race;
pub mod report;

pub use race::{FastVerdict, ProbeFailure, ProbeHit};
pub use report::{ClassificationView, ScanReport};

use crate::config::loader::ProbeSettings;
use crate::probe::{Platform, Probe, ProbeCatalog};
use crossbeam_channel::Receiver;
use std::ops::Range;
use std::sync::Arc;
use std::thread;

/// Split `len` items into at most `groups` contiguous, balanced ranges.
///
/// Earlier groups take the remainder, so sizes differ by at most one.
/// Empty input yields no groups.
pub fn partition(len: usize, groups: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let groups = groups.clamp(1, len);
    let base = len / groups;
    let extra = len % groups;

    let mut ranges = Vec::with_capacity(groups);
    let mut start = 0;
    for index in 0..groups {
        let size = base + usize::from(index < extra);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

/// One unit of scheduled work: a slice of the catalog
#[derive(Debug, Clone)]
pub struct GroupTask {
    pub index: usize,
    pub probes: Vec<Probe>,
}

/// Runs a probe catalog in groups
#[derive(Debug, Clone)]
pub struct IntegrityCoordinator {
    catalog: Arc<ProbeCatalog>,
    groups: usize,
    parallelism: usize,
    platform: Platform,
}

impl IntegrityCoordinator {
    pub fn new(catalog: ProbeCatalog, groups: usize, parallelism: usize) -> Self {
        Self {
            catalog: Arc::new(catalog),
            groups: groups.max(1),
            parallelism: parallelism.max(1),
            platform: Platform::current(),
        }
    }

    pub fn from_settings(catalog: ProbeCatalog, settings: &ProbeSettings) -> Self {
        Self::new(catalog, settings.groups, settings.effective_parallelism())
    }

    /// Evaluate probes as if running on another platform
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn catalog(&self) -> &ProbeCatalog {
        &self.catalog
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// The catalog sliced into this coordinator's groups
    pub fn group_tasks(&self) -> Vec<GroupTask> {
        let probes = self.catalog.probes();
        partition(probes.len(), self.groups)
            .into_iter()
            .enumerate()
            .map(|(index, range)| GroupTask {
                index,
                probes: probes[range].to_vec(),
            })
            .collect()
    }

    /// Queue every task and start the worker pool.
    ///
    /// Workers pull tasks in submission order, so with a single worker group
    /// N+1 never starts before group N has finished. The returned receiver
    /// disconnects once every task has been handled.
    fn dispatch<T, F>(&self, tasks: Vec<GroupTask>, work: F) -> Receiver<T>
    where
        T: Send + 'static,
        F: Fn(GroupTask) -> T + Send + Sync + 'static,
    {
        let workers = self.parallelism.min(tasks.len()).max(1);
        let (task_tx, task_rx) = crossbeam_channel::unbounded();
        let (result_tx, result_rx) = crossbeam_channel::unbounded();

        for task in tasks {
            // receiver is alive in this scope
            let _ = task_tx.send(task);
        }
        drop(task_tx);

        let work = Arc::new(work);
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let work = Arc::clone(&work);
            thread::spawn(move || {
                while let Ok(task) = task_rx.recv() {
                    // send fails once the coordinator has stopped listening
                    let _ = result_tx.send(work(task));
                }
            });
        }

        result_rx
    }
}
