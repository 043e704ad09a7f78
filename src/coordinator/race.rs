/// Race-to-positive fast verdict
///
/// Each group runs its probes in order and stops at the first positive.
/// A shared cancellation flag is checked before a group starts and before
/// every probe; a probe already running always finishes. The first positive
/// group raises the flag and the coordinator answers immediately without
/// waiting for the others.
use super::{GroupTask, IntegrityCoordinator};
use crate::observability::metrics;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// The probe that decided a positive verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeHit {
    pub probe_id: String,
    pub group: usize,
}

/// A probe whose underlying tool failed unexpectedly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub probe_id: String,
    pub error: String,
}

/// Outcome of a fast verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastVerdict {
    pub compromised: bool,
    pub trigger: Option<ProbeHit>,
    /// Failures observed before the verdict was reached
    pub failures: Vec<ProbeFailure>,
    pub groups_completed: usize,
    pub groups_total: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug)]
enum GroupOutcome {
    Positive {
        group: usize,
        probe_id: &'static str,
        failures: Vec<ProbeFailure>,
    },
    Negative {
        failures: Vec<ProbeFailure>,
    },
    /// Stopped between probes after another group went positive
    Cancelled {
        failures: Vec<ProbeFailure>,
    },
    /// Never started
    Skipped,
}

impl IntegrityCoordinator {
    /// Race the groups to a first positive probe.
    pub fn fast_verdict(&self) -> FastVerdict {
        let started = Instant::now();
        let tasks = self.group_tasks();
        let groups_total = tasks.len();
        let cancel = Arc::new(AtomicBool::new(false));
        let platform = self.platform();

        let worker_cancel = Arc::clone(&cancel);
        let results = self.dispatch(tasks, move |task| run_group(task, platform, &worker_cancel));

        let mut verdict = FastVerdict {
            compromised: false,
            trigger: None,
            failures: Vec::new(),
            groups_completed: 0,
            groups_total,
            elapsed_ms: 0,
        };

        for outcome in results.iter() {
            match outcome {
                GroupOutcome::Positive {
                    group,
                    probe_id,
                    failures,
                } => {
                    verdict.compromised = true;
                    verdict.trigger = Some(ProbeHit {
                        probe_id: probe_id.to_string(),
                        group,
                    });
                    verdict.failures.extend(failures);
                    verdict.groups_completed += 1;
                    break;
                }
                GroupOutcome::Negative { failures } => {
                    verdict.failures.extend(failures);
                    verdict.groups_completed += 1;
                }
                GroupOutcome::Cancelled { failures } => verdict.failures.extend(failures),
                GroupOutcome::Skipped => {}
            }
        }

        let elapsed = started.elapsed();
        verdict.elapsed_ms = elapsed.as_millis() as u64;
        metrics::get_metrics().record_fast_verdict(
            verdict.compromised,
            groups_total - verdict.groups_completed,
            elapsed,
        );

        match &verdict.trigger {
            Some(hit) => info!(
                "fast verdict: compromised ({} in group {}) after {} ms",
                hit.probe_id, hit.group, verdict.elapsed_ms
            ),
            None => info!(
                "fast verdict: clean, {}/{} groups, {} failures, {} ms",
                verdict.groups_completed,
                groups_total,
                verdict.failures.len(),
                verdict.elapsed_ms
            ),
        }
        verdict
    }
}

fn run_group(task: GroupTask, platform: crate::probe::Platform, cancel: &AtomicBool) -> GroupOutcome {
    if cancel.load(Ordering::SeqCst) {
        debug!("group {} skipped before start", task.index);
        return GroupOutcome::Skipped;
    }

    let mut failures = Vec::new();
    for probe in &task.probes {
        if cancel.load(Ordering::SeqCst) {
            debug!("group {} cancelled before {}", task.index, probe.id);
            return GroupOutcome::Cancelled { failures };
        }
        match probe.evaluate_on(platform) {
            Ok(true) => {
                // raise the flag before reporting so no queued group can start
                cancel.store(true, Ordering::SeqCst);
                return GroupOutcome::Positive {
                    group: task.index,
                    probe_id: probe.id,
                    failures,
                };
            }
            Ok(false) => {}
            Err(err) => failures.push(ProbeFailure {
                probe_id: probe.id.to_string(),
                error: err.to_string(),
            }),
        }
    }
    GroupOutcome::Negative { failures }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ProbeError;
    use crate::probe::{FailurePolicy, Platform, Probe, ProbeCatalog, ProbeCategory};

    fn fixed(id: &'static str, answer: bool) -> Probe {
        Probe::new(id, ProbeCategory::Vm, Platform::ANY, FailurePolicy::Surface, move || {
            Ok(answer)
        })
    }

    #[test]
    fn test_all_negative_is_clean() {
        let catalog = ProbeCatalog::new((0..6).map(|_| fixed("n", false)).collect());
        let verdict = IntegrityCoordinator::new(catalog, 3, 3).fast_verdict();

        assert!(!verdict.compromised);
        assert!(verdict.trigger.is_none());
        assert_eq!(verdict.groups_completed, 3);
        assert_eq!(verdict.groups_total, 3);
    }

    #[test]
    fn test_single_positive_is_found() {
        let catalog = ProbeCatalog::new(vec![
            fixed("a", false),
            fixed("b", false),
            fixed("c", false),
            fixed("d", false),
            fixed("e", true),
            fixed("f", false),
        ]);
        let verdict = IntegrityCoordinator::new(catalog, 3, 3).fast_verdict();

        assert!(verdict.compromised);
        assert_eq!(
            verdict.trigger,
            Some(ProbeHit {
                probe_id: "e".to_string(),
                group: 2
            })
        );
    }

    #[test]
    fn test_failures_are_reported_not_positive() {
        let failing = Probe::new(
            "broken",
            ProbeCategory::Vm,
            Platform::ANY,
            FailurePolicy::Surface,
            || Err(ProbeError::execution("tool", "exit status 2")),
        );
        let catalog = ProbeCatalog::new(vec![failing, fixed("ok", false)]);
        let verdict = IntegrityCoordinator::new(catalog, 2, 2).fast_verdict();

        assert!(!verdict.compromised);
        assert_eq!(verdict.failures.len(), 1);
        assert_eq!(verdict.failures[0].probe_id, "broken");
    }

    #[test]
    fn test_empty_catalog_is_clean() {
        let verdict = IntegrityCoordinator::new(ProbeCatalog::default(), 3, 3).fast_verdict();
        assert!(!verdict.compromised);
        assert_eq!(verdict.groups_total, 0);
    }
}
