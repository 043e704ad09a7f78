/// Exhaustive diagnostic report and the named classification views over it
use super::IntegrityCoordinator;
use crate::observability::metrics;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// A named disjunction over probe ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationView {
    pub name: &'static str,
    /// Human readable finding used in environment violation details
    pub finding: &'static str,
    pub probes: &'static [&'static str],
}

impl ClassificationView {
    pub fn evaluate(&self, detailed: &BTreeMap<String, bool>) -> bool {
        self.probes
            .iter()
            .any(|id| detailed.get(*id).copied().unwrap_or(false))
    }
}

pub const VIRTUALIZED: ClassificationView = ClassificationView {
    name: "is_virtualized",
    finding: "Virtual Machine Detected",
    probes: &[
        "vm_hardware",
        "vm_mac",
        "vm_artifacts",
        "virtualbox_drivers",
        "cpu_features",
    ],
};

pub const DEBUGGED: ClassificationView = ClassificationView {
    name: "is_debugged",
    finding: "Debugger Detected",
    probes: &["debugger_present", "timing_anomaly"],
};

pub const SANDBOXED: ClassificationView = ClassificationView {
    name: "is_sandboxed",
    finding: "Sandbox Detected",
    probes: &["sandbox_files", "suspicious_processes"],
};

// hypervisor support is common on bare metal, so it feeds no view
pub const VIEWS: [ClassificationView; 3] = [VIRTUALIZED, DEBUGGED, SANDBOXED];

/// Full per-probe results of one diagnostic run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub is_virtualized: bool,
    pub is_debugged: bool,
    pub is_sandboxed: bool,
    /// Every catalog probe; failed probes read `false` here
    pub detailed: BTreeMap<String, bool>,
    /// Probes that surfaced an unexpected tool failure
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, String>,
}

impl ScanReport {
    pub fn from_results(
        detailed: BTreeMap<String, bool>,
        failures: BTreeMap<String, String>,
    ) -> Self {
        Self {
            is_virtualized: VIRTUALIZED.evaluate(&detailed),
            is_debugged: DEBUGGED.evaluate(&detailed),
            is_sandboxed: SANDBOXED.evaluate(&detailed),
            detailed,
            failures,
        }
    }

    pub fn is_analyzed(&self) -> bool {
        self.is_virtualized || self.is_debugged || self.is_sandboxed
    }

    pub fn is_safe(&self) -> bool {
        !self.is_analyzed()
    }

    /// Any probe positive, including ones outside every view
    pub fn any_positive(&self) -> bool {
        self.detailed.values().any(|v| *v)
    }

    /// Findings of the views that fired, in view order
    pub fn fired_classifications(&self) -> Vec<&'static str> {
        VIEWS
            .iter()
            .filter(|view| view.evaluate(&self.detailed))
            .map(|view| view.finding)
            .collect()
    }
}

impl IntegrityCoordinator {
    /// Run every probe to completion and report each result.
    pub fn diagnostic_report(&self) -> ScanReport {
        let started = Instant::now();
        let platform = self.platform();

        let results = self.dispatch(self.group_tasks(), move |task| {
            task.probes
                .iter()
                .map(|probe| (probe.id, probe.evaluate_on(platform)))
                .collect::<Vec<_>>()
        });

        let mut detailed = BTreeMap::new();
        let mut failures = BTreeMap::new();
        for group in results.iter() {
            for (id, result) in group {
                match result {
                    Ok(positive) => {
                        detailed.insert(id.to_string(), positive);
                    }
                    Err(err) => {
                        detailed.insert(id.to_string(), false);
                        failures.insert(id.to_string(), err.to_string());
                    }
                }
            }
        }

        let report = ScanReport::from_results(detailed, failures);
        let metrics = metrics::get_metrics();
        metrics.diagnostic_reports.inc();
        metrics.diagnostic_latency.observe(started.elapsed());
        info!(
            "diagnostic report: virtualized={} debugged={} sandboxed={} failures={}",
            report.is_virtualized,
            report.is_debugged,
            report.is_sandboxed,
            report.failures.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detailed(positive: &[&str]) -> BTreeMap<String, bool> {
        [
            "vm_hardware",
            "vm_mac",
            "vm_artifacts",
            "virtualbox_drivers",
            "cpu_features",
            "hypervisor",
            "sandbox_files",
            "debugger_present",
            "timing_anomaly",
            "suspicious_processes",
        ]
        .iter()
        .map(|id| (id.to_string(), positive.contains(id)))
        .collect()
    }

    #[test]
    fn test_views_over_detailed_map() {
        let report = ScanReport::from_results(detailed(&["vm_mac", "timing_anomaly"]), BTreeMap::new());
        assert!(report.is_virtualized);
        assert!(report.is_debugged);
        assert!(!report.is_sandboxed);
        assert!(!report.is_safe());
        assert_eq!(
            report.fired_classifications(),
            vec!["Virtual Machine Detected", "Debugger Detected"]
        );
    }

    #[test]
    fn test_hypervisor_alone_is_safe_but_positive() {
        let report = ScanReport::from_results(detailed(&["hypervisor"]), BTreeMap::new());
        assert!(report.is_safe());
        assert!(report.any_positive());
        assert!(report.fired_classifications().is_empty());
    }

    #[test]
    fn test_clean_report() {
        let report = ScanReport::from_results(detailed(&[]), BTreeMap::new());
        assert!(report.is_safe());
        assert!(!report.any_positive());
        assert_eq!(report.detailed.len(), 10);
    }

    #[test]
    fn test_failures_omitted_from_json_when_empty() {
        let report = ScanReport::from_results(detailed(&[]), BTreeMap::new());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("failures").is_none());
        assert_eq!(json["detailed"]["vm_mac"], false);
    }
}
