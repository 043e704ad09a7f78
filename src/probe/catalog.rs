/// Ordered probe catalog
///
/// Catalog order is significant: fast-verdict groups are contiguous slices of
/// it, so related checks share a group and the cheap filesystem checks are
/// spread across groups.
use super::checks;
use super::{FailurePolicy, Platform, Probe, ProbeCategory};
use crate::config::loader::ProbeSettings;

const DESKTOP: &[Platform] = &[Platform::Linux, Platform::MacOs, Platform::Windows];
const LINUX_MACOS: &[Platform] = &[Platform::Linux, Platform::MacOs];
const MACOS_WINDOWS: &[Platform] = &[Platform::MacOs, Platform::Windows];
const WINDOWS: &[Platform] = &[Platform::Windows];

/// Immutable, ordered set of probes built once at startup
#[derive(Debug, Clone, Default)]
pub struct ProbeCatalog {
    probes: Vec<Probe>,
}

impl ProbeCatalog {
    pub fn new(probes: Vec<Probe>) -> Self {
        Self { probes }
    }

    /// The ten host checks, in group order
    pub fn standard(settings: &ProbeSettings) -> Self {
        let timeout = settings.tool_timeout();
        let iterations = settings.timing_iterations;
        let threshold = settings.timing_threshold();

        Self::new(vec![
            Probe::new(
                "vm_hardware",
                ProbeCategory::Vm,
                DESKTOP,
                FailurePolicy::Surface,
                move || checks::vm_hardware(timeout),
            ),
            Probe::new(
                "vm_mac",
                ProbeCategory::Vm,
                Platform::ANY,
                FailurePolicy::Surface,
                move || checks::vm_mac(timeout),
            ),
            Probe::new(
                "vm_artifacts",
                ProbeCategory::Vm,
                MACOS_WINDOWS,
                FailurePolicy::Negative,
                checks::vm_artifacts,
            ),
            Probe::new(
                "virtualbox_drivers",
                ProbeCategory::Vm,
                WINDOWS,
                FailurePolicy::Negative,
                checks::virtualbox_drivers,
            ),
            Probe::new(
                "cpu_features",
                ProbeCategory::Vm,
                LINUX_MACOS,
                FailurePolicy::Surface,
                move || checks::cpu_features(timeout),
            ),
            Probe::new(
                "hypervisor",
                ProbeCategory::Vm,
                MACOS_WINDOWS,
                FailurePolicy::Surface,
                move || checks::hypervisor(timeout),
            ),
            Probe::new(
                "sandbox_files",
                ProbeCategory::Sandbox,
                MACOS_WINDOWS,
                FailurePolicy::Negative,
                checks::sandbox_files,
            ),
            Probe::new(
                "debugger_present",
                ProbeCategory::Debugger,
                Platform::ANY,
                FailurePolicy::Negative,
                move || checks::debugger_present(timeout),
            ),
            Probe::new(
                "timing_anomaly",
                ProbeCategory::Debugger,
                Platform::ANY,
                FailurePolicy::Negative,
                move || Ok(checks::timing_anomaly(iterations, threshold)),
            ),
            Probe::new(
                "suspicious_processes",
                ProbeCategory::Process,
                Platform::ANY,
                FailurePolicy::Surface,
                move || checks::suspicious_processes(timeout),
            ),
        ])
    }

    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Probe> {
        self.probes.iter().find(|p| p.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.probes.iter().map(|p| p.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_standard_catalog_order() {
        let catalog = ProbeCatalog::standard(&ProbeSettings::default());
        let ids: Vec<_> = catalog.ids().collect();
        assert_eq!(
            ids,
            vec![
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
        );
    }

    #[test]
    fn test_ids_are_unique() {
        let catalog = ProbeCatalog::standard(&ProbeSettings::default());
        let unique: HashSet<_> = catalog.ids().collect();
        assert_eq!(unique.len(), catalog.len());
    }

    #[test]
    fn test_filesystem_checks_never_surface_failures() {
        let catalog = ProbeCatalog::standard(&ProbeSettings::default());
        for id in ["vm_artifacts", "virtualbox_drivers", "sandbox_files"] {
            let probe = catalog.get(id).unwrap();
            assert_eq!(probe.failure_policy, FailurePolicy::Negative, "{}", id);
        }
    }

    #[test]
    fn test_windows_only_probe_is_off_platform_elsewhere() {
        let catalog = ProbeCatalog::standard(&ProbeSettings::default());
        let drivers = catalog.get("virtualbox_drivers").unwrap();
        assert!(drivers.applies_to(Platform::Windows));
        assert_eq!(drivers.evaluate_on(Platform::Linux), Ok(false));
    }
}
