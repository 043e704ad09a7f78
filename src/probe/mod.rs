//! Environment probes
//!
//! A probe is a side-effect-free boolean query about the host: is it a
//! virtual machine, is a debugger attached, is it a sandbox, is analysis
//! tooling running. Probes are platform scoped and carry an explicit policy
//! for unexpected failures of the tools they consult.

pub mod catalog;
pub mod checks;
pub mod tool;

pub use catalog::ProbeCatalog;

use crate::config::types::ProbeError;
use crate::observability::{audit, metrics};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// What a positive probe says about the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeCategory {
    Vm,
    Debugger,
    Sandbox,
    Process,
}

/// Operating system family a probe applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl Platform {
    pub const ANY: &'static [Platform] = &[
        Platform::Linux,
        Platform::MacOs,
        Platform::Windows,
        Platform::Other,
    ];

    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Other
        }
    }
}

/// How a probe treats an unexpected failure of its underlying query.
/// Timeouts and missing tools are negative under both policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Report the failure to the caller
    Surface,
    /// Read the failure as "not detected"
    Negative,
}

pub type ProbeFn = Arc<dyn Fn() -> Result<bool, ProbeError> + Send + Sync>;

/// One environment check
#[derive(Clone)]
pub struct Probe {
    pub id: &'static str,
    pub category: ProbeCategory,
    pub platforms: &'static [Platform],
    pub failure_policy: FailurePolicy,
    run: ProbeFn,
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("platforms", &self.platforms)
            .field("failure_policy", &self.failure_policy)
            .finish()
    }
}

impl Probe {
    pub fn new<F>(
        id: &'static str,
        category: ProbeCategory,
        platforms: &'static [Platform],
        failure_policy: FailurePolicy,
        run: F,
    ) -> Self
    where
        F: Fn() -> Result<bool, ProbeError> + Send + Sync + 'static,
    {
        Self {
            id,
            category,
            platforms,
            failure_policy,
            run: Arc::new(run),
        }
    }

    pub fn applies_to(&self, platform: Platform) -> bool {
        self.platforms.contains(&platform)
    }

    /// Evaluate on the running host
    pub fn evaluate(&self) -> Result<bool, ProbeError> {
        self.evaluate_on(Platform::current())
    }

    /// Evaluate as if running on `platform`.
    ///
    /// Off-platform probes answer `false` without running. A panicking check
    /// is treated as an execution failure.
    pub fn evaluate_on(&self, platform: Platform) -> Result<bool, ProbeError> {
        if !self.applies_to(platform) {
            return Ok(false);
        }

        let metrics = metrics::get_metrics();
        metrics.probes_run.inc();

        let raw = catch_unwind(AssertUnwindSafe(|| (self.run)())).unwrap_or_else(|_| {
            Err(ProbeError::execution(self.id, "probe panicked"))
        });

        match raw {
            Ok(positive) => {
                if positive {
                    metrics.probes_positive.inc();
                    debug!("probe {} positive", self.id);
                }
                Ok(positive)
            }
            Err(err) if err.is_negative() => {
                if matches!(err, ProbeError::Timeout { .. }) {
                    metrics.probes_timed_out.inc();
                }
                debug!("probe {} negative: {}", self.id, err);
                Ok(false)
            }
            Err(err) => match self.failure_policy {
                FailurePolicy::Surface => {
                    metrics.probes_failed.inc();
                    warn!("probe {} failed: {}", self.id, err);
                    audit::events::probe_failure(self.id, &err.to_string());
                    Err(err)
                }
                FailurePolicy::Negative => {
                    debug!("probe {} failure read as negative: {}", self.id, err);
                    Ok(false)
                }
            },
        }
    }
}
