/// Configuration loading from examguard.json with EXAMGUARD_* environment overrides
use crate::config::types::{GuardError, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file looked up in the current directory
pub const DEFAULT_CONFIG_FILE: &str = "examguard.json";

/// Full examguard.json structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub probes: ProbeSettings,
    pub scoring: ScoringSettings,
    pub detection: DetectionSettings,
    pub storage: StorageSettings,
    pub audit: AuditSettings,
}

/// Probe set and coordinator tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Bound on any external tool a probe shells out to
    pub tool_timeout_ms: u64,
    /// Number of fast-verdict groups the catalog is partitioned into
    pub groups: usize,
    /// Worker threads for group execution (defaults to `groups`)
    pub parallelism: Option<usize>,
    /// Empty-loop duration above which the timing probe fires
    pub timing_threshold_ms: u64,
    /// Iterations of the timing probe's empty loop
    pub timing_iterations: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            tool_timeout_ms: 3_000,
            groups: 3,
            parallelism: None,
            timing_threshold_ms: 500,
            timing_iterations: 1_000_000,
        }
    }
}

impl ProbeSettings {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    pub fn timing_threshold(&self) -> Duration {
        Duration::from_millis(self.timing_threshold_ms)
    }

    pub fn effective_parallelism(&self) -> usize {
        self.parallelism.unwrap_or(self.groups).max(1)
    }
}

/// Violation scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    /// Session terminates once its score is strictly greater than this
    pub termination_threshold: u64,
    /// Audio level above which an observation raises an audio event
    pub audio_threshold: f64,
    /// Per-category cooldown; 0 scores every observation independently
    pub cooldown_secs: u64,
    /// Weight of the event appended when the environment check fails
    pub environment_weight: u32,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            termination_threshold: 10,
            audio_threshold: 50.0,
            cooldown_secs: 0,
            environment_weight: 5,
        }
    }
}

impl ScoringSettings {
    pub fn cooldown(&self) -> Option<Duration> {
        if self.cooldown_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.cooldown_secs))
        }
    }
}

/// Object-detection capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Confidence floor for live observation frames
    pub live_confidence: f32,
    /// Confidence floor requested from the detector during the room scan
    pub scan_confidence_floor: f32,
    /// Scan detections must exceed this to count
    pub scan_accept_confidence: f32,
    /// Deadline for a single detector call
    pub timeout_ms: u64,
    /// External detector program and arguments; empty disables image rules
    pub command: Vec<String>,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            live_confidence: 0.4,
            scan_confidence_floor: 0.25,
            scan_accept_confidence: 0.4,
            timeout_ms: 5_000,
            command: Vec::new(),
        }
    }
}

impl DetectionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// JSON-lines event log; in-memory store when unset
    pub event_log: Option<PathBuf>,
}

impl StorageSettings {
    /// Event log the command line uses when none is configured, so session
    /// state carries over between invocations
    pub fn default_event_log() -> PathBuf {
        std::env::temp_dir().join("examguard").join("events.jsonl")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Audit trail location; temp-dir default with fallbacks when unset
    pub path: Option<PathBuf>,
}

impl GuardConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GuardError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            GuardError::Config(format!(
                "Failed to parse config JSON {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Load ./examguard.json when present, built-in defaults otherwise.
    /// Environment overrides are applied in both cases.
    pub fn load_default() -> Result<Self> {
        let path = std::env::current_dir()
            .map_err(|e| GuardError::Config(format!("Failed to get current directory: {}", e)))?
            .join(DEFAULT_CONFIG_FILE);

        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            Self::load_from_file(&path)?
        } else {
            info!("No {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from an explicit path or fall back to [`GuardConfig::load_default`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let mut config = Self::load_from_file(path)?;
                config.apply_env_overrides();
                Ok(config)
            }
            None => Self::load_default(),
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.probes.tool_timeout_ms =
            read_env_u64("EXAMGUARD_PROBE_TIMEOUT_MS", self.probes.tool_timeout_ms);
        self.probes.groups = read_env_usize("EXAMGUARD_PROBE_GROUPS", self.probes.groups);
        if let Some(parallelism) = read_env_opt::<usize>("EXAMGUARD_PROBE_PARALLELISM") {
            self.probes.parallelism = Some(parallelism);
        }
        self.scoring.termination_threshold = read_env_u64(
            "EXAMGUARD_TERMINATION_THRESHOLD",
            self.scoring.termination_threshold,
        );
        if let Some(level) = read_env_opt::<f64>("EXAMGUARD_AUDIO_THRESHOLD") {
            self.scoring.audio_threshold = level;
        }
        if let Some(cooldown) = read_env_opt::<u64>("EXAMGUARD_COOLDOWN_SECS") {
            self.scoring.cooldown_secs = cooldown;
        }
        self.detection.timeout_ms =
            read_env_u64("EXAMGUARD_DETECTOR_TIMEOUT_MS", self.detection.timeout_ms);
        if let Some(path) = std::env::var_os("EXAMGUARD_EVENT_LOG") {
            self.storage.event_log = Some(PathBuf::from(path));
        }
        if let Some(path) = std::env::var_os("EXAMGUARD_AUDIT_LOG") {
            self.audit.path = Some(PathBuf::from(path));
        }
    }
}

fn read_env_opt<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value", name, raw);
            None
        }
    }
}

fn read_env_u64(name: &str, default: u64) -> u64 {
    read_env_opt::<u64>(name)
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn read_env_usize(name: &str, default: usize) -> usize {
    read_env_opt::<usize>(name)
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = GuardConfig::default();
        assert_eq!(config.scoring.termination_threshold, 10);
        assert_eq!(config.scoring.audio_threshold, 50.0);
        assert_eq!(config.scoring.environment_weight, 5);
        assert!(config.scoring.cooldown().is_none());
        assert_eq!(config.probes.groups, 3);
        assert_eq!(config.probes.effective_parallelism(), 3);
        assert_eq!(config.probes.tool_timeout(), Duration::from_secs(3));
        assert_eq!(config.detection.live_confidence, 0.4);
        assert_eq!(config.detection.scan_confidence_floor, 0.25);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("examguard.json");
        std::fs::write(
            &path,
            r#"{ "scoring": { "termination_threshold": 20 }, "probes": { "groups": 2 } }"#,
        )
        .unwrap();

        let config = GuardConfig::load_from_file(&path).unwrap();
        assert_eq!(config.scoring.termination_threshold, 20);
        assert_eq!(config.scoring.audio_threshold, 50.0);
        assert_eq!(config.probes.groups, 2);
        assert_eq!(config.probes.tool_timeout_ms, 3_000);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = GuardConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, GuardError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = GuardConfig::load_from_file("/nonexistent/examguard.json").unwrap_err();
        assert!(matches!(err, GuardError::Config(_)));
    }
}
