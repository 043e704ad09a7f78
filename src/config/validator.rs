// Config validation
// Strict mode fails fast with every error collected; lenient mode reports them.

use crate::config::loader::GuardConfig;
use crate::config::types::{GuardError, Result};

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate config at startup
pub fn validate_config(config: &GuardConfig, strict: bool) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_probes(config, &mut result);
    validate_scoring(config, &mut result);
    validate_detection(config, &mut result);

    if strict && !result.is_valid() {
        return Err(GuardError::Config(format!(
            "Config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

fn validate_probes(config: &GuardConfig, result: &mut ValidationResult) {
    let probes = &config.probes;

    if probes.groups == 0 {
        result.add_error("probes.groups cannot be zero".to_string());
    }
    if probes.parallelism == Some(0) {
        result.add_error("probes.parallelism cannot be zero".to_string());
    }
    if probes.tool_timeout_ms == 0 {
        result.add_error("probes.tool_timeout_ms cannot be zero".to_string());
    }
    if probes.tool_timeout_ms > 30_000 {
        result.add_warning(format!(
            "probes.tool_timeout_ms {} is high; a hung tool delays the fast verdict by that much",
            probes.tool_timeout_ms
        ));
    }
    if probes.timing_iterations == 0 {
        result.add_error("probes.timing_iterations cannot be zero".to_string());
    }
    if let Some(parallelism) = probes.parallelism {
        if parallelism > probes.groups && probes.groups > 0 {
            result.add_warning(format!(
                "probes.parallelism {} exceeds probes.groups {}; extra workers stay idle",
                parallelism, probes.groups
            ));
        }
    }
}

fn validate_scoring(config: &GuardConfig, result: &mut ValidationResult) {
    let scoring = &config.scoring;

    if !scoring.audio_threshold.is_finite() || scoring.audio_threshold < 0.0 {
        result.add_error(format!(
            "scoring.audio_threshold must be a non-negative number, got {}",
            scoring.audio_threshold
        ));
    }
    if scoring.termination_threshold == 0 {
        result.add_warning(
            "scoring.termination_threshold is 0: the first weighted event terminates the session"
                .to_string(),
        );
    }
    if scoring.environment_weight == 0 {
        result.add_warning(
            "scoring.environment_weight is 0: failed environment checks will not score"
                .to_string(),
        );
    }
}

fn validate_detection(config: &GuardConfig, result: &mut ValidationResult) {
    let detection = &config.detection;

    for (name, value) in [
        ("detection.live_confidence", detection.live_confidence),
        ("detection.scan_confidence_floor", detection.scan_confidence_floor),
        ("detection.scan_accept_confidence", detection.scan_accept_confidence),
    ] {
        if !(0.0..=1.0).contains(&value) {
            result.add_error(format!("{} must be within [0, 1], got {}", name, value));
        }
    }

    if detection.scan_accept_confidence < detection.scan_confidence_floor {
        result.add_warning(format!(
            "detection.scan_accept_confidence {} is below scan_confidence_floor {}; the floor wins",
            detection.scan_accept_confidence, detection.scan_confidence_floor
        ));
    }
    if detection.timeout_ms == 0 {
        result.add_error("detection.timeout_ms cannot be zero".to_string());
    }
    if detection.command.is_empty() {
        result.add_warning(
            "detection.command is empty: image rules are skipped and only audio/window signals score"
                .to_string(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let result = validate_config(&GuardConfig::default(), true).unwrap();
        assert!(result.is_valid());
        // no detector command configured by default
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn test_zero_groups_rejected_in_strict_mode() {
        let mut config = GuardConfig::default();
        config.probes.groups = 0;

        assert!(validate_config(&config, true).is_err());

        let lenient = validate_config(&config, false).unwrap();
        assert!(!lenient.is_valid());
        assert!(lenient.errors[0].contains("probes.groups"));
    }

    #[test]
    fn test_confidence_out_of_range() {
        let mut config = GuardConfig::default();
        config.detection.live_confidence = 1.5;

        let result = validate_config(&config, false).unwrap();
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("detection.live_confidence")));
    }

    #[test]
    fn test_nan_audio_threshold_rejected() {
        let mut config = GuardConfig::default();
        config.scoring.audio_threshold = f64::NAN;

        assert!(validate_config(&config, true).is_err());
    }
}
