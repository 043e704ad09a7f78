//! Exam integrity service
//!
//! The operations a proctoring front end calls: the pre-exam gate and
//! environment check, the pre-session room scan, live observations, window
//! events, and the invigilator's per-session statistics. Everything is wired
//! from one [`GuardConfig`]; the probe catalog, object detector and event
//! store are injected so callers and tests can substitute their own.

use crate::classifier::detector;
use crate::classifier::{
    EnvironmentScanner, ObjectDetector, Observation, ScanVerdict, ViolationClassifier,
};
use crate::config::loader::GuardConfig;
use crate::config::types::{GuardError, Result};
use crate::coordinator::{FastVerdict, IntegrityCoordinator};
use crate::ledger::{
    Category, EventStore, EvidenceRef, JsonlEventStore, MemoryEventStore, SessionKey,
    SessionState, Violation, ViolationScorer,
};
use crate::observability::audit::{self, CorrelationIds};
use crate::observability::metrics;
use crate::probe::ProbeCatalog;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Session used for environment violations raised outside an exam
pub const SYSTEM_CHECK_SESSION: &str = "SYSTEM_CHECK";

/// Message returned once a session has been terminated
pub const TERMINATION_MESSAGE: &str = "Cheating score exceeded limit. Exam terminated.";

/// Per-view results of the diagnostic report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentChecks {
    pub is_virtualized: bool,
    pub is_debugged: bool,
    pub is_sandboxed: bool,
    /// Any probe positive, including hypervisor support
    pub venv_active: bool,
    pub detailed: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentCheck {
    pub is_safe: bool,
    pub checks: EnvironmentChecks,
}

/// Answer to one live observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ObservationResponse {
    Processed { alert: Option<String>, score: u64 },
    Terminate { message: String, score: u64 },
}

impl ObservationResponse {
    fn from_state(state: SessionState, alert: Option<String>, score: u64) -> Self {
        match state {
            SessionState::Active => ObservationResponse::Processed { alert, score },
            SessionState::Terminated => ObservationResponse::Terminate {
                message: TERMINATION_MESSAGE.to_string(),
                score,
            },
        }
    }

    pub fn score(&self) -> u64 {
        match self {
            ObservationResponse::Processed { score, .. }
            | ObservationResponse::Terminate { score, .. } => *score,
        }
    }

    pub fn is_terminate(&self) -> bool {
        matches!(self, ObservationResponse::Terminate { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WindowEventResponse {
    Logged,
}

/// Invigilator view of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub subject_id: String,
    pub session_id: String,
    /// Window focus losses
    pub win: usize,
    /// Phone sightings
    pub mob: usize,
    /// Missing or extra persons
    pub per: usize,
    /// Loud audio
    pub aud: usize,
    /// Every recorded event, advisory ones included
    pub tot: usize,
    pub score: u64,
    pub state: SessionState,
}

pub struct IntegrityService {
    config: GuardConfig,
    coordinator: IntegrityCoordinator,
    classifier: ViolationClassifier,
    scanner: EnvironmentScanner,
    scorer: ViolationScorer,
}

impl IntegrityService {
    pub fn new(
        config: GuardConfig,
        catalog: ProbeCatalog,
        detector: Arc<dyn ObjectDetector>,
        store: Arc<dyn EventStore>,
    ) -> Self {
        let coordinator = IntegrityCoordinator::from_settings(catalog, &config.probes);
        let classifier = ViolationClassifier::from_config(Arc::clone(&detector), &config);
        let scanner = EnvironmentScanner::new(
            detector,
            config.detection.scan_confidence_floor,
            config.detection.scan_accept_confidence,
        );
        let scorer = ViolationScorer::new(
            store,
            config.scoring.termination_threshold,
            config.scoring.cooldown(),
        );

        Self {
            config,
            coordinator,
            classifier,
            scanner,
            scorer,
        }
    }

    /// Build the service the configuration describes: the standard probe
    /// catalog, the configured detector, and a file store when `event_log`
    /// is set.
    pub fn from_config(config: &GuardConfig) -> Result<Self> {
        let store: Arc<dyn EventStore> = match &config.storage.event_log {
            Some(path) => Arc::new(JsonlEventStore::open(path)?),
            None => Arc::new(MemoryEventStore::new()),
        };
        Ok(Self::new(
            config.clone(),
            ProbeCatalog::standard(&config.probes),
            detector::from_settings(&config.detection),
            store,
        ))
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &IntegrityCoordinator {
        &self.coordinator
    }

    pub fn scorer(&self) -> &ViolationScorer {
        &self.scorer
    }

    /// Pre-exam gate: race the probes to the first positive
    pub fn gate(&self) -> FastVerdict {
        let verdict = self.coordinator.fast_verdict();
        let trigger: Vec<&str> = verdict
            .trigger
            .iter()
            .map(|hit| hit.probe_id.as_str())
            .collect();
        audit::events::environment_verdict(CorrelationIds::new(), verdict.compromised, &trigger);
        verdict
    }

    /// Full environment check. An unsafe result is recorded against the
    /// subject when one is given.
    pub fn check_environment(
        &self,
        subject_id: Option<&str>,
        session_id: Option<&str>,
    ) -> EnvironmentCheck {
        let report = self.coordinator.diagnostic_report();
        let fired = report.fired_classifications();
        let is_safe = report.is_safe();

        let subject = subject_id.filter(|s| !s.trim().is_empty());
        let key = subject.map(|subject| {
            let session = session_id
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(SYSTEM_CHECK_SESSION);
            SessionKey::new(subject, session)
        });

        let correlation = match &key {
            Some(key) => CorrelationIds::for_session(key),
            None => CorrelationIds::new(),
        };
        audit::events::environment_verdict(correlation, !is_safe, &fired);

        if !is_safe {
            match &key {
                Some(key) => {
                    let violation =
                        Violation::environment(&fired, self.config.scoring.environment_weight);
                    if let Err(err) = self.scorer.record(key, &[violation], None) {
                        self.report_store_failure(key, &err);
                    }
                }
                None => warn!("unsafe environment without a subject; nothing recorded"),
            }
        }

        EnvironmentCheck {
            is_safe,
            checks: EnvironmentChecks {
                is_virtualized: report.is_virtualized,
                is_debugged: report.is_debugged,
                is_sandboxed: report.is_sandboxed,
                venv_active: report.any_positive(),
                detailed: report.detailed,
                failures: report.failures,
            },
        }
    }

    /// One-shot room scan before the exam starts. A dirty room leaves one
    /// advisory record that never affects the score.
    pub fn pre_session_scan(
        &self,
        subject_id: &str,
        test_id: &str,
        image: &[u8],
    ) -> Result<ScanVerdict> {
        let key = session_key(subject_id, test_id)?;
        if image.is_empty() {
            return Err(reject("empty image"));
        }

        let verdict = self.scanner.scan(image);
        if !verdict.clean {
            info!("room scan for {} found {:?}", key, verdict.detected);
            audit::events::scan_violation(&key, &verdict.detected);
            let advisory = Violation::scan_advisory(&verdict.detected);
            if let Err(err) =
                self.scorer
                    .record(&key, &[advisory], Some(&EvidenceRef::from_bytes(image)))
            {
                self.report_store_failure(&key, &err);
            }
        }
        Ok(verdict)
    }

    /// Classify one observation and score it.
    ///
    /// Classification, appends and the threshold check run under the
    /// session's lock. A store failure during the append is logged and the
    /// last known score is returned.
    pub fn observe(&self, observation: &Observation) -> Result<ObservationResponse> {
        let metrics = metrics::get_metrics();
        if let Err(err) = observation.validate() {
            metrics.observations_rejected.inc();
            audit::events::malformed_observation(&err.to_string());
            return Err(err);
        }

        let key = observation.key();
        let evidence = observation.image.as_deref().map(EvidenceRef::from_bytes);

        let response = self.scorer.with_session(&key, |ledger| {
            let classification = self.classifier.classify(observation)?;
            let alert = summarize(&classification.violations);

            let (score, state) =
                match ledger.commit(&classification.violations, evidence.as_ref()) {
                    Ok(outcome) => (outcome.score, outcome.state),
                    Err(err) => {
                        self.report_store_failure(&key, &err);
                        (ledger.score(), ledger.state())
                    }
                };
            Ok(ObservationResponse::from_state(state, alert, score))
        })?;

        metrics.observations_processed.inc();
        if response.is_terminate() {
            warn!("session {} terminated at score {}", key, response.score());
        }
        Ok(response)
    }

    /// Record a window focus loss reported outside a regular observation
    pub fn window_event(&self, subject_id: &str, test_id: &str) -> Result<WindowEventResponse> {
        let key = session_key(subject_id, test_id)?;
        if let Err(err) = self.scorer.record(&key, &[Violation::window()], None) {
            self.report_store_failure(&key, &err);
        }
        Ok(WindowEventResponse::Logged)
    }

    pub fn session_stats(&self, subject_id: &str, test_id: &str) -> Result<SessionStats> {
        let key = session_key(subject_id, test_id)?;
        let events = self.scorer.store().events(&key)?;
        let (score, state) = self.scorer.snapshot(&key)?;

        let count = |categories: &[Category]| {
            events
                .iter()
                .filter(|e| categories.contains(&e.category))
                .count()
        };

        Ok(SessionStats {
            win: count(&[Category::Window]),
            mob: count(&[Category::Phone]),
            per: count(&[Category::NoFace, Category::MultiplePersons]),
            aud: count(&[Category::Audio]),
            tot: events.len(),
            score,
            state,
            subject_id: key.subject_id,
            session_id: key.session_id,
        })
    }

    /// Release the session's in-memory ledger, returning its final score
    pub fn end_session(&self, subject_id: &str, test_id: &str) -> Result<Option<u64>> {
        let key = session_key(subject_id, test_id)?;
        self.scorer.close_session(&key)
    }

    fn report_store_failure(&self, key: &SessionKey, err: &GuardError) {
        error!("event store failure for {}: {}", key, err);
        metrics::get_metrics().store_failures.inc();
        audit::events::store_failure(key, &err.to_string());
    }
}

fn reject(reason: &str) -> GuardError {
    metrics::get_metrics().observations_rejected.inc();
    audit::events::malformed_observation(reason);
    GuardError::MalformedObservation(reason.to_string())
}

fn session_key(subject_id: &str, session_id: &str) -> Result<SessionKey> {
    if subject_id.trim().is_empty() {
        return Err(reject("missing subject_id"));
    }
    if session_id.trim().is_empty() {
        return Err(reject("missing session_id"));
    }
    Ok(SessionKey::new(subject_id, session_id))
}

/// Alerts of one observation joined for display
fn summarize(violations: &[Violation]) -> Option<String> {
    if violations.is_empty() {
        return None;
    }
    Some(
        violations
            .iter()
            .map(|v| v.alert.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::detector::{Detection, UnavailableDetector};
    use crate::config::types::DetectorError;
    use crate::probe::{FailurePolicy, Platform, Probe, ProbeCategory};

    struct Fixed(Vec<Detection>);

    impl ObjectDetector for Fixed {
        fn detect(
            &self,
            _image: &[u8],
            _min: f32,
        ) -> std::result::Result<Vec<Detection>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    fn service(detections: Vec<Detection>) -> IntegrityService {
        IntegrityService::new(
            GuardConfig::default(),
            ProbeCatalog::default(),
            Arc::new(Fixed(detections)),
            Arc::new(MemoryEventStore::new()),
        )
    }

    #[test]
    fn test_summarize_joins_alerts() {
        assert_eq!(summarize(&[]), None);
        assert_eq!(
            summarize(&[Violation::phone(), Violation::book()]).as_deref(),
            Some("Mobile Phone Detected, Book Detected")
        );
    }

    #[test]
    fn test_response_json_shape() {
        let processed = ObservationResponse::Processed {
            alert: None,
            score: 0,
        };
        let json = serde_json::to_value(&processed).unwrap();
        assert_eq!(json["status"], "processed");
        assert!(json["alert"].is_null());

        let terminate = ObservationResponse::from_state(SessionState::Terminated, None, 11);
        let json = serde_json::to_value(&terminate).unwrap();
        assert_eq!(json["status"], "terminate");
        assert_eq!(json["message"], TERMINATION_MESSAGE);
        assert_eq!(json["score"], 11);

        let logged = serde_json::to_value(WindowEventResponse::Logged).unwrap();
        assert_eq!(logged, serde_json::json!({"status": "logged"}));
    }

    #[test]
    fn test_malformed_observation_records_nothing() {
        let service = service(vec![]);
        let key = SessionKey::new("alice", "T-1");
        let result = service.observe(&Observation::new(&key));
        assert!(matches!(result, Err(GuardError::MalformedObservation(_))));
        assert!(service.scorer().store().events(&key).unwrap().is_empty());
    }

    #[test]
    fn test_scan_advisory_does_not_score() {
        let service = service(vec![
            Detection::new("person", 0.9),
            Detection::new("book", 0.8),
        ]);
        let verdict = service.pre_session_scan("alice", "T-1", b"frame").unwrap();
        assert!(!verdict.clean);
        assert_eq!(verdict.detected, vec!["book", "person"]);

        let stats = service.session_stats("alice", "T-1").unwrap();
        assert_eq!(stats.tot, 1);
        assert_eq!(stats.score, 0);
    }

    #[test]
    fn test_clean_scan_records_nothing() {
        let service = service(vec![Detection::new("person", 0.9)]);
        let verdict = service.pre_session_scan("alice", "T-1", b"frame").unwrap();
        assert!(verdict.clean);
        assert_eq!(service.session_stats("alice", "T-1").unwrap().tot, 0);
    }

    #[test]
    fn test_degraded_scan_is_clean() {
        let service = IntegrityService::new(
            GuardConfig::default(),
            ProbeCatalog::default(),
            Arc::new(UnavailableDetector::new("offline")),
            Arc::new(MemoryEventStore::new()),
        );
        let verdict = service.pre_session_scan("alice", "T-1", b"frame").unwrap();
        assert!(verdict.clean);
        assert!(verdict.degraded.is_some());
    }

    #[test]
    fn test_unsafe_environment_defaults_to_system_check() {
        let catalog = ProbeCatalog::new(vec![Probe::new(
            "debugger_present",
            ProbeCategory::Debugger,
            Platform::ANY,
            FailurePolicy::Negative,
            || Ok(true),
        )]);
        let service = IntegrityService::new(
            GuardConfig::default(),
            catalog,
            Arc::new(Fixed(vec![])),
            Arc::new(MemoryEventStore::new()),
        );

        let check = service.check_environment(Some("alice"), None);
        assert!(!check.is_safe);
        assert!(check.checks.is_debugged);

        let stats = service
            .session_stats("alice", SYSTEM_CHECK_SESSION)
            .unwrap();
        assert_eq!(stats.score, 5);
        let events = service
            .scorer()
            .store()
            .events(&SessionKey::new("alice", SYSTEM_CHECK_SESSION))
            .unwrap();
        assert_eq!(events[0].detail, "Environment Violation: Debugger Detected");
    }

    #[test]
    fn test_blank_identifiers_are_rejected() {
        let service = service(vec![]);
        assert!(service.window_event("", "T-1").is_err());
        assert!(service.session_stats("alice", " ").is_err());
        assert!(service.pre_session_scan("alice", "T-1", b"").is_err());
    }
}
