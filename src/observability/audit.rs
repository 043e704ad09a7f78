/// Integrity audit trail for examguard
/// Structured JSON-lines record of environment verdicts, violations and terminations
/// for invigilator review and incident response.
///
/// Each line carries:
/// - Correlation IDs (request_id, subject, session)
/// - Event type with its default severity
/// - Optional probe, category and score context
use crate::config::types::{GuardError, Result};
use crate::ledger::SessionKey;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use uuid::Uuid;

/// Audit event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditSeverity {
    Critical,
    High,
    Medium,
    Low,
}

/// Types of integrity events we track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    // Environment events
    EnvironmentClean,
    EnvironmentCompromised,
    ProbeFailure,

    // Session events
    ScanViolation,
    ViolationRecorded,
    SessionTerminated,
    SessionClosed,

    // Degradation events
    DetectorDegraded,
    StoreFailure,
    MalformedObservation,
    ConfigurationViolation,
}

impl AuditEventType {
    /// Get the default severity for this event type
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            AuditEventType::EnvironmentClean => AuditSeverity::Low,
            AuditEventType::EnvironmentCompromised => AuditSeverity::High,
            AuditEventType::ProbeFailure => AuditSeverity::Medium,

            AuditEventType::ScanViolation => AuditSeverity::Medium,
            AuditEventType::ViolationRecorded => AuditSeverity::Medium,
            AuditEventType::SessionTerminated => AuditSeverity::Critical,
            AuditEventType::SessionClosed => AuditSeverity::Low,

            AuditEventType::DetectorDegraded => AuditSeverity::High,
            AuditEventType::StoreFailure => AuditSeverity::Critical,
            AuditEventType::MalformedObservation => AuditSeverity::Low,
            AuditEventType::ConfigurationViolation => AuditSeverity::Low,
        }
    }
}

/// Correlation identifiers for event tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationIds {
    /// Unique identifier of the request that produced the event
    pub request_id: String,
    pub subject_id: Option<String>,
    pub session_id: Option<String>,
}

impl CorrelationIds {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            subject_id: None,
            session_id: None,
        }
    }

    /// Correlation for a specific exam session
    pub fn for_session(key: &SessionKey) -> Self {
        Self::new()
            .with_subject(key.subject_id.clone())
            .with_session(key.session_id.clone())
    }

    pub fn with_subject(mut self, subject_id: String) -> Self {
        self.subject_id = Some(subject_id);
        self
    }

    pub fn with_session(mut self, session_id: String) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Individual audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    pub correlation: Option<CorrelationIds>,
    pub probe_id: Option<String>,
    pub category: Option<String>,
    pub score: Option<u64>,
}

impl AuditEvent {
    /// Create a new audit event with default severity
    pub fn new(event_type: AuditEventType, details: String) -> Self {
        let severity = event_type.default_severity();
        Self {
            event_type,
            severity,
            timestamp: Utc::now(),
            details,
            correlation: None,
            probe_id: None,
            category: None,
            score: None,
        }
    }

    pub fn with_correlation(mut self, correlation: CorrelationIds) -> Self {
        self.correlation = Some(correlation);
        self
    }

    pub fn with_probe(mut self, probe_id: &str) -> Self {
        self.probe_id = Some(probe_id.to_string());
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_score(mut self, score: u64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    fn emit_to_log(&self) {
        match self.severity {
            AuditSeverity::Critical | AuditSeverity::High => {
                error!("AUDIT {:?}: {:?} - {}", self.severity, self.event_type, self.details);
            }
            AuditSeverity::Medium => {
                warn!("AUDIT {:?}: {:?} - {}", self.severity, self.event_type, self.details);
            }
            AuditSeverity::Low => {
                info!("AUDIT {:?}: {:?} - {}", self.severity, self.event_type, self.details);
            }
        }
    }
}

/// Audit logger that mirrors events to the log facade and a JSONL file
pub struct AuditLogger {
    audit_file: Arc<Mutex<File>>,
    audit_path: PathBuf,
}

impl AuditLogger {
    pub fn new(audit_path: Option<PathBuf>) -> Result<Self> {
        let audit_path = audit_path.unwrap_or_else(default_audit_path);

        if let Some(parent) = audit_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                GuardError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }

        let audit_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&audit_path)
            .map_err(|e| GuardError::Config(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            audit_file: Arc::new(Mutex::new(audit_file)),
            audit_path,
        })
    }

    pub fn log_event(&self, event: AuditEvent) {
        event.emit_to_log();

        let mut line = match serde_json::to_value(&event) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };
        line["process_id"] = serde_json::json!(std::process::id());

        if let Ok(mut file) = self.audit_file.lock() {
            if let Err(e) = writeln!(file, "{}", line) {
                error!("Failed to write to audit log: {}", e);
            }
            if let Err(e) = file.flush() {
                error!("Failed to flush audit log: {}", e);
            }
        } else {
            error!("Failed to acquire lock on audit file");
        }
    }

    pub fn audit_path(&self) -> &PathBuf {
        &self.audit_path
    }
}

fn default_audit_path() -> PathBuf {
    std::env::temp_dir().join("examguard").join("audit.log")
}

fn fallback_audit_paths() -> Vec<PathBuf> {
    #[cfg(unix)]
    let uid_scoped = std::env::temp_dir().join(format!("examguard-audit-{}.log", unsafe {
        libc::geteuid()
    }));
    #[cfg(not(unix))]
    let uid_scoped = std::env::temp_dir().join("examguard-audit-user.log");

    vec![
        uid_scoped,
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
            .join(".examguard")
            .join("audit.log"),
    ]
}

static AUDIT_LOGGER: OnceLock<AuditLogger> = OnceLock::new();

/// Initialize the global audit logger.
///
/// An explicit path that cannot be opened is an error. Without one, the
/// default location is tried first, then user-scoped fallbacks, and finally
/// the logger degrades to log-facade output only.
pub fn init_audit_logger(audit_path: Option<PathBuf>) -> Result<()> {
    match AuditLogger::new(audit_path.clone()) {
        Ok(logger) => install(logger, None),
        Err(e) => {
            if audit_path.is_some() {
                error!("Failed to initialize audit logger: {}", e);
                return Err(e);
            }

            for fallback in fallback_audit_paths() {
                match AuditLogger::new(Some(fallback.clone())) {
                    Ok(logger) => {
                        install(logger, Some(&fallback));
                        return Ok(());
                    }
                    Err(fallback_err) => {
                        warn!(
                            "Failed to initialize fallback audit logger at {}: {}",
                            fallback.display(),
                            fallback_err
                        );
                    }
                }
            }

            warn!(
                "Audit logger unavailable (all paths failed). Continuing with log-only audit events: {}",
                e
            );
        }
    }
    Ok(())
}

fn install(logger: AuditLogger, fallback: Option<&PathBuf>) {
    let path = logger.audit_path().clone();
    if AUDIT_LOGGER.set(logger).is_err() {
        warn!("Audit logger already initialized");
        return;
    }
    match fallback {
        Some(_) => warn!("Audit logger initialized using fallback path: {}", path.display()),
        None => info!("Audit logger initialized at {}", path.display()),
    }
}

/// Path of the active audit trail, if the file-backed logger is running
pub fn audit_path() -> Option<PathBuf> {
    AUDIT_LOGGER.get().map(|logger| logger.audit_path().clone())
}

/// Log an audit event using the global logger
pub fn log_audit_event(event: AuditEvent) {
    match AUDIT_LOGGER.get() {
        Some(logger) => logger.log_event(event),
        None => event.emit_to_log(),
    }
}

/// Convenience functions for common audit events
pub mod events {
    use super::*;

    pub fn environment_verdict(correlation: CorrelationIds, compromised: bool, fired: &[&str]) {
        let event = if compromised {
            AuditEvent::new(
                AuditEventType::EnvironmentCompromised,
                format!("Environment check failed: {}", fired.join(", ")),
            )
        } else {
            AuditEvent::new(
                AuditEventType::EnvironmentClean,
                "Environment check passed".to_string(),
            )
        };
        log_audit_event(event.with_correlation(correlation));
    }

    pub fn probe_failure(probe_id: &str, error: &str) {
        let event = AuditEvent::new(
            AuditEventType::ProbeFailure,
            format!("Probe {} failed: {}", probe_id, error),
        )
        .with_probe(probe_id);
        log_audit_event(event);
    }

    pub fn scan_violation(key: &SessionKey, detected: &[String]) {
        let event = AuditEvent::new(
            AuditEventType::ScanViolation,
            format!("Pre-session scan found: {}", detected.join(", ")),
        )
        .with_correlation(CorrelationIds::for_session(key));
        log_audit_event(event);
    }

    pub fn violation_recorded(key: &SessionKey, category: &str, weight: u32, score: u64) {
        let event = AuditEvent::new(
            AuditEventType::ViolationRecorded,
            format!("{} (+{})", category, weight),
        )
        .with_correlation(CorrelationIds::for_session(key))
        .with_category(category)
        .with_score(score);
        log_audit_event(event);
    }

    pub fn session_terminated(key: &SessionKey, score: u64, threshold: u64) {
        let event = AuditEvent::new(
            AuditEventType::SessionTerminated,
            format!("Session terminated: score {} > threshold {}", score, threshold),
        )
        .with_correlation(CorrelationIds::for_session(key))
        .with_score(score);
        log_audit_event(event);
    }

    pub fn session_closed(key: &SessionKey, score: u64) {
        let event = AuditEvent::new(
            AuditEventType::SessionClosed,
            format!("Session closed with score {}", score),
        )
        .with_correlation(CorrelationIds::for_session(key))
        .with_score(score);
        log_audit_event(event);
    }

    pub fn detector_degraded(key: Option<&SessionKey>, reason: &str) {
        let mut event = AuditEvent::new(
            AuditEventType::DetectorDegraded,
            format!("Object detector unavailable, image rules skipped: {}", reason),
        );
        if let Some(key) = key {
            event = event.with_correlation(CorrelationIds::for_session(key));
        }
        log_audit_event(event);
    }

    pub fn store_failure(key: &SessionKey, error: &str) {
        let event = AuditEvent::new(
            AuditEventType::StoreFailure,
            format!("Event store failure: {}", error),
        )
        .with_correlation(CorrelationIds::for_session(key));
        log_audit_event(event);
    }

    pub fn malformed_observation(reason: &str) {
        log_audit_event(AuditEvent::new(
            AuditEventType::MalformedObservation,
            format!("Rejected observation: {}", reason),
        ));
    }

    pub fn configuration_warning(warning: &str) {
        log_audit_event(AuditEvent::new(
            AuditEventType::ConfigurationViolation,
            warning.to_string(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_ids_for_session() {
        let key = SessionKey::new("alice", "T-100");
        let correlation = CorrelationIds::for_session(&key);
        assert_eq!(correlation.subject_id.as_deref(), Some("alice"));
        assert_eq!(correlation.session_id.as_deref(), Some("T-100"));
        assert!(!correlation.request_id.is_empty());
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(CorrelationIds::new().request_id, CorrelationIds::new().request_id);
    }

    #[test]
    fn test_event_type_severity() {
        assert_eq!(
            AuditEventType::SessionTerminated.default_severity(),
            AuditSeverity::Critical
        );
        assert_eq!(
            AuditEventType::EnvironmentClean.default_severity(),
            AuditSeverity::Low
        );
        assert_eq!(
            AuditEventType::DetectorDegraded.default_severity(),
            AuditSeverity::High
        );
    }

    #[test]
    fn test_logger_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.log");
        let logger = AuditLogger::new(Some(path.clone())).unwrap();

        let key = SessionKey::new("bob", "T-7");
        logger.log_event(
            AuditEvent::new(AuditEventType::ViolationRecorded, "phone (+2)".to_string())
                .with_correlation(CorrelationIds::for_session(&key))
                .with_category("phone")
                .with_score(2),
        );
        logger.log_event(AuditEvent::new(
            AuditEventType::SessionClosed,
            "done".to_string(),
        ));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event_type"], "ViolationRecorded");
        assert_eq!(first["severity"], "Medium");
        assert_eq!(first["score"], 2);
        assert_eq!(first["correlation"]["subject_id"], "bob");
        assert!(first["process_id"].is_number());
    }
}
